//! Tool executor trait and closure-based executor wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::types::{ToolExecutionResult, ToolParameters};
use crate::error::{KilnError, Result, ValidationLayer};
use crate::provider::ToolDefinition;

/// Context available during tool execution.
#[derive(Debug, Clone)]
pub struct ToolExecutionContext {
    pub call_id: String,
    pub turn_id: String,
    /// Caller identity used for quotas.
    pub principal: String,
    /// Cancelled on request cancellation or per-call timeout.
    pub cancel: CancellationToken,
}

impl ToolExecutionContext {
    pub fn new(call_id: impl Into<String>, turn_id: impl Into<String>, principal: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            turn_id: turn_id.into(),
            principal: principal.into(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Core executor trait: implement one per declared tool.
///
/// `execute` receives arguments that already passed the validation gateway.
/// Returning `Err` (or a result with `success: false`) counts as an executor
/// failure against the tool's circuit breaker.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema parameters.
    fn parameters(&self) -> &ToolParameters;

    /// Execute the tool with validated arguments.
    async fn execute(
        &self,
        args: &serde_json::Value,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolExecutionResult>;

    /// Declaration sent to the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().schema.clone(),
        }
    }
}

/// Deserialize validated arguments into a typed parameter struct.
pub fn parse_args<T: DeserializeOwned>(args: &serde_json::Value) -> Result<T> {
    serde_json::from_value(args.clone())
        .map_err(|e| KilnError::validation(ValidationLayer::Schema, e.to_string()))
}

/// Type alias for the tool handler function.
type ToolHandler = dyn Fn(
        serde_json::Value,
        ToolExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<ToolExecutionResult>> + Send>>
    + Send
    + Sync;

/// Closure-based executor for quick tool creation.
pub struct FnTool {
    name: String,
    description: String,
    parameters: ToolParameters,
    handler: Arc<ToolHandler>,
}

impl FnTool {
    /// Create an executor from a closure.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolExecutionResult>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

#[async_trait]
impl ToolExecutor for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &serde_json::Value,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolExecutionResult> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_tool_passes_arguments_and_context_to_the_closure() {
        let tool = FnTool::new(
            "echo",
            "Echo the input",
            ToolParameters::object().string("text", "Text", true).build(),
            |args, ctx| async move {
                Ok(ToolExecutionResult::success(serde_json::json!({
                    "text": args["text"],
                    "call_id": ctx.call_id,
                })))
            },
        );

        let result = tool
            .execute(
                &serde_json::json!({"text": "hi"}),
                &ToolExecutionContext::new("call_1", "turn_1", "alice"),
            )
            .await
            .unwrap();

        assert_eq!(result.payload["text"], "hi");
        assert_eq!(result.payload["call_id"], "call_1");
        assert_eq!(tool.definition().name, "echo");
    }

    #[test]
    fn parse_args_maps_shape_errors_to_schema_violations() {
        #[derive(serde::Deserialize)]
        #[allow(dead_code)]
        struct Args {
            query: String,
        }

        let err = parse_args::<Args>(&serde_json::json!({"query": 3})).err().unwrap();

        assert!(matches!(
            err,
            KilnError::Validation {
                layer: ValidationLayer::Schema,
                ..
            }
        ));
    }
}
