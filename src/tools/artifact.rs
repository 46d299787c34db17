//! Artifact generation executor.
//!
//! Asks a model for code, packages react/html output as a bundle run through
//! the post-processor, then stores the result under a content-addressed key.
//! Storage failures degrade to an inline payload.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::storage::{content_key, persist, ObjectStore};
use super::tool::{parse_args, ToolExecutionContext, ToolExecutor};
use super::types::{
    ArtifactDeliverable, Deliverable, SideEffect, ToolExecutionResult, ToolParameters,
};
use crate::artifact::{ArtifactBundle, ArtifactMode, PostProcessor};
use crate::error::{KilnError, Result, ValidationLayer};
use crate::ingest::StreamIngest;
use crate::provider::ProviderRequest;
use crate::types::{ChatSettings, ModelMessage, StreamDelta};

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[\w+-]*[^\n]*\n(.*?)\n?```\s*$").expect("code fence regex must compile")
});

/// What the model is asked to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRequest {
    pub title: String,
    pub mode: ArtifactMode,
    pub instructions: String,
}

/// Code-generation collaborator. Returns raw source for the requested mode.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn generate(&self, request: &ArtifactRequest, cancel: &CancellationToken) -> Result<String>;
}

/// Generates artifact source with a separate, tool-less model call.
pub struct ModelArtifactGenerator {
    ingest: StreamIngest,
    settings: ChatSettings,
}

impl ModelArtifactGenerator {
    pub fn new(ingest: StreamIngest, settings: ChatSettings) -> Self {
        Self { ingest, settings }
    }

    fn system_prompt(mode: ArtifactMode) -> String {
        let format = match mode {
            ArtifactMode::React => {
                "a single ES module that default-exports a React component. Use \
                 React.createElement instead of JSX. Import libraries by bare name \
                 (e.g. `import { LineChart } from \"recharts\"`)"
            }
            ArtifactMode::Html => "a complete, self-contained HTML document",
            ArtifactMode::Svg => "a single standalone SVG document",
            ArtifactMode::Mermaid => "a Mermaid diagram definition",
            ArtifactMode::Markdown => "a Markdown document",
            ArtifactMode::Code => "source code only",
        };
        format!("You write artifacts. Respond with {format}, and nothing else: no prose, no explanations.")
    }
}

#[async_trait]
impl ArtifactGenerator for ModelArtifactGenerator {
    async fn generate(&self, request: &ArtifactRequest, cancel: &CancellationToken) -> Result<String> {
        let provider_request = ProviderRequest {
            messages: vec![
                ModelMessage::system(Self::system_prompt(request.mode)),
                ModelMessage::user(format!("Title: {}\n\n{}", request.title, request.instructions)),
            ],
            settings: self.settings.clone(),
            tools: None,
        };
        let mut stream = self.ingest.open(provider_request, cancel).await?;
        let mut code = String::new();
        while let Some(delta) = stream.next().await {
            if let StreamDelta::Content { text } = delta? {
                code.push_str(&text);
            }
        }
        Ok(strip_code_fence(&code))
    }
}

/// Remove a single wrapping Markdown code fence, if present.
pub fn strip_code_fence(code: &str) -> String {
    match CODE_FENCE_RE.captures(code) {
        Some(caps) => caps[1].to_string(),
        None => code.trim().to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ArtifactArgs {
    title: String,
    mode: String,
    instructions: String,
}

/// `create_artifact` executor.
pub struct ArtifactTool {
    generator: Arc<dyn ArtifactGenerator>,
    store: Option<Arc<dyn ObjectStore>>,
    post_processor: PostProcessor,
    parameters: ToolParameters,
}

impl ArtifactTool {
    pub const NAME: &'static str = "create_artifact";

    pub fn new(generator: Arc<dyn ArtifactGenerator>, store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self {
            generator,
            store,
            post_processor: PostProcessor::new(),
            parameters: ToolParameters::object()
                .bounded_string("title", "Short title for the artifact", 1, 200, true)
                .string_enum("mode", "Kind of artifact to produce", ArtifactMode::ALL, true)
                .bounded_string("instructions", "What the artifact should contain", 1, 8_000, true)
                .build(),
        }
    }

    /// Package generated code. Bundled modes go through every post-processing pass.
    fn package(&self, code: &str, mode: ArtifactMode, title: &str) -> ArtifactBundle {
        if !mode.is_bundled() {
            return ArtifactBundle::from_document(code);
        }
        let mut bundle = ArtifactBundle::from_generated(code, mode, title);
        self.post_processor.run(&mut bundle);
        bundle
    }
}

#[async_trait]
impl ToolExecutor for ArtifactTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Create a rendered artifact (interactive React component, HTML page, SVG, diagram or document)"
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &serde_json::Value,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolExecutionResult> {
        let args: ArtifactArgs = parse_args(args)?;
        let mode: ArtifactMode = args.mode.parse().map_err(|_| {
            KilnError::validation(ValidationLayer::Schema, format!("unsupported mode '{}'", args.mode))
        })?;
        let request = ArtifactRequest {
            title: args.title,
            mode,
            instructions: args.instructions,
        };

        let code = self.generator.generate(&request, &ctx.cancel).await?;
        if code.trim().is_empty() {
            return Err(KilnError::tool_execution(Self::NAME, "model returned no artifact code"));
        }
        let bundle = self.package(&code, mode, &request.title);
        let artifact_id = uuid::Uuid::new_v4().to_string();
        let key = content_key("artifacts", mode.extension(), bundle.transformed_code.as_bytes());

        let stored = match &self.store {
            Some(store) => match persist(
                store.as_ref(),
                &key,
                bundle.transformed_code.as_bytes().to_vec(),
                mode.content_type(),
            )
            .await
            {
                Ok(stored) => Some(stored),
                Err(e) => {
                    warn!(call_id = %ctx.call_id, error = %e, "Artifact storage failed; inlining");
                    None
                }
            },
            None => None,
        };
        debug!(
            call_id = %ctx.call_id,
            artifact_id = %artifact_id,
            mode = %mode,
            dependencies = bundle.detected_dependencies.len(),
            "Artifact generated"
        );

        let dependencies: Vec<String> = bundle.detected_dependencies.iter().cloned().collect();
        let payload = serde_json::json!({
            "artifact_id": artifact_id,
            "title": request.title,
            "mode": mode,
            "dependencies": dependencies,
            "stored": stored.is_some(),
        });
        let (url, content, side_effect) = match stored {
            Some(stored) => (
                Some(stored.url.clone()),
                None,
                SideEffect::ObjectStored {
                    key: stored.key,
                    url: stored.url,
                },
            ),
            None => (None, Some(bundle.transformed_code), SideEffect::StorageFailed { key }),
        };

        Ok(ToolExecutionResult::success(payload)
            .with_side_effect(side_effect)
            .with_deliverable(Deliverable::Artifact(ArtifactDeliverable {
                artifact_id,
                title: request.title,
                mode: mode.to_string(),
                url,
                content,
                dependencies,
                warnings: bundle.warnings,
            })))
    }
}
