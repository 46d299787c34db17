//! Validation gateway: the fixed, ordered checks every proposed tool call
//! passes before its executor runs.
//!
//! 1. injection defense
//! 2. parameter schema (and tool lookup)
//! 3. admission: per-turn cap, then circuit breaker, then rate quota
//! 4. execution governance: per-call timeout and breaker accounting
//!
//! Layers 1-3 only reject; they never touch breaker failure counts. The cap
//! is checked before the breaker so a call over the cap fails without
//! consulting shared state.

pub mod injection;
pub mod schema;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{KilnError, ValidationLayer};
use crate::governance::{BreakerPermit, Governance};
use crate::tools::{ToolExecutionContext, ToolExecutionResult, ToolExecutor, ToolRegistry};
use crate::types::AgentToolCall;
use crate::util::timeout::with_timeout_or_cancel;

/// Per-turn tool-call budget. Every well-formed proposal spends one slot,
/// whether or not it is later admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnBudget {
    cap: u32,
    proposed: u32,
}

impl TurnBudget {
    pub fn new(cap: u32) -> Self {
        Self { cap, proposed: 0 }
    }

    pub fn proposed(&self) -> u32 {
        self.proposed
    }

    pub fn is_exhausted(&self) -> bool {
        self.proposed >= self.cap
    }

    fn spend(&mut self) -> Result<(), KilnError> {
        if self.is_exhausted() {
            return Err(KilnError::ResourceExhausted(format!(
                "per-turn tool call cap of {} reached",
                self.cap
            )));
        }
        self.proposed += 1;
        Ok(())
    }
}

/// A call that passed layers 1-3 and holds a breaker permit.
pub struct AdmittedCall {
    pub call: AgentToolCall,
    tool: Arc<dyn ToolExecutor>,
    permit: BreakerPermit,
}

impl std::fmt::Debug for AdmittedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmittedCall")
            .field("call", &self.call)
            .field("trial", &self.permit.is_trial())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ValidationGateway {
    governance: Arc<Governance>,
}

impl ValidationGateway {
    pub fn new(governance: Arc<Governance>) -> Self {
        Self { governance }
    }

    pub fn governance(&self) -> &Arc<Governance> {
        &self.governance
    }

    /// A fresh budget sized from the governance config.
    pub fn turn_budget(&self) -> TurnBudget {
        TurnBudget::new(self.governance.config().max_tool_calls_per_turn)
    }

    /// Run layers 1-3 for one proposed call.
    pub fn admit(
        &self,
        budget: &mut TurnBudget,
        principal: &str,
        tools: &ToolRegistry,
        call: &AgentToolCall,
    ) -> Result<AdmittedCall, KilnError> {
        injection::scan(&call.arguments)?;

        let tool = tools.get(&call.name).cloned().ok_or_else(|| {
            KilnError::validation(ValidationLayer::Schema, format!("unknown tool '{}'", call.name))
        })?;
        schema::check(&call.arguments, &tool.parameters().schema)?;

        budget.spend()?;
        let permit = self.governance.admit(principal, &call.name)?;
        debug!(tool = %call.name, call_id = %call.id, trial = permit.is_trial(), "Tool call admitted");

        Ok(AdmittedCall {
            call: call.clone(),
            tool,
            permit,
        })
    }

    /// Layer 4: run an admitted call under the per-call timeout and record the
    /// outcome against the breaker. Never fails; failures become error results.
    ///
    /// Cancellation of the request drops the permit unresolved, so it is not
    /// counted as a failure.
    pub async fn execute(&self, admitted: AdmittedCall, ctx: ToolExecutionContext) -> ToolExecutionResult {
        let AdmittedCall { call, tool, permit } = admitted;
        let timeout = self.governance.config().tool_timeout();
        let outcome = with_timeout_or_cancel(timeout, &ctx.cancel, tool.execute(&call.arguments, &ctx)).await;
        // Stop anything the executor spawned against the token.
        ctx.cancel.cancel();

        match outcome {
            Ok(result) if result.success => {
                permit.record_success();
                result
            }
            Ok(result) => {
                warn!(tool = %call.name, call_id = %call.id, "Tool reported failure");
                permit.record_failure();
                result
            }
            Err(KilnError::Canceled) => {
                drop(permit);
                ToolExecutionResult::failure(&KilnError::Canceled)
            }
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool execution failed");
                permit.record_failure();
                let mut result = ToolExecutionResult::failure(&e);
                if matches!(e, KilnError::Timeout(_)) {
                    result.retryable = true;
                }
                result
            }
        }
    }
}
