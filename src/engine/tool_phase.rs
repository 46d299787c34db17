//! Tool phase of a pass: gate every finalized call, run the admitted ones in
//! parallel, and return outcomes in finalization order.

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::continuation::ToolOutcome;
use crate::error::KilnError;
use crate::gateway::{TurnBudget, ValidationGateway};
use crate::output::{ChatEvent, EventEmitter};
use crate::tools::{ToolExecutionContext, ToolExecutionResult, ToolRegistry};
use crate::types::ToolCallRecord;

pub(crate) struct ToolPhase<'a> {
    pub gateway: &'a ValidationGateway,
    pub tools: &'a ToolRegistry,
    pub principal: &'a str,
    pub emitter: &'a EventEmitter,
    pub cancel: &'a CancellationToken,
}

impl ToolPhase<'_> {
    pub async fn run(&self, budget: &mut TurnBudget, records: Vec<ToolCallRecord>) -> Vec<ToolOutcome> {
        let mut results: Vec<Option<ToolExecutionResult>> = Vec::with_capacity(records.len());
        let mut calls = Vec::with_capacity(records.len());
        let mut admitted = Vec::new();

        // Admission is sequential so the per-turn budget is spent in
        // finalization order.
        for (index, record) in records.iter().enumerate() {
            let call = record.to_call();
            self.emitter
                .emit(ChatEvent::ToolCallStart {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                })
                .await;

            // Unparseable arguments arrive as a string: the injection layer
            // scans the raw text and the schema layer rejects the non-object.
            match self.gateway.admit(budget, self.principal, self.tools, &call) {
                Ok(ticket) => {
                    admitted.push((index, ticket));
                    results.push(None);
                }
                Err(e) => {
                    debug!(tool = %call.name, call_id = %call.id, error = %e, "Tool call rejected");
                    results.push(Some(ToolExecutionResult::failure(&e)));
                }
            }
            calls.push(call);
        }

        let executions = admitted.into_iter().map(|(index, ticket)| {
            let ctx = ToolExecutionContext {
                call_id: ticket.call.id.clone(),
                turn_id: self.emitter.turn_id().to_string(),
                principal: self.principal.to_string(),
                cancel: self.cancel.child_token(),
            };
            async move { (index, self.gateway.execute(ticket, ctx).await) }
        });
        for (index, result) in join_all(executions).await {
            results[index] = Some(result);
        }

        let mut outcomes = Vec::with_capacity(calls.len());
        for (call, result) in calls.into_iter().zip(results) {
            let result = result.unwrap_or_else(|| {
                ToolExecutionResult::failure(&KilnError::Unknown("tool produced no result".into()))
            });
            self.emitter
                .emit(ChatEvent::tool_result(&call.id, &call.name, &result))
                .await;
            outcomes.push(ToolOutcome { call, result });
        }
        outcomes
    }
}
