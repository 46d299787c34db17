//! Continuation transcript: original turn + assistant tool calls + results.

use crate::tools::ToolExecutionResult;
use crate::types::{AgentToolCall, ModelMessage, ToolResultEnvelope, ToolStatus};

/// One tool call of a pass and what came of it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub call: AgentToolCall,
    pub result: ToolExecutionResult,
}

impl ToolOutcome {
    /// The structured block the model sees for this call.
    pub fn envelope(&self) -> ToolResultEnvelope {
        let status = if self.result.success {
            ToolStatus::Success
        } else {
            ToolStatus::Error
        };
        let mut result = self.result.payload.clone();
        if self.result.degraded {
            if let Some(obj) = result.as_object_mut() {
                obj.insert("degraded".into(), serde_json::Value::Bool(true));
            }
        }
        ToolResultEnvelope {
            tool_call_id: self.call.id.clone(),
            name: self.call.name.clone(),
            status,
            result,
        }
    }
}

/// Append the assistant's tool-call message and one tool-role envelope per
/// outcome, in the order given (finalization order).
pub fn extend_transcript(transcript: &mut Vec<ModelMessage>, assistant_text: &str, outcomes: &[ToolOutcome]) {
    let calls = outcomes.iter().map(|o| o.call.clone()).collect();
    transcript.push(ModelMessage::assistant_tool_calls(assistant_text, calls));
    transcript.extend(outcomes.iter().map(|o| ModelMessage::tool_result(o.envelope())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KilnError;
    use crate::types::Role;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn outcome(id: &str, result: ToolExecutionResult) -> ToolOutcome {
        ToolOutcome {
            call: AgentToolCall {
                id: id.into(),
                name: "web_search".into(),
                arguments: json!({"query": id}),
            },
            result,
        }
    }

    #[test]
    fn results_follow_the_assistant_message_in_order() {
        let mut transcript = vec![ModelMessage::user("find things")];
        let outcomes = vec![
            outcome("b", ToolExecutionResult::success(json!({"hits": 1}))),
            outcome("a", ToolExecutionResult::failure(&KilnError::Timeout(60_000))),
        ];

        extend_transcript(&mut transcript, "Searching.", &outcomes);

        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript[1].role, Role::Assistant);
        let ids: Vec<&str> = transcript[1].tool_calls().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        let envelopes: Vec<&ToolResultEnvelope> = transcript[2..]
            .iter()
            .map(|m| m.tool_result_envelope().unwrap())
            .collect();
        assert_eq!(envelopes[0].tool_call_id, "b");
        assert_eq!(envelopes[0].status, ToolStatus::Success);
        assert_eq!(envelopes[1].tool_call_id, "a");
        assert!(envelopes[1].is_error());
    }

    #[test]
    fn degraded_results_are_flagged_for_the_model() {
        let result = ToolExecutionResult::success(json!({"artifact_id": "x"})).with_side_effect(
            crate::tools::SideEffect::StorageFailed {
                key: "artifacts/x.html".into(),
            },
        );

        let envelope = outcome("a", result).envelope();

        assert_eq!(envelope.status, ToolStatus::Success);
        assert_eq!(envelope.result["degraded"], true);
    }
}
