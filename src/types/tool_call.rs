//! Tool-call records assembled from stream fragments, and gateway violations.

use serde::{Deserialize, Serialize};

use crate::error::{KilnError, ValidationLayer};

use super::message::AgentToolCall;

/// A tool call being assembled within one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub args_buffer: String,
    pub finalized: bool,
}

impl ToolCallRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            args_buffer: String::new(),
            finalized: false,
        }
    }

    /// Parse the accumulated argument text. Empty arguments parse as `{}`.
    pub fn parse_arguments(&self) -> Result<serde_json::Value, ValidationViolation> {
        if self.args_buffer.trim().is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.args_buffer).map_err(|_| {
            ValidationViolation::new(ValidationLayer::Schema, "tool arguments are not valid JSON")
        })
    }

    /// Convert into a call with parsed arguments; malformed arguments become a string.
    pub fn to_call(&self) -> AgentToolCall {
        AgentToolCall {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: self
                .parse_arguments()
                .unwrap_or_else(|_| serde_json::Value::String(self.args_buffer.clone())),
        }
    }
}

/// Rejection of a single tool-call attempt by one gateway layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub layer: ValidationLayer,
    pub reason: String,
}

impl ValidationViolation {
    pub fn new(layer: ValidationLayer, reason: impl Into<String>) -> Self {
        Self {
            layer,
            reason: reason.into(),
        }
    }
}

impl From<ValidationViolation> for KilnError {
    fn from(violation: ValidationViolation) -> Self {
        KilnError::Validation {
            layer: violation.layer,
            reason: violation.reason,
        }
    }
}
