//! Streaming types.

use serde::{Deserialize, Serialize};

use super::generation::FinishReason;

/// A decoded unit of the upstream token stream.
///
/// Deltas are ephemeral: the ingest adapter produces them and the accumulator
/// consumes them immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamDelta {
    /// Incremental answer text.
    Content { text: String },
    /// Incremental reasoning ("thinking") text.
    Reasoning { text: String },
    /// Part of a tool call, keyed by call id.
    ToolCallFragment(ToolCallFragment),
    /// End of the upstream stream for this pass.
    Terminal {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<FinishReason>,
    },
}

impl StreamDelta {
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning { text: text.into() }
    }

    pub fn terminal() -> Self {
        Self::Terminal {
            finish_reason: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

/// A partial tool call as streamed by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_fragment: Option<String>,
    #[serde(default)]
    pub args_fragment: String,
    /// Explicit close marker: the call is complete after this fragment.
    #[serde(default)]
    pub closes: bool,
}

impl ToolCallFragment {
    pub fn new(id: impl Into<String>, args_fragment: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name_fragment: None,
            args_fragment: args_fragment.into(),
            closes: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name_fragment = Some(name.into());
        self
    }

    pub fn closing(mut self) -> Self {
        self.closes = true;
        self
    }
}

impl From<ToolCallFragment> for StreamDelta {
    fn from(fragment: ToolCallFragment) -> Self {
        StreamDelta::ToolCallFragment(fragment)
    }
}
