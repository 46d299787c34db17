//! Generation settings and related enums.

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Settings controlling a streaming chat call.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default)]
pub struct ChatSettings {
    #[builder(into)]
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub reasoning_effort: Option<ReasoningEffort>,
    #[builder(into)]
    pub user: Option<String>,
}

impl ChatSettings {
    /// Whether the caller asked for deeper thinking (longer overall call timeout).
    pub fn wants_deep_thinking(&self) -> bool {
        matches!(
            self.reasoning_effort,
            Some(ReasoningEffort::Medium | ReasoningEffort::High)
        )
    }
}

/// Reasoning effort level for reasoning models.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Low,
    Medium,
    High,
}

/// Why generation finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
}
