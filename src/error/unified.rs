//! Unified error classification, client-facing error bodies and recovery hints.

use serde::{Deserialize, Serialize};
use strum::Display;

use super::KilnError;

/// Validation Gateway layer that produced a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidationLayer {
    Injection,
    Schema,
    Admission,
    Execution,
    /// Synthetic violation for tool calls left unfinalized when a turn ends.
    Accumulation,
}

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Injection,
    RateLimit,
    CircuitOpen,
    ResourceExhausted,
    UpstreamRateLimit,
    UpstreamOverloaded,
    Upstream,
    Network,
    Timeout,
    Configuration,
    Serialization,
    ToolExecution,
    Canceled,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    FixInput,
    RetryAfterHint,
    RetryWithBackoff,
    IncreaseTimeout,
    CheckConfiguration,
    CheckToolImplementation,
    ReduceRequestScope,
    ContactSupport,
}

/// Machine-readable error kind used in client-facing bodies and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    RateLimitError,
    CircuitOpenError,
    ResourceExhaustionError,
    UpstreamApiError,
    UnknownError,
}

impl From<&KilnError> for ErrorKind {
    fn from(error: &KilnError) -> Self {
        match error.category() {
            ErrorCategory::Validation | ErrorCategory::Injection => Self::ValidationError,
            ErrorCategory::RateLimit => Self::RateLimitError,
            ErrorCategory::CircuitOpen => Self::CircuitOpenError,
            ErrorCategory::ResourceExhausted => Self::ResourceExhaustionError,
            ErrorCategory::UpstreamRateLimit
            | ErrorCategory::UpstreamOverloaded
            | ErrorCategory::Upstream
            | ErrorCategory::Network => Self::UpstreamApiError,
            _ => Self::UnknownError,
        }
    }
}

/// JSON body for non-streaming error surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip)]
    pub status: u16,
}

impl ErrorResponse {
    /// Build a client-safe body. The message never contains raw upstream text.
    pub fn from_error(error: &KilnError) -> Self {
        Self {
            error: ErrorKind::from(error),
            message: crate::output::sanitize::client_message(error),
            retry_after_secs: error.retry_after_ms().map(|ms| ms.div_ceil(1000)),
            status: error.http_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_rounds_retry_hint_up_to_whole_seconds() {
        let err = KilnError::CircuitOpen {
            tool: "generate_image".into(),
            retry_after_ms: 12_001,
        };
        let body = ErrorResponse::from_error(&err);

        assert_eq!(body.status, 503);
        assert_eq!(body.error, ErrorKind::CircuitOpenError);
        assert_eq!(body.retry_after_secs, Some(13));
    }

    #[test]
    fn resource_exhaustion_message_does_not_reveal_limits() {
        let err = KilnError::ResourceExhausted("tool call cap of 3 reached".into());
        let body = ErrorResponse::from_error(&err);

        assert!(!body.message.contains('3'));
        assert_eq!(body.error, ErrorKind::ResourceExhaustionError);
    }
}
