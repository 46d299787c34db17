//! Error types for kiln.

pub mod unified;

pub use unified::{ErrorCategory, ErrorKind, ErrorResponse, RecoverySuggestion, ValidationLayer};

use thiserror::Error;

/// Primary error type for all kiln operations.
#[derive(Error, Debug)]
pub enum KilnError {
    /// Malformed or unsafe tool input. Never retried, never has side effects.
    #[error("Validation error ({layer}): {reason}")]
    Validation {
        layer: ValidationLayer,
        reason: String,
    },

    /// Per-principal quota exceeded.
    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The tool's circuit breaker is isolating it.
    #[error("Circuit open for tool '{tool}': retry after {retry_after_ms}ms")]
    CircuitOpen { tool: String, retry_after_ms: u64 },

    /// An internal cap was hit (e.g. tool calls per turn).
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The upstream model endpoint answered with a failure status.
    #[error("Upstream API error (status {status}): {message}")]
    Upstream {
        status: u16,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Canceled")]
    Canceled,

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl KilnError {
    /// Create a validation error for the given gateway layer.
    pub fn validation(layer: ValidationLayer, reason: impl Into<String>) -> Self {
        Self::Validation {
            layer,
            reason: reason.into(),
        }
    }

    /// Create an upstream error without a retry hint.
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn tool_execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation {
                layer: ValidationLayer::Injection,
                ..
            } => ErrorCategory::Injection,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            Self::ResourceExhausted(_) => ErrorCategory::ResourceExhausted,
            Self::Upstream { status, .. } => match status {
                429 => ErrorCategory::UpstreamRateLimit,
                503 | 529 => ErrorCategory::UpstreamOverloaded,
                _ => ErrorCategory::Upstream,
            },
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::Canceled => ErrorCategory::Canceled,
            Self::Io(_) | Self::Stream(_) | Self::Unknown(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether the upstream failure is a rate-limited or overloaded signal.
    ///
    /// Only these are retried by the ingest adapter; everything else aborts the turn.
    pub fn is_transient_upstream(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::UpstreamRateLimit | ErrorCategory::UpstreamOverloaded
        )
    }

    /// Whether a caller may retry this error later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit
                | ErrorCategory::CircuitOpen
                | ErrorCategory::UpstreamRateLimit
                | ErrorCategory::UpstreamOverloaded
                | ErrorCategory::Network
                | ErrorCategory::Timeout
        )
    }

    /// Server-supplied or governance-derived wait before retrying.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            Self::CircuitOpen { retry_after_ms, .. } => Some(*retry_after_ms),
            Self::Upstream { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    /// HTTP status for non-streaming error surfaces.
    pub fn http_status(&self) -> u16 {
        match self.category() {
            ErrorCategory::Validation => 400,
            ErrorCategory::Injection => 403,
            ErrorCategory::RateLimit => 429,
            ErrorCategory::CircuitOpen => 503,
            ErrorCategory::ResourceExhausted => 429,
            ErrorCategory::UpstreamRateLimit
            | ErrorCategory::UpstreamOverloaded
            | ErrorCategory::Upstream
            | ErrorCategory::Network => 502,
            ErrorCategory::Timeout => 504,
            _ => 500,
        }
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Validation | ErrorCategory::Injection => RecoverySuggestion::FixInput,
            ErrorCategory::RateLimit
            | ErrorCategory::CircuitOpen
            | ErrorCategory::UpstreamRateLimit
            | ErrorCategory::UpstreamOverloaded => RecoverySuggestion::RetryAfterHint,
            ErrorCategory::Network => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::ToolExecution => RecoverySuggestion::CheckToolImplementation,
            ErrorCategory::ResourceExhausted => RecoverySuggestion::ReduceRequestScope,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, KilnError>;
