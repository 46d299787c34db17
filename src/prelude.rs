//! Convenience re-exports for common use.

pub use crate::config::KilnConfig;
pub use crate::engine::{ChatRequest, Engine, TurnSummary};
pub use crate::error::{KilnError, Result};
pub use crate::gateway::ValidationGateway;
pub use crate::governance::Governance;
pub use crate::ingest::StreamIngest;
pub use crate::output::{ChatEvent, EventEnvelope};
pub use crate::provider::ModelProvider;
pub use crate::tools::{ToolExecutionResult, ToolExecutor, ToolParameters, ToolRegistry};
pub use crate::types::{ChatSettings, ModelMessage, StreamDelta};
pub use tokio_util::sync::CancellationToken;
