//! Client event vocabulary and the sequencing envelope.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{ErrorKind, ErrorResponse, KilnError};
use crate::tools::types::{ArtifactDeliverable, ImageDeliverable, ToolExecutionResult};
use crate::types::ToolStatus;

/// One client-facing event. Serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    ReasoningStep {
        text: String,
    },
    ContentDelta {
        text: String,
    },
    ToolCallStart {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        name: String,
        status: ToolStatus,
        result: serde_json::Value,
        retryable: bool,
        #[serde(default)]
        degraded: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
    },
    ArtifactComplete {
        call_id: String,
        artifact: ArtifactDeliverable,
    },
    ImageComplete {
        call_id: String,
        image: ImageDeliverable,
    },
    Error {
        error: ErrorKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
    /// Terminal sentinel: nothing follows for this turn.
    Done {
        passes: u32,
    },
}

impl ChatEvent {
    pub fn tool_result(call_id: &str, name: &str, result: &ToolExecutionResult) -> Self {
        Self::ToolResult {
            call_id: call_id.to_string(),
            name: name.to_string(),
            status: if result.success {
                ToolStatus::Success
            } else {
                ToolStatus::Error
            },
            result: result.payload.clone(),
            retryable: result.retryable,
            degraded: result.degraded,
            error_kind: result.error_kind,
        }
    }

    /// Client-safe error event.
    pub fn error(error: &KilnError) -> Self {
        let body = ErrorResponse::from_error(error);
        Self::Error {
            error: body.error,
            message: body.message,
            retry_after_secs: body.retry_after_secs,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ReasoningStep { .. } => "reasoning_step",
            Self::ContentDelta { .. } => "content_delta",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolResult { .. } => "tool_result",
            Self::ArtifactComplete { .. } => "artifact_complete",
            Self::ImageComplete { .. } => "image_complete",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// Envelope for streamed events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Monotonic within a turn, starting at 1.
    pub seq: u64,
    pub turn_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ChatEvent,
}

impl EventEnvelope {
    /// One NDJSON line, newline included.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Stamps events with a sequence number and forwards them to the client.
#[derive(Debug)]
pub struct EventEmitter {
    turn_id: String,
    seq: AtomicU64,
    tx: mpsc::Sender<EventEnvelope>,
}

impl EventEmitter {
    pub fn new(turn_id: impl Into<String>, tx: mpsc::Sender<EventEnvelope>) -> Self {
        Self {
            turn_id: turn_id.into(),
            seq: AtomicU64::new(0),
            tx,
        }
    }

    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    /// Send an event. Returns `false` once the client has gone away.
    pub async fn emit(&self, event: ChatEvent) -> bool {
        let envelope = EventEnvelope {
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            turn_id: self.turn_id.clone(),
            timestamp: Utc::now(),
            event,
        };
        self.tx.send(envelope).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_numbers_increase_from_one() {
        let (tx, mut rx) = mpsc::channel(8);
        let emitter = EventEmitter::new("turn_1", tx);

        emitter.emit(ChatEvent::ContentDelta { text: "a".into() }).await;
        emitter.emit(ChatEvent::Done { passes: 1 }).await;

        assert_eq!(rx.recv().await.unwrap().seq, 1);
        let done = rx.recv().await.unwrap();
        assert_eq!(done.seq, 2);
        assert!(done.event.is_terminal());
    }

    #[test]
    fn envelope_serializes_to_one_tagged_line() {
        let envelope = EventEnvelope {
            seq: 7,
            turn_id: "turn_1".into(),
            timestamp: Utc::now(),
            event: ChatEvent::ToolCallStart {
                call_id: "call_1".into(),
                name: "web_search".into(),
                arguments: serde_json::json!({"query": "rust"}),
            },
        };

        let line = envelope.to_line().unwrap();

        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "tool_call_start");
        assert_eq!(value["seq"], 7);
        assert_eq!(value["name"], "web_search");
    }

    #[test]
    fn error_events_carry_kind_and_whole_second_hint() {
        let event = ChatEvent::error(&KilnError::RateLimited {
            retry_after_ms: 1_500,
        });

        let ChatEvent::Error {
            error,
            retry_after_secs,
            ..
        } = event
        else {
            panic!("expected error event");
        };
        assert_eq!(error, ErrorKind::RateLimitError);
        assert_eq!(retry_after_secs, Some(2));
    }
}
