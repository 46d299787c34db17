//! Turn engine: stream → accumulate → gate → execute → re-inject → resume.
//!
//! One turn is a sequence of streaming passes. A pass that finalizes tool
//! calls runs them through the validation gateway and its executors, appends
//! the results to the transcript and starts a continuation pass. The loop ends
//! when a pass makes no tool calls, when the pass limit is reached, when a
//! tools-withheld pass (per-turn cap spent) completes, or when the turn
//! deadline fires.

pub mod continuation;
mod tool_phase;

use std::collections::HashSet;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accumulator::{PassOutput, Surfaced, ToolCallAccumulator};
use crate::config::StreamConfig;
use crate::error::{ErrorCategory, KilnError};
use crate::gateway::{TurnBudget, ValidationGateway};
use crate::ingest::StreamIngest;
use crate::output::{ChatEvent, EventEmitter, EventEnvelope};
use crate::provider::ProviderRequest;
use crate::tools::{Deliverable, ToolRegistry};
use crate::types::{ChatSettings, ModelMessage, ToolCallRecord, ValidationViolation};

pub use continuation::{extend_transcript, ToolOutcome};
use tool_phase::ToolPhase;

/// Events buffered between the engine and a slow client.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A normalized chat request handed to the engine.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub turn_id: String,
    pub messages: Vec<ModelMessage>,
    pub settings: ChatSettings,
    /// Caller identity for rate quotas.
    pub principal: String,
}

impl ChatRequest {
    pub fn new(principal: impl Into<String>, messages: Vec<ModelMessage>) -> Self {
        Self {
            turn_id: uuid::Uuid::new_v4().to_string(),
            messages,
            settings: ChatSettings::default(),
            principal: principal.into(),
        }
    }

    pub fn with_settings(mut self, settings: ChatSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSummary {
    pub passes: u32,
    pub tool_calls: usize,
    /// `None` when the turn completed normally.
    pub failure: Option<ErrorCategory>,
}

/// Result of one streaming pass.
struct PassResult {
    output: PassOutput,
    /// The turn deadline fired before the pass completed.
    deadline_hit: bool,
    /// Records discarded because the deadline fired mid-pass.
    abandoned: Vec<(ToolCallRecord, ValidationViolation)>,
}

/// Per-request pipeline over shared ingest, gateway and tools.
#[derive(Clone)]
pub struct Engine {
    ingest: StreamIngest,
    gateway: ValidationGateway,
    tools: ToolRegistry,
    config: StreamConfig,
}

impl Engine {
    pub fn new(ingest: StreamIngest, gateway: ValidationGateway, tools: ToolRegistry, config: StreamConfig) -> Self {
        Self {
            ingest,
            gateway,
            tools,
            config,
        }
    }

    pub fn gateway(&self) -> &ValidationGateway {
        &self.gateway
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run a turn in the background and stream its events.
    ///
    /// Dropping the returned stream stops the turn at its next event.
    pub fn start(&self, request: ChatRequest, cancel: CancellationToken) -> ReceiverStream<EventEnvelope> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let engine = self.clone();
        tokio::spawn(async move {
            let emitter = EventEmitter::new(request.turn_id.clone(), tx);
            engine.run_turn(request, &cancel, &emitter).await;
        });
        ReceiverStream::new(rx)
    }

    /// Drive one turn to completion, emitting every event through `emitter`.
    /// The last event is always `done`.
    ///
    /// The turn runs under a child of `cancel`; a departed client stops this
    /// turn only.
    pub async fn run_turn(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
        emitter: &EventEmitter,
    ) -> TurnSummary {
        let cancel = &cancel.child_token();
        let turn_id = request.turn_id.clone();
        let deadline = Instant::now() + self.config.turn_timeout();
        let max_passes = self.config.max_passes.max(1) as u32;
        let mut budget = self.gateway.turn_budget();
        let mut transcript = request.messages.clone();
        let mut deliverables: Vec<(String, Deliverable)> = Vec::new();
        let mut seen_ids = HashSet::new();
        let mut summary = TurnSummary {
            passes: 0,
            tool_calls: 0,
            failure: None,
        };
        info!(turn_id = %turn_id, principal = %request.principal, "Turn started");

        loop {
            summary.passes += 1;
            let withhold_tools = budget.is_exhausted() || summary.passes >= max_passes;
            let provider_request = ProviderRequest {
                messages: transcript.clone(),
                settings: request.settings.clone(),
                tools: if withhold_tools {
                    None
                } else {
                    self.tools.definitions()
                },
            };

            let pass = match self.stream_pass(provider_request, cancel, emitter, deadline).await {
                Ok(pass) => pass,
                Err(e) => {
                    self.report(&turn_id, &e, emitter).await;
                    summary.failure = Some(e.category());
                    break;
                }
            };

            if pass.deadline_hit {
                // Finalized calls of a cut-off pass are not executed.
                for (record, violation) in pass.abandoned {
                    debug!(turn_id = %turn_id, call_id = %record.id, "Discarding unfinished tool call");
                    emitter.emit(ChatEvent::error(&KilnError::from(violation))).await;
                }
                let timeout = KilnError::Timeout(self.config.turn_timeout_ms);
                self.report(&turn_id, &timeout, emitter).await;
                summary.failure = Some(timeout.category());
                break;
            }

            let PassOutput {
                text,
                mut tool_calls,
                buffered,
                ..
            } = pass.output;
            rekey_repeated_ids(&mut tool_calls, &mut seen_ids, summary.passes);
            if tool_calls.is_empty() {
                flush(buffered, emitter).await;
                break;
            }

            summary.tool_calls += tool_calls.len();
            // Calls on a tools-withheld pass are rejected as over the cap.
            let mut withheld = TurnBudget::new(0);
            let phase_budget = if withhold_tools { &mut withheld } else { &mut budget };
            let outcomes = ToolPhase {
                gateway: &self.gateway,
                tools: &self.tools,
                principal: &request.principal,
                emitter,
                cancel,
            }
            .run(phase_budget, tool_calls)
            .await;
            flush(buffered, emitter).await;

            deliverables.extend(outcomes.iter().filter_map(|o| {
                o.result
                    .deliverable
                    .clone()
                    .map(|d| (o.call.id.clone(), d))
            }));

            if cancel.is_cancelled() {
                self.report(&turn_id, &KilnError::Canceled, emitter).await;
                summary.failure = Some(ErrorCategory::Canceled);
                break;
            }
            if withhold_tools {
                // The model was told no tools were available; its calls were
                // rejected above and there is no pass left to react to them.
                warn!(turn_id = %turn_id, "Tool calls emitted on a tools-withheld pass");
                break;
            }
            extend_transcript(&mut transcript, &text, &outcomes);
            debug!(turn_id = %turn_id, pass = summary.passes, calls = outcomes.len(), "Continuing turn");
        }

        for (call_id, deliverable) in deliverables {
            let event = match deliverable {
                Deliverable::Artifact(artifact) => ChatEvent::ArtifactComplete { call_id, artifact },
                Deliverable::Image(image) => ChatEvent::ImageComplete { call_id, image },
            };
            emitter.emit(event).await;
        }
        emitter
            .emit(ChatEvent::Done {
                passes: summary.passes,
            })
            .await;
        info!(
            turn_id = %turn_id,
            passes = summary.passes,
            tool_calls = summary.tool_calls,
            "Turn finished"
        );
        summary
    }

    async fn stream_pass(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
        emitter: &EventEmitter,
        deadline: Instant,
    ) -> Result<PassResult, KilnError> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(KilnError::Canceled),
            _ = time::sleep_until(deadline) => {
                return Err(KilnError::Timeout(self.config.turn_timeout_ms));
            }
            opened = self.ingest.open(request, cancel) => opened?,
        };

        let mut accumulator = ToolCallAccumulator::new();
        loop {
            tokio::select! {
                biased;
                _ = time::sleep_until(deadline) => {
                    warn!(timeout_ms = self.config.turn_timeout_ms, "Turn deadline reached mid-pass");
                    let abandoned = accumulator.abandon();
                    return Ok(PassResult {
                        output: accumulator.finish(),
                        deadline_hit: true,
                        abandoned,
                    });
                }
                item = stream.next() => match item {
                    None => break,
                    Some(Ok(delta)) => {
                        if let Some(surfaced) = accumulator.apply(delta) {
                            if !emitter.emit(surfaced_event(surfaced)).await {
                                cancel.cancel();
                            }
                        }
                    }
                    Some(Err(e)) => return Err(e),
                },
            }
        }
        if stream.dropped() > 0 {
            warn!(dropped = stream.dropped(), "Deltas were truncated under backpressure");
        }
        Ok(PassResult {
            output: accumulator.finish(),
            deadline_hit: false,
            abandoned: Vec::new(),
        })
    }

    /// Log an error in full and send the client its sanitized form.
    async fn report(&self, turn_id: &str, e: &KilnError, emitter: &EventEmitter) {
        match e.category() {
            ErrorCategory::Unknown | ErrorCategory::Serialization | ErrorCategory::Configuration => {
                error!(turn_id, error = ?e, "Turn failed")
            }
            _ => warn!(turn_id, error = %e, "Turn failed"),
        }
        emitter.emit(ChatEvent::error(e)).await;
    }
}

/// Give a call whose id was already used earlier in the turn a fresh id, so
/// every envelope in the transcript answers exactly one call.
fn rekey_repeated_ids(records: &mut [ToolCallRecord], seen: &mut HashSet<String>, pass: u32) {
    for record in records {
        if seen.insert(record.id.clone()) {
            continue;
        }
        let original = record.id.clone();
        let mut suffix = 0;
        loop {
            let candidate = if suffix == 0 {
                format!("{original}_p{pass}")
            } else {
                format!("{original}_p{pass}_{suffix}")
            };
            if seen.insert(candidate.clone()) {
                record.id = candidate;
                break;
            }
            suffix += 1;
        }
        warn!(original = %original, call_id = %record.id, "Re-keyed a tool call id repeated within the turn");
    }
}

fn surfaced_event(surfaced: Surfaced) -> ChatEvent {
    match surfaced {
        Surfaced::Reasoning(text) => ChatEvent::ReasoningStep { text },
        Surfaced::Content(text) => ChatEvent::ContentDelta { text },
    }
}

/// Surface text that was held back while a tool call was in progress.
async fn flush(buffered: Vec<Surfaced>, emitter: &EventEmitter) {
    for surfaced in buffered {
        emitter.emit(surfaced_event(surfaced)).await;
    }
}
