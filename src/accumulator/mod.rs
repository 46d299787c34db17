//! Tool-call accumulator: assembles streamed fragments into complete call records.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::ValidationLayer;
use crate::types::{FinishReason, StreamDelta, ToolCallFragment, ToolCallRecord, ValidationViolation};

/// Pass-level state of the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    Idle,
    StreamingReasoning,
    StreamingContent,
    ToolCallDetected,
}

/// Text to surface to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Surfaced {
    Reasoning(String),
    Content(String),
}

/// What one completed pass produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassOutput {
    /// All answer text of the pass, forwarded or buffered.
    pub text: String,
    /// Finalized calls, in finalization order.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Text held back because a tool call was in progress.
    pub buffered: Vec<Surfaced>,
    pub finish_reason: Option<FinishReason>,
}

/// State machine over one streaming pass.
///
/// Records are keyed strictly on call id; fragments of several calls may
/// interleave. A record is finalized by its close marker or by the terminal
/// delta, and finalized records ignore further fragments.
#[derive(Debug)]
pub struct ToolCallAccumulator {
    state: AccumulatorState,
    records: Vec<ToolCallRecord>,
    by_id: HashMap<String, usize>,
    finalized_order: Vec<usize>,
    buffered: Vec<Surfaced>,
    text: String,
    terminal: bool,
    finish_reason: Option<FinishReason>,
}

impl Default for ToolCallAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self {
            state: AccumulatorState::Idle,
            records: Vec::new(),
            by_id: HashMap::new(),
            finalized_order: Vec::new(),
            buffered: Vec::new(),
            text: String::new(),
            terminal: false,
            finish_reason: None,
        }
    }

    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    /// A tool call has been seen in this pass.
    pub fn tool_call_in_progress(&self) -> bool {
        self.state == AccumulatorState::ToolCallDetected
    }

    /// Terminal seen and every record finalized.
    pub fn is_complete(&self) -> bool {
        self.terminal && self.records.iter().all(|r| r.finalized)
    }

    pub fn record(&self, id: &str) -> Option<&ToolCallRecord> {
        self.by_id.get(id).map(|&i| &self.records[i])
    }

    /// Apply one delta. Returns text to forward to the client right away.
    pub fn apply(&mut self, delta: StreamDelta) -> Option<Surfaced> {
        if self.terminal {
            debug!("Ignoring delta after terminal");
            return None;
        }
        match delta {
            StreamDelta::Reasoning { text } => {
                if self.tool_call_in_progress() {
                    self.buffered.push(Surfaced::Reasoning(text));
                    return None;
                }
                self.state = AccumulatorState::StreamingReasoning;
                Some(Surfaced::Reasoning(text))
            }
            StreamDelta::Content { text } => {
                self.text.push_str(&text);
                if self.tool_call_in_progress() {
                    self.buffered.push(Surfaced::Content(text));
                    return None;
                }
                self.state = AccumulatorState::StreamingContent;
                Some(Surfaced::Content(text))
            }
            StreamDelta::ToolCallFragment(fragment) => {
                self.state = AccumulatorState::ToolCallDetected;
                self.apply_fragment(fragment);
                None
            }
            StreamDelta::Terminal { finish_reason } => {
                self.terminal = true;
                self.finish_reason = finish_reason;
                for i in 0..self.records.len() {
                    self.finalize(i);
                }
                None
            }
        }
    }

    fn apply_fragment(&mut self, fragment: ToolCallFragment) {
        let index = match self.by_id.get(&fragment.id) {
            Some(&i) => i,
            None => {
                let i = self.records.len();
                self.by_id.insert(fragment.id.clone(), i);
                self.records.push(ToolCallRecord::new(fragment.id.clone()));
                i
            }
        };
        let record = &mut self.records[index];
        if record.finalized {
            warn!(call_id = %fragment.id, "Dropping fragment for finalized tool call");
            return;
        }
        if let Some(name) = fragment.name_fragment {
            record.name.push_str(&name);
        }
        record.args_buffer.push_str(&fragment.args_fragment);
        if fragment.closes {
            self.finalize(index);
        }
    }

    fn finalize(&mut self, index: usize) {
        let record = &mut self.records[index];
        if !record.finalized {
            record.finalized = true;
            self.finalized_order.push(index);
        }
    }

    /// Discard unfinalized records (turn deadline hit) as synthetic violations.
    pub fn abandon(&mut self) -> Vec<(ToolCallRecord, ValidationViolation)> {
        let mut abandoned = Vec::new();
        for record in &self.records {
            if !record.finalized {
                abandoned.push((
                    record.clone(),
                    ValidationViolation::new(
                        ValidationLayer::Accumulation,
                        "tool call was not completed before the turn deadline",
                    ),
                ));
            }
        }
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "Abandoning unfinalized tool calls");
        }
        let finalized: Vec<ToolCallRecord> = self
            .finalized_order
            .iter()
            .map(|&i| self.records[i].clone())
            .collect();
        self.by_id = finalized
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        self.finalized_order = (0..finalized.len()).collect();
        self.records = finalized;
        abandoned
    }

    /// Consume the accumulator after the pass ends.
    pub fn finish(self) -> PassOutput {
        let mut records: Vec<Option<ToolCallRecord>> = self.records.into_iter().map(Some).collect();
        let tool_calls = self
            .finalized_order
            .iter()
            .filter_map(|&i| records[i].take())
            .collect();
        PassOutput {
            text: self.text,
            tool_calls,
            buffered: self.buffered,
            finish_reason: self.finish_reason,
        }
    }
}
