//! Per-tool circuit breaker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::KilnError;

/// Retry hint handed to callers rejected while a half-open trial is in flight.
const TRIAL_IN_FLIGHT_RETRY_MS: u64 = 1_000;

/// Breaker status for one tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    status: BreakerStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            status: BreakerStatus::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    /// Open → HalfOpen once the cooldown has elapsed.
    fn refresh(&mut self, cooldown: Duration, now: Instant) {
        if self.status == BreakerStatus::Open {
            let elapsed = self
                .opened_at
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or(cooldown);
            if elapsed >= cooldown {
                self.status = BreakerStatus::HalfOpen;
                self.trial_in_flight = false;
            }
        }
    }

    fn open(&mut self, now: Instant) {
        self.status = BreakerStatus::Open;
        self.opened_at = Some(now);
        self.trial_in_flight = false;
    }
}

/// Process-wide breaker state, one entry per tool name.
///
/// Each tool's state sits behind its own mutex; the outer map lock is held
/// only to look up or insert an entry.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<Mutex<BreakerState>>>>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    fn entry(&self, tool: &str) -> Arc<Mutex<BreakerState>> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        breakers
            .entry(tool.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BreakerState::new())))
            .clone()
    }

    /// Current status, applying the cooldown transition.
    pub fn status(&self, tool: &str) -> BreakerStatus {
        let entry = self.entry(tool);
        let mut state = entry.lock().unwrap_or_else(|e| e.into_inner());
        state.refresh(self.cooldown, Instant::now());
        state.status
    }

    pub fn consecutive_failures(&self, tool: &str) -> u32 {
        let entry = self.entry(tool);
        let state = entry.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_failures
    }

    /// Ask to execute `tool`.
    ///
    /// Open rejects with the remaining cooldown as the retry hint. HalfOpen admits
    /// exactly one trial; others are rejected until the trial resolves.
    pub fn admit(&self, tool: &str) -> Result<BreakerPermit, KilnError> {
        let entry = self.entry(tool);
        let now = Instant::now();
        let trial = {
            let mut state = entry.lock().unwrap_or_else(|e| e.into_inner());
            state.refresh(self.cooldown, now);
            match state.status {
                BreakerStatus::Closed => false,
                BreakerStatus::Open => {
                    let remaining = state
                        .opened_at
                        .map(|at| self.cooldown.saturating_sub(now.saturating_duration_since(at)))
                        .unwrap_or(self.cooldown);
                    return Err(KilnError::CircuitOpen {
                        tool: tool.to_string(),
                        retry_after_ms: (remaining.as_millis() as u64).max(1),
                    });
                }
                BreakerStatus::HalfOpen => {
                    if state.trial_in_flight {
                        return Err(KilnError::CircuitOpen {
                            tool: tool.to_string(),
                            retry_after_ms: TRIAL_IN_FLIGHT_RETRY_MS,
                        });
                    }
                    state.trial_in_flight = true;
                    info!(tool, "Circuit half-open; admitting trial call");
                    true
                }
            }
        };
        Ok(BreakerPermit {
            state: entry,
            tool: tool.to_string(),
            failure_threshold: self.failure_threshold,
            trial,
            resolved: false,
        })
    }
}

/// Admission ticket for one execution.
///
/// Resolve it with [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). Dropping an unresolved trial
/// permit re-arms the half-open slot without counting a failure.
#[derive(Debug)]
pub struct BreakerPermit {
    state: Arc<Mutex<BreakerState>>,
    tool: String,
    failure_threshold: u32,
    trial: bool,
    resolved: bool,
}

impl BreakerPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn record_success(mut self) {
        self.resolved = true;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_failures = 0;
        if self.trial {
            state.status = BreakerStatus::Closed;
            state.opened_at = None;
            state.trial_in_flight = false;
            info!(tool = %self.tool, "Circuit closed after successful trial");
        }
    }

    pub fn record_failure(mut self) {
        self.resolved = true;
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if self.trial {
            state.open(now);
            warn!(tool = %self.tool, "Trial call failed; circuit re-opened");
        } else if state.status == BreakerStatus::Closed
            && state.consecutive_failures >= self.failure_threshold
        {
            state.open(now);
            warn!(
                tool = %self.tool,
                failures = state.consecutive_failures,
                "Circuit opened"
            );
        }
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if self.trial && !self.resolved {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.status == BreakerStatus::HalfOpen {
                state.trial_in_flight = false;
            }
        }
    }
}
