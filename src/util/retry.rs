//! Retry with exponential backoff, jitter and server-supplied wait hints.

use std::future::Future;
use std::time::Duration;

use crate::error::KilnError;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(32),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Computed (jittered, capped) backoff before attempt `attempt + 1`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        // Jitter: 75%–125% of backoff
        let jitter_factor = 0.75 + (rand_factor() * 0.5);
        let jittered = (base * jitter_factor).min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Delay actually slept: a server hint wins over a shorter computed backoff.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let computed = self.backoff_for(attempt);
        match hint {
            Some(hint) if hint > computed => hint,
            _ => computed,
        }
    }

    /// Execute an async operation, retrying transient upstream failures only.
    ///
    /// Each attempt is an explicit `Result`; the loop is a plain iteration over
    /// attempt numbers. Non-transient errors are returned immediately.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, KilnError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, KilnError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_transient_upstream() || attempt + 1 >= max_attempts {
                return Err(error);
            }

            let hint = error.retry_after_ms().map(Duration::from_millis);
            let delay = self.delay_for(attempt, hint);
            tracing::warn!(
                attempt = attempt + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying upstream call after transient error"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Simple pseudo-random factor [0, 1) without pulling in rand crate.
fn rand_factor() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);

    let hash = hasher.finish();
    (hash % 10000) as f64 / 10000.0
}
