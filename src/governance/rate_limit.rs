//! Per-principal, per-tool fixed-window rate governor.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::KilnError;

#[derive(Debug, Clone, Copy)]
struct RateLimitWindow {
    count: u32,
    window_start: Instant,
}

#[derive(Debug)]
struct WindowTable {
    windows: HashMap<(String, String), RateLimitWindow>,
    last_sweep: Instant,
}

/// Fixed-window call quota keyed by (principal, tool).
///
/// Expired windows are swept at most once per window length, so the table
/// only holds keys seen within roughly the last two windows.
#[derive(Debug)]
pub struct RateGovernor {
    table: Mutex<WindowTable>,
    limit: u32,
    window: Duration,
}

impl RateGovernor {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            table: Mutex::new(WindowTable {
                windows: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            limit: limit.max(1),
            window,
        }
    }

    /// Check the quota and count the attempt in one step.
    pub fn try_acquire(&self, principal: &str, tool: &str) -> Result<(), KilnError> {
        let now = Instant::now();
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if now.saturating_duration_since(table.last_sweep) >= self.window {
            let before = table.windows.len();
            let window = self.window;
            table
                .windows
                .retain(|_, w| now.saturating_duration_since(w.window_start) < window);
            table.last_sweep = now;
            debug!(removed = before - table.windows.len(), "Swept expired rate windows");
        }

        let window = table
            .windows
            .entry((principal.to_string(), tool.to_string()))
            .or_insert(RateLimitWindow {
                count: 0,
                window_start: now,
            });

        if now.saturating_duration_since(window.window_start) >= self.window {
            window.count = 0;
            window.window_start = now;
        }

        if window.count >= self.limit {
            let remaining = self
                .window
                .saturating_sub(now.saturating_duration_since(window.window_start));
            debug!(principal, tool, "Rate limit reached");
            return Err(KilnError::RateLimited {
                retry_after_ms: (remaining.as_millis() as u64).max(1),
            });
        }

        window.count += 1;
        Ok(())
    }

    /// Calls counted in the current window.
    pub fn count(&self, principal: &str, tool: &str) -> u32 {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table
            .windows
            .get(&(principal.to_string(), tool.to_string()))
            .map(|w| w.count)
            .unwrap_or(0)
    }

    /// Number of (principal, tool) windows currently held.
    pub fn tracked(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_rejects() {
        let governor = RateGovernor::new(2, Duration::from_secs(60));

        assert!(governor.try_acquire("alice", "web_search").is_ok());
        assert!(governor.try_acquire("alice", "web_search").is_ok());
        let err = governor.try_acquire("alice", "web_search").unwrap_err();

        assert!(matches!(err, KilnError::RateLimited { .. }));
        assert_eq!(governor.count("alice", "web_search"), 2);
    }

    #[test]
    fn quotas_are_separate_per_principal_and_tool() {
        let governor = RateGovernor::new(1, Duration::from_secs(60));
        governor.try_acquire("alice", "web_search").unwrap();

        assert!(governor.try_acquire("bob", "web_search").is_ok());
        assert!(governor.try_acquire("alice", "generate_image").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_after_it_elapses() {
        let governor = RateGovernor::new(1, Duration::from_secs(60));
        governor.try_acquire("alice", "web_search").unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;

        let err = governor.try_acquire("alice", "web_search").unwrap_err();
        assert_eq!(err.retry_after_ms(), Some(15_000));

        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(governor.try_acquire("alice", "web_search").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_windows_are_swept() {
        let governor = RateGovernor::new(5, Duration::from_secs(60));
        for principal in ["alice", "bob", "carol"] {
            governor.try_acquire(principal, "web_search").unwrap();
        }
        assert_eq!(governor.tracked(), 3);

        tokio::time::advance(Duration::from_secs(30)).await;
        governor.try_acquire("alice", "web_search").unwrap();
        assert_eq!(governor.tracked(), 3, "no sweep within the first window");

        tokio::time::advance(Duration::from_secs(31)).await;
        governor.try_acquire("dave", "web_search").unwrap();

        assert_eq!(governor.tracked(), 1);
        assert_eq!(governor.count("alice", "web_search"), 0);
        assert_eq!(governor.count("dave", "web_search"), 1);
    }
}
