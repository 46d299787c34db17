//! Bounded delta queue between the ingest pump and the consumer.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::warn;

use crate::error::Result;
use crate::types::StreamDelta;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Result<StreamDelta>>,
    closed: bool,
    dropped: u64,
}

/// Single-producer, single-consumer queue with a hard capacity.
///
/// When full, the oldest-but-one entry is dropped: the head (the next delta the
/// consumer will see) and the tail (the terminal signal or error) always survive.
#[derive(Debug)]
pub struct DeltaQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl DeltaQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(2),
        }
    }

    /// Enqueue an item, truncating if the consumer has fallen behind.
    pub fn push(&self, item: Result<StreamDelta>) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.closed {
                return;
            }
            if state.items.len() >= self.capacity {
                state.items.remove(1);
                state.dropped += 1;
                if state.dropped == 1 || state.dropped % 100 == 0 {
                    warn!(
                        capacity = self.capacity,
                        dropped = state.dropped,
                        "Delta queue full; truncated oldest-but-one delta"
                    );
                }
            }
            state.items.push_back(item);
        }
        self.notify.notify_one();
    }

    /// Mark the producer side finished. Buffered items remain readable.
    pub fn close(&self) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .closed = true;
        self.notify.notify_one();
    }

    /// Wait for the next item; `None` once closed and drained.
    pub async fn pop(&self) -> Option<Result<StreamDelta>> {
        loop {
            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .items
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of deltas dropped by truncation so far.
    pub fn dropped(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).dropped
    }
}
