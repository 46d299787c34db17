//! Stream ingest adapter: opens (and retries) the upstream call, then pumps
//! decoded deltas into a bounded queue under chunk and call timeouts.

pub mod queue;

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::config::StreamConfig;
use crate::error::{KilnError, Result};
use crate::provider::{ModelProvider, ProviderRequest};
use crate::types::StreamDelta;
use crate::util::retry::RetryPolicy;

pub use queue::DeltaQueue;

/// Opens streaming calls against a provider.
#[derive(Clone)]
pub struct StreamIngest {
    provider: Arc<dyn ModelProvider>,
    retry: RetryPolicy,
    config: StreamConfig,
}

impl StreamIngest {
    pub fn new(provider: Arc<dyn ModelProvider>, retry: RetryPolicy, config: StreamConfig) -> Self {
        Self {
            provider,
            retry,
            config,
        }
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    /// Open a streaming pass.
    ///
    /// Transient upstream failures are retried per the retry policy before the
    /// first delta. The returned stream is lazy and finite: it ends after a
    /// terminal delta or an error. Cancelling `cancel` (or dropping the stream)
    /// closes the upstream connection.
    pub async fn open(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<DeltaStream> {
        let call_timeout = self.config.call_timeout(request.settings.wants_deep_thinking());
        let deadline = Instant::now() + call_timeout;
        let provider = self.provider.clone();

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(KilnError::Canceled),
            _ = time::sleep_until(deadline) => {
                return Err(KilnError::Timeout(call_timeout.as_millis() as u64));
            }
            result = self.retry.execute(|attempt| {
                let provider = provider.clone();
                let request = request.clone();
                async move {
                    debug!(attempt, provider = provider.provider_name(), "Opening upstream stream");
                    provider.stream_chat(&request).await
                }
            }) => result,
        };
        let upstream = opened?;

        let queue = Arc::new(DeltaQueue::new(self.config.queue_capacity));
        let pump_cancel = cancel.child_token();
        tokio::spawn(pump(
            upstream,
            queue.clone(),
            PumpLimits {
                chunk_timeout: self.config.chunk_timeout(),
                call_timeout,
                deadline,
            },
            pump_cancel.clone(),
        ));

        Ok(DeltaStream {
            queue,
            finished: false,
            _guard: pump_cancel.drop_guard(),
        })
    }
}

struct PumpLimits {
    chunk_timeout: Duration,
    call_timeout: Duration,
    deadline: Instant,
}

async fn pump(
    mut upstream: BoxStream<'static, Result<StreamDelta>>,
    queue: Arc<DeltaQueue>,
    limits: PumpLimits,
    cancel: CancellationToken,
) {
    let idle = time::sleep(limits.chunk_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                queue.push(Err(KilnError::Canceled));
                break;
            }
            _ = time::sleep_until(limits.deadline) => {
                warn!(timeout_ms = limits.call_timeout.as_millis() as u64, "Upstream call timed out");
                queue.push(Err(KilnError::Timeout(limits.call_timeout.as_millis() as u64)));
                break;
            }
            _ = idle.as_mut() => {
                warn!(
                    timeout_ms = limits.chunk_timeout.as_millis() as u64,
                    "Upstream stream idle; closing"
                );
                queue.push(Err(KilnError::Timeout(limits.chunk_timeout.as_millis() as u64)));
                break;
            }
            next = upstream.next() => {
                idle.as_mut().reset(Instant::now() + limits.chunk_timeout);
                match next {
                    Some(Ok(delta)) => {
                        let terminal = delta.is_terminal();
                        queue.push(Ok(delta));
                        if terminal {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        queue.push(Err(e));
                        break;
                    }
                    None => {
                        queue.push(Ok(StreamDelta::terminal()));
                        break;
                    }
                }
            }
        }
    }
    queue.close();
}

/// Consumer side of one streaming pass.
pub struct DeltaStream {
    queue: Arc<DeltaQueue>,
    finished: bool,
    _guard: DropGuard,
}

impl DeltaStream {
    /// Next delta; `None` after the terminal delta or an error has been yielded.
    pub async fn next(&mut self) -> Option<Result<StreamDelta>> {
        if self.finished {
            return None;
        }
        let item = self.queue.pop().await;
        match &item {
            Some(Ok(delta)) if !delta.is_terminal() => {}
            _ => self.finished = true,
        }
        item
    }

    /// Deltas dropped by queue truncation so far.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn into_stream(mut self) -> BoxStream<'static, Result<StreamDelta>> {
        Box::pin(async_stream::stream! {
            while let Some(item) = self.next().await {
                yield item;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatSettings;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        failures_left: AtomicU32,
        opens: AtomicU32,
        status: u16,
    }

    #[async_trait]
    impl ModelProvider for FlakyProvider {
        fn provider_name(&self) -> &str {
            "flaky"
        }

        fn model_id(&self) -> &str {
            "flaky-1"
        }

        async fn stream_chat(
            &self,
            _request: &ProviderRequest,
        ) -> Result<BoxStream<'static, Result<StreamDelta>>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(KilnError::Upstream {
                    status: self.status,
                    message: "nope".into(),
                    retry_after_ms: Some(10),
                });
            }
            Ok(Box::pin(futures::stream::iter(vec![
                Ok(StreamDelta::content("hi")),
                Ok(StreamDelta::terminal()),
            ])))
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl ModelProvider for HangingProvider {
        fn provider_name(&self) -> &str {
            "hanging"
        }

        fn model_id(&self) -> &str {
            "hang-1"
        }

        async fn stream_chat(
            &self,
            _request: &ProviderRequest,
        ) -> Result<BoxStream<'static, Result<StreamDelta>>> {
            Ok(Box::pin(
                futures::stream::iter(vec![Ok(StreamDelta::content("first"))])
                    .chain(futures::stream::pending()),
            ))
        }
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            messages: vec![crate::types::ModelMessage::user("hello")],
            settings: ChatSettings::default(),
            tools: None,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_open_failures_are_retried() {
        let provider = Arc::new(FlakyProvider {
            failures_left: AtomicU32::new(2),
            opens: AtomicU32::new(0),
            status: 529,
        });
        let ingest = StreamIngest::new(provider.clone(), fast_retry(), StreamConfig::default());

        let mut stream = ingest.open(request(), &CancellationToken::new()).await.unwrap();

        assert_eq!(provider.opens.load(Ordering::SeqCst), 3);
        assert_eq!(stream.next().await.unwrap().unwrap(), StreamDelta::content("hi"));
        assert!(stream.next().await.unwrap().unwrap().is_terminal());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_failure_is_not_retried() {
        let provider = Arc::new(FlakyProvider {
            failures_left: AtomicU32::new(1),
            opens: AtomicU32::new(0),
            status: 400,
        });
        let ingest = StreamIngest::new(provider.clone(), fast_retry(), StreamConfig::default());

        let err = ingest.open(request(), &CancellationToken::new()).await.err().unwrap();

        assert!(matches!(err, KilnError::Upstream { status: 400, .. }));
        assert_eq!(provider.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_closes_with_chunk_timeout() {
        let config = StreamConfig {
            chunk_timeout_ms: 1_000,
            ..StreamConfig::default()
        };
        let ingest = StreamIngest::new(Arc::new(HangingProvider), fast_retry(), config);

        let mut stream = ingest.open(request(), &CancellationToken::new()).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), StreamDelta::content("first"));
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, KilnError::Timeout(1_000)));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_the_stream_with_canceled() {
        let ingest = StreamIngest::new(Arc::new(HangingProvider), fast_retry(), StreamConfig::default());
        let cancel = CancellationToken::new();

        let mut stream = ingest.open(request(), &cancel).await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());
        cancel.cancel();

        assert!(matches!(stream.next().await, Some(Err(KilnError::Canceled))));
    }
}
