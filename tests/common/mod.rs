//! Shared test helpers and scripted provider.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use kiln::config::{GovernanceConfig, StreamConfig};
use kiln::engine::Engine;
use kiln::error::{KilnError, Result};
use kiln::gateway::ValidationGateway;
use kiln::governance::Governance;
use kiln::ingest::StreamIngest;
use kiln::output::EventEnvelope;
use kiln::provider::{ModelProvider, ProviderRequest};
use kiln::tools::image::GeneratedImage;
use kiln::tools::{
    ArtifactGenerator, ArtifactRequest, ImageGenerator, ObjectStore, SearchHit, SearchService, ToolRegistry,
};
use kiln::types::{StreamDelta, ToolCallFragment};
use kiln::util::retry::RetryPolicy;

/// One scripted answer to `stream_chat`.
pub enum Script {
    Deltas(Vec<StreamDelta>),
    Fail(KilnError),
}

/// Provider that replays queued scripts, one per call, and records what it
/// was asked.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, deltas: Vec<StreamDelta>) -> &Self {
        self.scripts.lock().unwrap().push_back(Script::Deltas(deltas));
        self
    }

    pub fn push_error(&self, error: KilnError) -> &Self {
        self.scripts.lock().unwrap().push_back(Script::Fail(error));
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-1"
    }

    async fn stream_chat(
        &self,
        request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamDelta>>> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::Deltas(text_reply("(no script)")));
        match script {
            Script::Deltas(deltas) => Ok(futures::stream::iter(deltas.into_iter().map(Ok)).boxed()),
            Script::Fail(error) => Err(error),
        }
    }
}

/// Provider that streams its deltas once and then stalls without closing.
pub struct StallingProvider {
    deltas: Vec<StreamDelta>,
    calls: Mutex<usize>,
}

impl StallingProvider {
    pub fn new(deltas: Vec<StreamDelta>) -> Arc<Self> {
        Arc::new(Self {
            deltas,
            calls: Mutex::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ModelProvider for StallingProvider {
    fn provider_name(&self) -> &str {
        "stalling"
    }

    fn model_id(&self) -> &str {
        "stalling-1"
    }

    async fn stream_chat(
        &self,
        _request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamDelta>>> {
        *self.calls.lock().unwrap() += 1;
        let deltas = futures::stream::iter(self.deltas.clone().into_iter().map(Ok));
        Ok(deltas.chain(futures::stream::pending()).boxed())
    }
}

/// A plain text answer followed by the terminal delta.
pub fn text_reply(text: &str) -> Vec<StreamDelta> {
    vec![StreamDelta::content(text), StreamDelta::terminal()]
}

/// One tool call streamed as a name fragment plus two argument halves.
pub fn tool_call(id: &str, name: &str, args: &serde_json::Value) -> Vec<StreamDelta> {
    let raw = args.to_string();
    let (head, tail) = raw.split_at(raw.len() / 2);
    vec![
        ToolCallFragment::new(id, head).with_name(name).into(),
        ToolCallFragment::new(id, tail).closing().into(),
    ]
}

pub fn retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        multiplier: 2.0,
    }
}

pub fn ingest(provider: Arc<dyn ModelProvider>) -> StreamIngest {
    StreamIngest::new(provider, retry_policy(), StreamConfig::default())
}

pub fn engine(provider: Arc<dyn ModelProvider>, governance: Arc<Governance>, tools: ToolRegistry) -> Engine {
    Engine::new(
        ingest(provider),
        ValidationGateway::new(governance),
        tools,
        StreamConfig::default(),
    )
}

pub fn governance() -> Arc<Governance> {
    Governance::shared(GovernanceConfig::default())
}

/// Drain a turn's event stream.
pub async fn collect(mut events: impl futures::Stream<Item = EventEnvelope> + Unpin) -> Vec<EventEnvelope> {
    let mut out = Vec::new();
    while let Some(event) = events.next().await {
        out.push(event);
    }
    out
}

pub fn event_types(events: &[EventEnvelope]) -> Vec<&'static str> {
    events.iter().map(|e| e.event.event_type()).collect()
}

/// Object store whose every write fails.
pub struct FailingStore;

#[async_trait]
impl ObjectStore for FailingStore {
    async fn put(&self, key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        Err(KilnError::Io(std::io::Error::other(format!("bucket unavailable for {key}"))))
    }

    async fn signed_url(&self, _key: &str, _ttl: Duration) -> Result<String> {
        Err(KilnError::Unknown("signing unavailable".into()))
    }
}

/// Artifact generator returning canned source.
pub struct CannedArtifact(pub String);

#[async_trait]
impl ArtifactGenerator for CannedArtifact {
    async fn generate(&self, _request: &ArtifactRequest, _cancel: &CancellationToken) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Search service with fixed hits that counts its calls.
#[derive(Default)]
pub struct FixedSearch {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl SearchService for FixedSearch {
    fn provider_name(&self) -> &str {
        "fixed"
    }

    async fn search(&self, query: &str, max_results: u32, _cancel: &CancellationToken) -> Result<Vec<SearchHit>> {
        self.calls.lock().unwrap().push(query.to_string());
        Ok((0..max_results.min(2))
            .map(|i| SearchHit {
                title: format!("{query} #{i}"),
                url: format!("https://example.com/{i}"),
                snippet: "snippet".into(),
            })
            .collect())
    }
}

/// Search service that always fails.
pub struct BrokenSearch;

#[async_trait]
impl SearchService for BrokenSearch {
    fn provider_name(&self) -> &str {
        "broken"
    }

    async fn search(&self, _query: &str, _max_results: u32, _cancel: &CancellationToken) -> Result<Vec<SearchHit>> {
        Err(KilnError::upstream(502, "search backend down"))
    }
}

/// Image generator returning a tiny PNG payload.
pub struct FixedImage;

#[async_trait]
impl ImageGenerator for FixedImage {
    async fn generate(&self, _prompt: &str, _size: &str, _cancel: &CancellationToken) -> Result<GeneratedImage> {
        Ok(GeneratedImage {
            bytes: vec![0x89, b'P', b'N', b'G'],
            mime_type: "image/png".into(),
        })
    }
}
