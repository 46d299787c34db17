//! CLI entry point for kiln.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::config::KilnConfig;
use crate::engine::{ChatRequest, Engine};
use crate::error::Result;
use crate::gateway::ValidationGateway;
use crate::governance::Governance;
use crate::ingest::StreamIngest;
use crate::provider::create_provider;
use crate::tools::{
    ArtifactTool, HttpSearchService, ImageTool, ModelArtifactGenerator, OpenAiImageGenerator,
    ToolRegistry, WebSearchTool,
};
use crate::types::{ChatSettings, ModelMessage, ReasoningEffort};

const DEFAULT_SEARCH_URL: &str = "https://api.tavily.com/search";

/// Kiln CLI
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Kiln: tool-calling streaming chat engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one chat turn and print its events as NDJSON
    Chat(ChatArgs),
}

/// Arguments for the `chat` subcommand.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// User prompt
    pub prompt: String,

    /// Model id sent to the OpenAI-compatible endpoint
    #[arg(short, long, default_value = "gpt-4o-mini")]
    pub model: String,

    /// Override the endpoint base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Caller identity used for rate quotas
    #[arg(long, default_value = "cli")]
    pub principal: String,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Request deeper reasoning (longer call timeout)
    #[arg(long)]
    pub thinking: bool,
}

/// Build an engine with every tool the configuration supports.
pub fn build_engine(config: &KilnConfig, model: &str) -> Result<Engine> {
    let provider = create_provider(config, model)?;
    let ingest = StreamIngest::new(provider, config.retry.to_policy(), config.stream.clone());
    let gateway = ValidationGateway::new(Governance::shared(config.governance.clone()));

    let generator = ModelArtifactGenerator::new(ingest.clone(), ChatSettings::default());
    let mut tools = ToolRegistry::new().with(Arc::new(ArtifactTool::new(Arc::new(generator), None)));
    if let Some(key) = config.get_api_key("openai") {
        let images = OpenAiImageGenerator::new("gpt-image-1", key, config.get_base_url("openai"));
        tools.register(Arc::new(ImageTool::new(Arc::new(images), None)));
    }
    if let Some(key) = config.get_api_key("search") {
        let endpoint = config
            .get_base_url("search")
            .unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string());
        tools.register(Arc::new(WebSearchTool::new(Arc::new(HttpSearchService::new(endpoint, key)))));
    }

    Ok(Engine::new(ingest, gateway, tools, config.stream.clone()))
}

/// Run `kiln chat`, writing one event per line to stdout. Ctrl-C cancels the turn.
pub async fn handle_chat(args: ChatArgs) -> Result<()> {
    let config = KilnConfig::load()?;
    if let Some(url) = args.base_url {
        config.set_base_url("openai", url);
    }
    let engine = build_engine(&config, &args.model)?;

    let mut messages = Vec::new();
    if let Some(system) = args.system {
        messages.push(ModelMessage::system(system));
    }
    messages.push(ModelMessage::user(args.prompt));
    let mut settings = ChatSettings::builder().model(args.model).build();
    if args.thinking {
        settings.reasoning_effort = Some(ReasoningEffort::High);
    }
    let request = ChatRequest::new(args.principal, messages).with_settings(settings);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut events = engine.start(request, cancel);
    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.next().await {
        stdout.write_all(event.to_line()?.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}
