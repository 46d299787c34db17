//! Kiln: a tool-calling streaming chat engine.
//!
//! Kiln turns an upstream model's token stream into a sequenced cycle of
//! stream, detect tool calls, validate, execute, re-inject results and resume.
//! Tool calls pass a fixed-order validation gateway backed by shared circuit
//! breakers and rate quotas, and generated artifact bundles go through an
//! ordered post-processing pipeline before they reach the client.
//!
//! # Quick Start
//!
//! ```no_run
//! use kiln::prelude::*;
//! use futures::StreamExt;
//!
//! # async fn example() -> kiln::error::Result<()> {
//! let config = KilnConfig::load()?;
//! let provider = kiln::provider::create_provider(&config, "gpt-4o-mini")?;
//! let ingest = StreamIngest::new(provider, config.retry.to_policy(), config.stream.clone());
//! let gateway = ValidationGateway::new(Governance::shared(config.governance.clone()));
//! let engine = Engine::new(ingest, gateway, ToolRegistry::new(), config.stream.clone());
//!
//! let request = ChatRequest::new("alice", vec![ModelMessage::user("Hello!")]);
//! let mut events = engine.start(request, CancellationToken::new());
//! while let Some(event) = events.next().await {
//!     print!("{}", event.to_line()?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod accumulator;
pub mod artifact;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod governance;
pub mod ingest;
pub mod output;
pub mod prelude;
pub mod provider;
pub mod tools;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
