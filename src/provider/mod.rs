//! Upstream streaming completion endpoint.

pub mod http;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::KilnConfig;
use crate::error::{KilnError, Result};
use crate::types::{ChatSettings, ModelMessage, StreamDelta};

/// A request sent to a model provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub messages: Vec<ModelMessage>,
    pub settings: ChatSettings,
    /// `None` withholds tools from the model for this pass.
    pub tools: Option<Vec<ToolDefinition>>,
}

/// Tool definition sent to the provider API.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Core trait implemented by upstream model providers.
///
/// `stream_chat` opens one streaming call. Errors returned before the stream
/// starts are candidates for retry; errors yielded by the stream abort the pass.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai").
    fn provider_name(&self) -> &str;
    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Open a streaming chat call.
    async fn stream_chat(
        &self,
        request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamDelta>>>;
}

/// Create the OpenAI-compatible provider from config.
///
/// An API key is required unless a custom base URL is configured (local servers).
pub fn create_provider(config: &KilnConfig, model: &str) -> Result<Arc<dyn ModelProvider>> {
    let base_url = config.get_base_url("openai");
    let api_key = match (config.get_api_key("openai"), &base_url) {
        (Some(key), _) => key,
        (None, Some(_)) => String::new(),
        (None, None) => {
            return Err(KilnError::Configuration(
                "Missing OPENAI_API_KEY (or KILN_API_KEY)".into(),
            ))
        }
    };
    Ok(Arc::new(openai::OpenAiProvider::new(
        model.to_string(),
        api_key,
        base_url,
    )))
}
