//! Image generation executor.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::storage::{content_key, persist, ObjectStore};
use super::tool::{parse_args, ToolExecutionContext, ToolExecutor};
use super::types::{Deliverable, ImageDeliverable, SideEffect, ToolExecutionResult, ToolParameters};
use crate::error::{KilnError, Result};
use crate::provider::http::{bearer_headers, error_from_response, shared_client};

pub const IMAGE_SIZES: &[&str] = &["256x256", "512x512", "1024x1024"];

/// Raw generated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl GeneratedImage {
    fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/svg+xml" => "svg",
            _ => "png",
        }
    }

    fn data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// Image model collaborator.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        size: &str,
        cancel: &CancellationToken,
    ) -> Result<GeneratedImage>;
}

/// OpenAI-compatible `/images/generations` client returning base64 JSON.
pub struct OpenAiImageGenerator {
    model: String,
    api_key: String,
    base_url: String,
}

impl OpenAiImageGenerator {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        }
    }
}

#[derive(Deserialize)]
struct ImagesResponse {
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate(
        &self,
        prompt: &str,
        size: &str,
        cancel: &CancellationToken,
    ) -> Result<GeneratedImage> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "size": size,
            "n": 1,
            "response_format": "b64_json",
        });
        let request = shared_client()
            .post(format!("{}/images/generations", self.base_url))
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(KilnError::Canceled),
            resp = request => resp?,
        };
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        let data: ImagesResponse = resp.json().await?;
        let encoded = data
            .data
            .into_iter()
            .find_map(|d| d.b64_json)
            .ok_or_else(|| KilnError::upstream(200, "image response contained no data"))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| KilnError::upstream(200, format!("invalid image payload: {e}")))?;
        Ok(GeneratedImage {
            bytes,
            mime_type: "image/png".to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ImageArgs {
    prompt: String,
    #[serde(default)]
    size: Option<String>,
}

/// `generate_image` executor.
pub struct ImageTool {
    generator: Arc<dyn ImageGenerator>,
    store: Option<Arc<dyn ObjectStore>>,
    parameters: ToolParameters,
}

impl ImageTool {
    pub const NAME: &'static str = "generate_image";

    pub fn new(generator: Arc<dyn ImageGenerator>, store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self {
            generator,
            store,
            parameters: ToolParameters::object()
                .bounded_string("prompt", "Description of the image to generate", 1, 4_000, true)
                .string_enum("size", "Output size", IMAGE_SIZES, false)
                .build(),
        }
    }
}

#[async_trait]
impl ToolExecutor for ImageTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Generate an image from a text prompt"
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &serde_json::Value,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolExecutionResult> {
        let args: ImageArgs = parse_args(args)?;
        let size = args.size.as_deref().unwrap_or("1024x1024");
        let image = self.generator.generate(&args.prompt, size, &ctx.cancel).await?;
        let image_id = uuid::Uuid::new_v4().to_string();
        let key = content_key("images", image.extension(), &image.bytes);

        let stored = match &self.store {
            Some(store) => {
                match persist(store.as_ref(), &key, image.bytes.clone(), &image.mime_type).await {
                    Ok(stored) => Some(stored),
                    Err(e) => {
                        warn!(call_id = %ctx.call_id, error = %e, "Image storage failed; inlining");
                        None
                    }
                }
            }
            None => None,
        };

        let (url, side_effect) = match stored {
            Some(stored) => (
                stored.url.clone(),
                SideEffect::ObjectStored {
                    key: stored.key,
                    url: stored.url,
                },
            ),
            None => (image.data_uri(), SideEffect::StorageFailed { key }),
        };
        debug!(call_id = %ctx.call_id, image_id = %image_id, "Image generated");

        let payload = serde_json::json!({
            "image_id": image_id,
            "prompt": args.prompt,
            "stored": matches!(side_effect, SideEffect::ObjectStored { .. }),
        });
        Ok(ToolExecutionResult::success(payload)
            .with_side_effect(side_effect)
            .with_deliverable(Deliverable::Image(ImageDeliverable {
                image_id,
                prompt: args.prompt,
                url,
                mime_type: image.mime_type,
            })))
    }
}
