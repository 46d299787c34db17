//! OpenAI-compatible Chat Completions streaming provider.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{KilnError, Result};
use crate::types::*;

use super::http::{bearer_headers, error_from_response, parse_sse_data, shared_client, SseData};
use super::{ModelProvider, ProviderRequest};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    model: String,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Self {
        Self {
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model,
            api_key,
        }
    }

    pub(crate) fn build_request_body(&self, request: &ProviderRequest) -> serde_json::Value {
        let messages = request
            .messages
            .iter()
            .map(message_to_openai)
            .collect::<Vec<_>>();

        let model = request
            .settings
            .model
            .clone()
            .unwrap_or_else(|| self.model.clone());
        let mut obj = serde_json::Map::new();
        obj.insert("model".into(), model.into());
        obj.insert("messages".into(), messages.into());
        obj.insert("stream".into(), true.into());

        if let Some(max) = request.settings.max_tokens {
            obj.insert("max_tokens".into(), max.into());
        }
        if let Some(temp) = request.settings.temperature {
            obj.insert("temperature".into(), temp.into());
        }
        if let Some(top_p) = request.settings.top_p {
            obj.insert("top_p".into(), top_p.into());
        }
        if let Some(effort) = request.settings.reasoning_effort {
            obj.insert("reasoning_effort".into(), effort.to_string().into());
        }
        if let Some(ref user) = request.settings.user {
            obj.insert("user".into(), user.clone().into());
        }

        if let Some(ref tools) = request.tools {
            if !tools.is_empty() {
                let tool_defs: Vec<serde_json::Value> = tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect();
                obj.insert("tools".into(), tool_defs.into());
            }
        }

        serde_json::Value::Object(obj)
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn stream_chat(
        &self,
        request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamDelta>>> {
        let body = self.build_request_body(request);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %self.model, "OpenAI stream_chat");

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let byte_stream = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            futures::pin_mut!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(KilnError::Network(e));
                        return;
                    }
                };
                for item in decoder.push(&chunk) {
                    let stop = item.is_err();
                    yield item;
                    if stop {
                        return;
                    }
                }
                if decoder.is_finished() {
                    return;
                }
            }
            for item in decoder.finish() {
                yield item;
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Incremental decoder from OpenAI-style SSE bytes to [`StreamDelta`]s.
///
/// Tool-call fragments arrive keyed by `index` and carry the `id` only on the
/// first fragment; the decoder maps index to id so every emitted fragment is
/// keyed strictly on id. Calls that arrive without an id get a generated one
/// that is unique across decoders.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    index_to_id: HashMap<u32, String>,
    finish_reason: Option<FinishReason>,
    finished: bool,
}

impl SseDecoder {
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed raw bytes; returns every delta completed by complete lines.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamDelta>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            self.decode_line(line.trim(), &mut out);
            if self.finished {
                break;
            }
        }
        out
    }

    /// Flush at end of body. A clean close without `[DONE]` still terminates.
    pub fn finish(&mut self) -> Vec<Result<StreamDelta>> {
        let mut out = Vec::new();
        if !self.finished && !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.decode_line(line.trim(), &mut out);
        }
        if !self.finished {
            self.finished = true;
            out.push(Ok(StreamDelta::Terminal {
                finish_reason: self.finish_reason,
            }));
        }
        out
    }

    fn decode_line(&mut self, line: &str, out: &mut Vec<Result<StreamDelta>>) {
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let data = match parse_sse_data(line) {
            Some(SseData::Json(data)) => data,
            Some(SseData::Done) => {
                self.finished = true;
                out.push(Ok(StreamDelta::Terminal {
                    finish_reason: self.finish_reason,
                }));
                return;
            }
            None => return,
        };

        let chunk = match serde_json::from_str::<OpenAiStreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(error = %e, "Skipping unparseable stream chunk");
                return;
            }
        };

        if let Some(error) = chunk.error {
            self.finished = true;
            let status = if error.error_type.as_deref() == Some("overloaded_error") {
                529
            } else {
                500
            };
            out.push(Err(KilnError::upstream(
                status,
                error
                    .message
                    .unwrap_or_else(|| "upstream stream error".to_string()),
            )));
            return;
        }

        for choice in chunk.choices {
            let delta = choice.delta;
            if let Some(text) = delta.reasoning_content.or(delta.reasoning) {
                if !text.is_empty() {
                    out.push(Ok(StreamDelta::reasoning(text)));
                }
            }
            if let Some(text) = delta.content {
                if !text.is_empty() {
                    out.push(Ok(StreamDelta::content(text)));
                }
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let id = match call.id {
                    Some(id) if !id.is_empty() => {
                        self.index_to_id.insert(call.index, id.clone());
                        id
                    }
                    _ => self
                        .index_to_id
                        .entry(call.index)
                        .or_insert_with(|| format!("call_{}_{}", call.index, Uuid::new_v4().simple()))
                        .clone(),
                };
                let function = call.function.unwrap_or_default();
                out.push(Ok(StreamDelta::ToolCallFragment(ToolCallFragment {
                    id,
                    name_fragment: function.name.filter(|n| !n.is_empty()),
                    args_fragment: function.arguments.unwrap_or_default(),
                    closes: false,
                })));
            }
            if let Some(reason) = choice.finish_reason.as_deref() {
                self.finish_reason = parse_finish_reason(reason);
            }
        }
    }
}

fn parse_finish_reason(s: &str) -> Option<FinishReason> {
    match s {
        "stop" => Some(FinishReason::Stop),
        "length" => Some(FinishReason::Length),
        "tool_calls" | "function_call" => Some(FinishReason::ToolCalls),
        "content_filter" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

fn message_to_openai(msg: &ModelMessage) -> serde_json::Value {
    let role = msg.role.to_string();

    if let Some(envelope) = msg.tool_result_envelope() {
        let content = serde_json::to_string(envelope).unwrap_or_default();
        return serde_json::json!({
            "role": "tool",
            "tool_call_id": envelope.tool_call_id,
            "content": content,
        });
    }

    let tool_calls = msg.tool_calls();
    if !tool_calls.is_empty() {
        let tc_json: Vec<serde_json::Value> = tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments.to_string(),
                    }
                })
            })
            .collect();
        let text = msg.text_content();
        return serde_json::json!({
            "role": role,
            "content": if text.is_empty() { serde_json::Value::Null } else { serde_json::Value::String(text) },
            "tool_calls": tc_json,
        });
    }

    serde_json::json!({ "role": role, "content": msg.text_content() })
}

// OpenAI API stream types (internal)

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    error: Option<OpenAiStreamError>,
}

#[derive(Deserialize)]
struct OpenAiStreamError {
    message: Option<String>,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAiStreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    reasoning: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Deserialize)]
struct OpenAiToolCallDelta {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Deserialize, Default)]
struct OpenAiFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}
