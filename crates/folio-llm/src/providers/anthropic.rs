use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use folio_core::config::ModelConfig;
use folio_core::error::{FolioError, Result};
use folio_core::traits::{LlmClient, StreamListener};
use folio_core::types::*;

use crate::streaming::{collect_text, SseEvent, SseStream};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: Client,
    config: ModelConfig,
}

impl AnthropicClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<serde_json::Value>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum SseData {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: DeltaInfo },
    #[serde(rename = "message_delta")]
    MessageDelta { usage: Option<UsageInfo> },
    #[serde(rename = "error")]
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum DeltaInfo {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct UsageInfo {
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

/// Split out the system prompt; Anthropic takes it as a top-level field.
///
/// When `cacheable`, the system prompt is sent as a text block carrying an
/// ephemeral `cache_control` marker.
fn convert_messages(messages: Vec<ChatMessage>, cacheable: bool) -> (Option<serde_json::Value>, Vec<ApiMessage>) {
    let mut system_parts = Vec::new();
    let mut api_msgs = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(msg.content),
            Role::User => api_msgs.push(ApiMessage {
                role: "user",
                content: msg.content,
            }),
            Role::Assistant => api_msgs.push(ApiMessage {
                role: "assistant",
                content: msg.content,
            }),
        }
    }

    let system = (!system_parts.is_empty()).then(|| {
        let text = system_parts.join("\n\n");
        if cacheable {
            json!([{
                "type": "text",
                "text": text,
                "cache_control": {"type": "ephemeral"},
            }])
        } else {
            serde_json::Value::String(text)
        }
    });

    (system, api_msgs)
}

/// Text carried by one event, if any.
fn parse_sse_to_text(event: SseEvent) -> Option<Result<String>> {
    if event.data.trim() == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<SseData>(&event.data) {
        Ok(SseData::ContentBlockDelta {
            delta: DeltaInfo::TextDelta { text },
        }) => Some(Ok(text)),
        Ok(SseData::MessageDelta { usage: Some(usage) }) => {
            debug!(output_tokens = usage.output_tokens, "Token usage");
            None
        }
        Ok(SseData::Error { error }) => Some(Err(FolioError::Llm(error.message))),
        Ok(_) => None,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse SSE data");
            None
        }
    }
}

impl LlmClient for AnthropicClient {
    fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        cacheable: bool,
        listener: Option<Arc<dyn StreamListener>>,
    ) -> BoxFuture<'_, Result<String>> {
        let tools = tools.to_vec();

        Box::pin(async move {
            let config = &self.config;
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| FolioError::Config("Anthropic API key not set".into()))?;
            let base_url = config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);

            let (system, api_messages) = convert_messages(messages, cacheable);
            let body = AnthropicRequest {
                model: config.model_id.clone(),
                max_tokens: config.max_tokens,
                temperature: (config.temperature > 0.0).then_some(config.temperature),
                messages: api_messages,
                system,
                stream: true,
                tools: tools
                    .into_iter()
                    .map(|t| ApiTool {
                        name: t.name,
                        description: t.description,
                        input_schema: t.input_schema,
                    })
                    .collect(),
            };

            let mut req = self
                .http
                .post(base_url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body);
            for (k, v) in &config.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .send()
                .await
                .map_err(|e| FolioError::Llm(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".to_string());
                return Err(FolioError::Llm(format!("HTTP {}: {}", status, body)));
            }

            let deltas = SseStream::new(response.bytes_stream()).filter_map(|event| async move {
                match event {
                    Ok(event) => parse_sse_to_text(event),
                    Err(e) => Some(Err(e)),
                }
            });
            collect_text(Box::pin(deltas), listener).await
        })
    }
}
