use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use folio_core::config::ModelConfig;
use folio_core::error::{FolioError, Result};
use folio_core::traits::{LlmClient, StreamListener};
use folio_core::types::*;

use crate::streaming::{collect_text, SseEvent, SseStream};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
    config: ModelConfig,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct OaiTool {
    r#type: &'static str,
    function: OaiToolDef,
}

#[derive(Serialize)]
struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDeltaContent>,
}

#[derive(Deserialize, Debug)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function",
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    messages
        .into_iter()
        .map(|msg| OaiMessage {
            role: match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: msg.content,
        })
        .collect()
}

/// Text carried by one chunk, if any.
fn parse_chunk(event: SseEvent) -> Option<Result<String>> {
    if event.data.trim() == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<StreamChunk>(&event.data) {
        Ok(chunk) => {
            if let Some(usage) = chunk.usage {
                debug!(
                    input_tokens = usage.prompt_tokens,
                    output_tokens = usage.completion_tokens,
                    "Token usage"
                );
            }
            chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta)
                .and_then(|d| d.content)
                .filter(|text| !text.is_empty())
                .map(Ok)
        }
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse OpenAI SSE chunk");
            None
        }
    }
}

impl LlmClient for OpenAiClient {
    fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        cacheable: bool,
        listener: Option<Arc<dyn StreamListener>>,
    ) -> BoxFuture<'_, Result<String>> {
        let oai_tools = convert_tools(tools);

        Box::pin(async move {
            let config = &self.config;
            let base_url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);
            if cacheable {
                // OpenAI-compatible servers cache stable prefixes on their own
                debug!(model = %config.model_id, "Cacheable prompt");
            }

            let body = ChatRequest {
                model: config.model_id.clone(),
                messages: convert_messages(messages),
                max_tokens: config.max_tokens,
                temperature: (config.temperature > 0.0).then_some(config.temperature),
                stream: true,
                tools: oai_tools,
            };

            let mut req = self.http.post(base_url).json(&body);
            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
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
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(FolioError::Llm(format!("HTTP {}: {}", status, body)));
            }

            let deltas = SseStream::new(response.bytes_stream()).filter_map(|event| async move {
                match event {
                    Ok(event) => parse_chunk(event),
                    Err(e) => Some(Err(e)),
                }
            });
            collect_text(Box::pin(deltas), listener).await
        })
    }
}
