pub mod providers;
pub mod streaming;

use std::sync::Arc;

use folio_core::config::ModelConfig;
use folio_core::traits::LlmClient;

pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Arc<dyn LlmClient> {
    match config.provider.to_ascii_lowercase().as_str() {
        "anthropic" | "claude" => Arc::new(AnthropicClient::new(config.clone())),
        // Everything else speaks the OpenAI chat completions protocol
        _ => Arc::new(OpenAiClient::new(config.clone())),
    }
}
