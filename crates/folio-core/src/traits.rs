use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;
use crate::value_store::ValueStore;

/// Receives incremental model output while a request streams.
pub trait StreamListener: Send + Sync {
    fn on_delta(&self, text: &str);

    fn on_complete(&self, _full_text: &str) {}
}

/// LLM client. Returns the model's text, possibly containing a fenced JSON block.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a conversation and collect the full text response.
    ///
    /// `cacheable` hints that the prompt prefix is stable across calls and may be
    /// cached provider-side.
    fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        cacheable: bool,
        listener: Option<Arc<dyn StreamListener>>,
    ) -> BoxFuture<'_, Result<String>>;

    /// Single-prompt convenience over [`LlmClient::chat`].
    fn generate(
        &self,
        prompt: &str,
        tools: &[ToolDefinition],
        cacheable: bool,
        listener: Option<Arc<dyn StreamListener>>,
    ) -> BoxFuture<'_, Result<String>> {
        self.chat(vec![ChatMessage::user(prompt)], tools, cacheable, listener)
    }
}

/// Per-invocation context handed to an operation invoker.
#[derive(Clone)]
pub struct InvocationContext {
    /// Operation id being invoked.
    pub operation: String,
    /// Service the plan attributed the operation to.
    pub service: String,
    /// Zero-based index of the plan step.
    pub step_index: usize,
    /// Request-scoped scratch memory.
    pub values: Arc<ValueStore>,
}

/// A live operation registered by the handbook/API layer.
pub trait OperationInvoker: Send + Sync + 'static {
    /// Invoke the operation with a JSON input and return its JSON output.
    fn invoke(
        &self,
        input: serde_json::Value,
        ctx: InvocationContext,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;

    /// Timeout in seconds for one invocation.
    fn timeout_secs(&self) -> u64 {
        30
    }
}
