//! Mocks and fixtures shared by Folio's test suites.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::{json, Value};

use folio_core::error::{FolioError, Result};
use folio_core::traits::{InvocationContext, LlmClient, OperationInvoker, StreamListener};
use folio_core::types::{ChatMessage, ToolDefinition};
use folio_index::Handbook;

/// LLM client that replays scripted responses in order.
///
/// Once the script runs out, the last response repeats. Every call is
/// recorded so tests can inspect the prompts that were sent.
pub struct MockLlmClient {
    script: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
    calls: AtomicUsize,
    recorded: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockLlmClient {
    pub fn new<S: Into<String>>(responses: impl IntoIterator<Item = S>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Into::into).collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with `response`.
    pub fn repeating(response: impl Into<String>) -> Self {
        Self::new([response.into()])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Conversations received, one per call.
    pub fn conversations(&self) -> Vec<Vec<ChatMessage>> {
        self.recorded.lock().unwrap().clone()
    }

    /// Content of the last user message of each call.
    pub fn prompts(&self) -> Vec<String> {
        self.conversations()
            .into_iter()
            .filter_map(|msgs| msgs.last().map(|m| m.content.clone()))
            .collect()
    }
}

impl LlmClient for MockLlmClient {
    fn chat(
        &self,
        messages: Vec<ChatMessage>,
        _tools: &[ToolDefinition],
        _cacheable: bool,
        listener: Option<Arc<dyn StreamListener>>,
    ) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.recorded.lock().unwrap().push(messages);

            let next = self.script.lock().unwrap().pop_front();
            let response = match next {
                Some(r) => {
                    *self.last.lock().unwrap() = Some(r.clone());
                    r
                }
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| FolioError::Llm("mock has no scripted response".into()))?,
            };
            if let Some(l) = listener {
                l.on_delta(&response);
                l.on_complete(&response);
            }
            Ok(response)
        })
    }
}

/// A recorded invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub operation: String,
    pub step_index: usize,
    pub input: Value,
}

/// Invoker that records its inputs and returns a fixed output.
///
/// Clones share the same record, so a test can keep one handle while the
/// registry owns another.
#[derive(Clone)]
pub struct RecordingInvoker {
    output: Option<Value>,
    calls: Arc<Mutex<Vec<Invocation>>>,
}

impl RecordingInvoker {
    pub fn returning(output: Value) -> Self {
        Self {
            output: Some(output),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns its input unchanged.
    pub fn echo() -> Self {
        Self {
            output: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl OperationInvoker for RecordingInvoker {
    fn invoke(&self, input: Value, ctx: InvocationContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(Invocation {
                operation: ctx.operation.clone(),
                step_index: ctx.step_index,
                input: input.clone(),
            });
            Ok(self.output.clone().unwrap_or(input))
        })
    }
}

/// Invoker that always fails with the given message.
pub struct FailingInvoker {
    message: String,
}

impl FailingInvoker {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl OperationInvoker for FailingInvoker {
    fn invoke(&self, _input: Value, ctx: InvocationContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            Err(FolioError::ExecutionFailed {
                operation: ctx.operation,
                message: self.message.clone(),
            })
        })
    }
}

/// Wrap JSON in a ```json fence, the way a model answers.
pub fn fenced(value: &Value) -> String {
    format!(
        "Here is the plan.\n```json\n{}\n```",
        serde_json::to_string_pretty(value).unwrap()
    )
}

/// One-step plan invoking `operation` on `service`.
pub fn single_step_plan(service: &str, operation: &str) -> Value {
    json!({
        "steps": [{
            "title": format!("Call {}", operation),
            "description": "",
            "services": [{"serviceName": service, "operations": [operation]}]
        }]
    })
}

/// Shop handbook: `Order` with `Retrieve`/`List`, `Customer` with `Lookup`.
pub fn sample_handbook() -> Handbook {
    Handbook::from_json_str(SAMPLE_HANDBOOK).unwrap()
}

pub const SAMPLE_HANDBOOK: &str = r#"{
    "name": "shop",
    "description": "Order management API",
    "services": [
        {
            "slug": "orders",
            "title": "Orders API",
            "base_url": "http://127.0.0.1:9",
            "tags": [
                {
                    "name": "Order",
                    "description": "A customer order",
                    "fields": [
                        {"name": "id", "type": "string", "description": "Order id"},
                        {"name": "total", "type": "number", "description": "Order total"}
                    ]
                },
                {"name": "Customer", "description": "A buyer"}
            ],
            "operations": [
                {
                    "operation_id": "Retrieve",
                    "method": "GET",
                    "path": "/orders/{id}",
                    "summary": "Retrieve one order",
                    "description": "Returns a single order by id, including its total.",
                    "tags": ["Order"],
                    "parameters": [{"name": "id", "in": "path", "required": true}],
                    "examples": [
                        {"name": "found", "response": {"id": "o-1", "total": 42}, "status": 200}
                    ]
                },
                {
                    "operation_id": "List",
                    "method": "GET",
                    "path": "/orders",
                    "summary": "List orders",
                    "tags": ["Order"]
                },
                {
                    "operation_id": "Lookup",
                    "method": "GET",
                    "path": "/customers/{id}",
                    "summary": "Look up a customer",
                    "tags": ["Customer"]
                }
            ]
        }
    ],
    "documents": [
        {
            "uri": "docs/orders.md",
            "title": "Orders guide",
            "entities": ["Order"],
            "content": "An Order belongs to exactly one Customer. Totals are in cents."
        }
    ]
}"#;

/// Write `contents` to a config file in a fresh temp dir.
pub fn temp_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("folio.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}
