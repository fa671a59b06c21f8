use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use folio_core::error::{FolioError, Result};
use folio_core::traits::{InvocationContext, OperationInvoker};
use folio_index::Handbook;

use crate::http::HttpOperationInvoker;

/// Table of live operations, keyed by operation id.
///
/// Immutable once built; share it behind an `Arc` across requests.
pub struct OperationRegistry {
    invokers: HashMap<String, Arc<dyn OperationInvoker>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            invokers: HashMap::new(),
        }
    }

    /// Register an invoker. Replaces any previous invoker for the same key.
    pub fn register(&mut self, key: impl Into<String>, invoker: impl OperationInvoker) {
        self.invokers.insert(key.into(), Arc::new(invoker));
    }

    pub fn register_arc(&mut self, key: impl Into<String>, invoker: Arc<dyn OperationInvoker>) {
        self.invokers.insert(key.into(), invoker);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn OperationInvoker>> {
        self.invokers.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.invokers.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.invokers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.invokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invokers.is_empty()
    }

    /// Invoke an operation, bounded by the invoker's timeout.
    pub async fn invoke(
        &self,
        key: &str,
        input: serde_json::Value,
        ctx: InvocationContext,
    ) -> Result<serde_json::Value> {
        let invoker = self
            .get(key)
            .ok_or_else(|| FolioError::OperationNotFound(key.to_string()))?;

        let timeout_secs = invoker.timeout_secs();
        match tokio::time::timeout(Duration::from_secs(timeout_secs), invoker.invoke(input, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(FolioError::OperationTimeout {
                operation: key.to_string(),
                timeout_secs,
            }),
        }
    }

    /// HTTP invokers for every operation the handbook policy allows.
    pub fn from_handbook(handbook: &Handbook) -> Self {
        let allowed = handbook.allowed_operations();
        let client = reqwest::Client::new();
        let mut registry = Self::new();
        for (service, op) in handbook.operations() {
            if !allowed.contains(&op.operation_id) {
                continue;
            }
            registry.register(
                op.operation_id.clone(),
                HttpOperationInvoker::from_spec(client.clone(), service, op),
            );
        }
        debug!(operations = registry.len(), "Registered HTTP operations");
        registry
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use serde_json::json;

    use folio_core::ValueStore;

    struct Echo;

    impl OperationInvoker for Echo {
        fn invoke(
            &self,
            input: serde_json::Value,
            ctx: InvocationContext,
        ) -> BoxFuture<'_, Result<serde_json::Value>> {
            Box::pin(async move { Ok(json!({"op": ctx.operation, "input": input})) })
        }
    }

    struct Slow;

    impl OperationInvoker for Slow {
        fn invoke(
            &self,
            _input: serde_json::Value,
            _ctx: InvocationContext,
        ) -> BoxFuture<'_, Result<serde_json::Value>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(serde_json::Value::Null)
            })
        }

        fn timeout_secs(&self) -> u64 {
            2
        }
    }

    fn ctx(op: &str) -> InvocationContext {
        InvocationContext {
            operation: op.to_string(),
            service: "orders".into(),
            step_index: 0,
            values: Arc::new(ValueStore::new()),
        }
    }

    #[tokio::test]
    async fn test_invoke_registered() {
        let mut registry = OperationRegistry::new();
        registry.register("Retrieve", Echo);
        assert!(registry.contains("Retrieve"));
        let out = registry
            .invoke("Retrieve", json!({"id": 7}), ctx("Retrieve"))
            .await
            .unwrap();
        assert_eq!(out["op"], "Retrieve");
        assert_eq!(out["input"]["id"], 7);
    }

    #[tokio::test]
    async fn test_missing_operation() {
        let registry = OperationRegistry::new();
        let err = registry
            .invoke("Nope", json!({}), ctx("Nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, FolioError::OperationNotFound(ref op) if op == "Nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_applies() {
        let mut registry = OperationRegistry::new();
        registry.register("Slow", Slow);
        let err = registry
            .invoke("Slow", json!({}), ctx("Slow"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FolioError::OperationTimeout { timeout_secs: 2, .. }
        ));
    }

    #[test]
    fn test_from_handbook_respects_policy() {
        let handbook = Handbook::from_json_str(
            r#"{
                "name": "shop",
                "services": [{"slug": "orders", "base_url": "http://localhost:9",
                    "operations": [
                        {"operation_id": "Retrieve", "method": "GET", "path": "/orders/{id}"},
                        {"operation_id": "Purge", "method": "DELETE", "path": "/orders"}
                    ]}],
                "policy": {"denied_operations": ["Purge"]}
            }"#,
        )
        .unwrap();
        let registry = OperationRegistry::from_handbook(&handbook);
        assert_eq!(registry.list(), vec!["Retrieve"]);
    }
}
