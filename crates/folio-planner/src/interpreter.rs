use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use folio_core::error::{FolioError, Result};
use folio_core::traits::InvocationContext;
use folio_core::types::ExecutionPlan;
use folio_core::ValueStore;
use folio_operations::OperationRegistry;

const CAUSE_LIMIT: usize = 300;

/// One operation call made while executing a plan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRecord {
    /// One-based step number.
    pub step: usize,
    pub service: String,
    pub operation: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    /// Output of the last invocation, verbatim.
    pub output: Value,
    pub invocations: Vec<InvocationRecord>,
    pub total_elapsed_ms: u64,
}

/// Value store key for an operation's output: `step<N>.<operationId>`.
pub fn output_key(step: usize, operation: &str) -> String {
    format!("step{}.{}", step, operation)
}

/// Runs validated plans against an operation registry.
///
/// Holds no state between calls; one interpreter can serve concurrent
/// requests that share a registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanInterpreter;

impl PlanInterpreter {
    pub fn new() -> Self {
        Self
    }

    /// Invoke every operation in plan order, piping each output into the next
    /// invocation. The first invocation receives `input`.
    ///
    /// Stops at the first failure with [`FolioError::ExecutionFailed`].
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        registry: &OperationRegistry,
        values: Arc<ValueStore>,
        input: Value,
    ) -> Result<ExecutionOutcome> {
        let started = Instant::now();
        let mut current = input;
        let mut invocations = Vec::with_capacity(plan.invocation_count());

        for (index, step) in plan.steps.iter().enumerate() {
            let step_no = index + 1;
            for service in &step.services {
                for operation in &service.operations {
                    let ctx = InvocationContext {
                        operation: operation.clone(),
                        service: service.service_name.clone(),
                        step_index: index,
                        values: values.clone(),
                    };
                    debug!(step = step_no, service = %service.service_name, operation = %operation, "Invoking operation");

                    let call_started = Instant::now();
                    let output = match registry.invoke(operation, current, ctx).await {
                        Ok(output) => output,
                        Err(e) => {
                            let message = summarize(&e);
                            error!(
                                step = step_no,
                                operation = %operation,
                                error = %message,
                                "Plan execution aborted"
                            );
                            return Err(FolioError::ExecutionFailed {
                                operation: operation.clone(),
                                message,
                            });
                        }
                    };

                    values.set(output_key(step_no, operation), output.clone());
                    invocations.push(InvocationRecord {
                        step: step_no,
                        service: service.service_name.clone(),
                        operation: operation.clone(),
                        elapsed_ms: call_started.elapsed().as_millis() as u64,
                    });
                    current = output;
                }
            }
        }

        Ok(ExecutionOutcome {
            output: current,
            invocations,
            total_elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Short, single-line description of an invocation error.
fn summarize(err: &FolioError) -> String {
    let text = match err {
        FolioError::ExecutionFailed { message, .. } => message.clone(),
        FolioError::OperationNotFound(_) => "no handler registered".to_string(),
        FolioError::OperationTimeout { timeout_secs, .. } => {
            format!("timed out after {}s", timeout_secs)
        }
        other => other.to_string(),
    };
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > CAUSE_LIMIT {
        format!("{}...", line.chars().take(CAUSE_LIMIT).collect::<String>())
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::future::BoxFuture;
    use serde_json::json;

    use folio_core::traits::OperationInvoker;
    use folio_core::types::{Service, Step};
    use folio_test_utils::{FailingInvoker, RecordingInvoker};

    fn plan(steps: &[&[&str]]) -> ExecutionPlan {
        ExecutionPlan {
            steps: steps
                .iter()
                .enumerate()
                .map(|(i, ops)| Step {
                    title: format!("step {}", i + 1),
                    description: String::new(),
                    services: vec![Service {
                        service_name: "orders".into(),
                        operations: ops.iter().map(|s| s.to_string()).collect(),
                    }],
                })
                .collect(),
        }
    }

    struct AddOne;

    impl OperationInvoker for AddOne {
        fn invoke(&self, input: Value, _ctx: InvocationContext) -> BoxFuture<'_, Result<Value>> {
            Box::pin(async move { Ok(json!(input.as_i64().unwrap_or(0) + 1)) })
        }
    }

    struct Hang;

    impl OperationInvoker for Hang {
        fn invoke(&self, _input: Value, _ctx: InvocationContext) -> BoxFuture<'_, Result<Value>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Value::Null)
            })
        }

        fn timeout_secs(&self) -> u64 {
            1
        }
    }

    #[tokio::test]
    async fn test_outputs_are_piped_and_stored() {
        let mut registry = OperationRegistry::new();
        registry.register("AddOne", AddOne);
        let values = Arc::new(ValueStore::new());

        let outcome = PlanInterpreter::new()
            .execute(&plan(&[&["AddOne", "AddOne"], &["AddOne"]]), &registry, values.clone(), json!(1))
            .await
            .unwrap();

        assert_eq!(outcome.output, json!(4));
        assert_eq!(outcome.invocations.len(), 3);
        assert_eq!(outcome.invocations[2].step, 2);
        assert_eq!(values.get("step1.AddOne"), Some(json!(3)));
        assert_eq!(values.get("step2.AddOne"), Some(json!(4)));
    }

    #[tokio::test]
    async fn test_single_step_output_verbatim() {
        let recorder = RecordingInvoker::returning(json!({"id": "o-1", "total": 42}));
        let mut registry = OperationRegistry::new();
        registry.register("Retrieve", recorder.clone());

        let outcome = PlanInterpreter::new()
            .execute(
                &plan(&[&["Retrieve"]]),
                &registry,
                Arc::new(ValueStore::new()),
                json!({"id": "o-1"}),
            )
            .await
            .unwrap();

        assert_eq!(outcome.output, json!({"id": "o-1", "total": 42}));
        let calls = recorder.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input, json!({"id": "o-1"}));
        assert_eq!(calls[0].step_index, 0);
    }

    #[tokio::test]
    async fn test_missing_handler_aborts_remaining_steps() {
        let recorder = RecordingInvoker::echo();
        let mut registry = OperationRegistry::new();
        registry.register("List", recorder.clone());

        let err = PlanInterpreter::new()
            .execute(
                &plan(&[&["List"], &["Missing"], &["List"]]),
                &registry,
                Arc::new(ValueStore::new()),
                json!({}),
            )
            .await
            .unwrap_err();

        match err {
            FolioError::ExecutionFailed { operation, message } => {
                assert_eq!(operation, "Missing");
                assert_eq!(message, "no handler registered");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(recorder.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invoker_failure_carries_operation() {
        let mut registry = OperationRegistry::new();
        registry.register("Retrieve", FailingInvoker::new("HTTP 500: boom\nstack trace"));

        let err = PlanInterpreter::new()
            .execute(&plan(&[&["Retrieve"]]), &registry, Arc::new(ValueStore::new()), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.operation(), Some("Retrieve"));
        assert_eq!(err.to_string(), "Operation Retrieve failed: HTTP 500: boom");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_execution_failure() {
        let mut registry = OperationRegistry::new();
        registry.register("Hang", Hang);

        let err = PlanInterpreter::new()
            .execute(&plan(&[&["Hang"]]), &registry, Arc::new(ValueStore::new()), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FolioError::ExecutionFailed { ref message, .. } if message == "timed out after 1s"
        ));
    }

    #[tokio::test]
    async fn test_concurrent_executions_share_registry() {
        let mut registry = OperationRegistry::new();
        registry.register("AddOne", AddOne);
        let registry = Arc::new(registry);

        let mut handles = Vec::new();
        for start in 0..8i64 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let values = Arc::new(ValueStore::new());
                let outcome = PlanInterpreter::new()
                    .execute(&plan(&[&["AddOne"], &["AddOne"]]), &registry, values.clone(), json!(start))
                    .await
                    .unwrap();
                (start, outcome.output, values.len())
            }));
        }
        for h in handles {
            let (start, output, stored) = h.await.unwrap();
            assert_eq!(output, json!(start + 2));
            assert_eq!(stored, 2);
        }
    }
}
