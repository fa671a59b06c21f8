use std::sync::Arc;

use tracing::{debug, info, warn};

use folio_core::config::PlannerConfig;
use folio_core::error::{FolioError, Result};
use folio_core::traits::LlmClient;
use folio_core::types::{ChatMessage, ContextRecord, ExecutionPlan, Intent};

use crate::validator::{extract_plan_json, PlanFailure, PlanValidator};

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an API execution planner. Given a user intent and the handbook context retrieved for it, produce an execution plan that invokes only the operations listed in the context.

Operations run in order; each receives the previous operation's output as input (the first receives the request parameters).

Respond with ONLY a fenced JSON block in this format:
```json
{
  "steps": [
    {
      "title": "short step title",
      "description": "what this step does",
      "services": [{"serviceName": "service slug", "operations": ["operationId"]}]
    }
  ]
}
```"#;

/// States of one plan generation run.
enum PlanState {
    ComposePrompt,
    CallModel(Vec<ChatMessage>),
    ExtractJson(String),
    Validate { output: String, json: String },
    RetryWithError { failure: PlanFailure, output: String },
    Success(ExecutionPlan),
}

/// Generates a validated plan, feeding each failure back to the model.
///
/// Retries are immediate and bounded by `max_attempts` (first try included).
/// A transport error from the model aborts the run without consuming an
/// attempt.
pub struct PlanGenerator {
    llm: Arc<dyn LlmClient>,
    validator: PlanValidator,
    max_attempts: usize,
    system_prompt: String,
}

impl PlanGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, validator: PlanValidator, config: &PlannerConfig) -> Self {
        Self {
            llm,
            validator,
            max_attempts: config.max_attempts.max(1),
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    pub async fn generate_plan(
        &self,
        intent: &Intent,
        context: &[ContextRecord],
    ) -> Result<ExecutionPlan> {
        let mut attempt = 0usize;
        let mut last_failure: Option<(PlanFailure, String)> = None;
        let mut state = PlanState::ComposePrompt;

        loop {
            state = match state {
                PlanState::ComposePrompt => {
                    attempt += 1;
                    let user = compose_user_prompt(intent, context, last_failure.as_ref())?;
                    PlanState::CallModel(vec![
                        ChatMessage::system(self.system_prompt.clone()),
                        ChatMessage::user(user),
                    ])
                }

                PlanState::CallModel(messages) => {
                    debug!(attempt, max_attempts = self.max_attempts, "Requesting plan");
                    let output = self.llm.chat(messages, &[], true, None).await?;
                    PlanState::ExtractJson(output)
                }

                PlanState::ExtractJson(output) => {
                    match extract_plan_json(&output).map(str::to_string) {
                        Ok(json) => PlanState::Validate { output, json },
                        Err(failure) => PlanState::RetryWithError { failure, output },
                    }
                }

                PlanState::Validate { output, json } => match self.validator.check(&json) {
                    Ok(plan) => PlanState::Success(plan),
                    Err(failure) => PlanState::RetryWithError { failure, output },
                },

                PlanState::RetryWithError { failure, output } => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        reason = %failure,
                        "Plan attempt failed"
                    );
                    if attempt >= self.max_attempts {
                        return Err(FolioError::PlanExhausted {
                            attempts: attempt,
                            reason: failure.to_string(),
                        });
                    }
                    last_failure = Some((failure, output));
                    PlanState::ComposePrompt
                }

                PlanState::Success(plan) => {
                    info!(
                        attempts = attempt,
                        steps = plan.steps.len(),
                        invocations = plan.invocation_count(),
                        "Plan validated"
                    );
                    return Ok(plan);
                }
            };
        }
    }
}

fn compose_user_prompt(
    intent: &Intent,
    context: &[ContextRecord],
    last_failure: Option<&(PlanFailure, String)>,
) -> Result<String> {
    let mut prompt = format!(
        "Intent:\n{}\n\nHandbook context:\n{}",
        serde_json::to_string_pretty(intent)?,
        serde_json::to_string_pretty(context)?,
    );
    if let Some((failure, output)) = last_failure {
        prompt.push_str(&format!(
            "\n\nPrevious attempt failed because: {}\n\nPrevious output:\n{}\n\nReturn a corrected plan.",
            failure, output
        ));
    }
    Ok(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::types::{ContextTuple, OperationSummary};
    use folio_test_utils::{fenced, single_step_plan, MockLlmClient};

    fn intent() -> Intent {
        Intent {
            description: "fetch order o-1".into(),
            action: "retrieve".into(),
            entities: vec![ContextTuple::new("Order", vec!["Retrieve".into()])],
            ..Intent::default()
        }
    }

    fn context() -> Vec<ContextRecord> {
        vec![ContextRecord {
            entity: "Order".into(),
            service_slug: "orders".into(),
            operations: vec![OperationSummary {
                operation_id: "Retrieve".into(),
                method: "GET".into(),
                path: "/orders/{id}".into(),
                ..OperationSummary::default()
            }],
            ..ContextRecord::default()
        }]
    }

    fn generator(llm: Arc<MockLlmClient>) -> PlanGenerator {
        PlanGenerator::new(
            llm,
            PlanValidator::new(["Retrieve".to_string()].into()),
            &PlannerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_valid_plan_first_try() {
        let llm = Arc::new(MockLlmClient::repeating(fenced(&single_step_plan(
            "orders", "Retrieve",
        ))));
        let plan = generator(llm.clone())
            .generate_plan(&intent(), &context())
            .await
            .unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(llm.calls(), 1);

        let conversation = &llm.conversations()[0];
        assert!(conversation[0].content.contains("execution planner"));
        assert!(conversation[1].content.contains("\"operationId\": \"Retrieve\""));
        assert!(!conversation[1].content.contains("Previous attempt failed"));
    }

    #[tokio::test]
    async fn test_failure_is_fed_back_then_corrected() {
        let bad = fenced(&single_step_plan("orders", "doesNotExist"));
        let good = fenced(&single_step_plan("orders", "Retrieve"));
        let llm = Arc::new(MockLlmClient::new([bad.clone(), good]));

        let plan = generator(llm.clone())
            .generate_plan(&intent(), &context())
            .await
            .unwrap();
        assert_eq!(plan.operation_ids().collect::<Vec<_>>(), vec!["Retrieve"]);
        assert_eq!(llm.calls(), 2);

        let retry = &llm.prompts()[1];
        assert!(retry.contains("Previous attempt failed because:"));
        assert!(retry.contains("doesNotExist"));
        assert!(retry.contains(&bad));
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let llm = Arc::new(MockLlmClient::repeating("no json here"));
        let err = generator(llm.clone())
            .generate_plan(&intent(), &context())
            .await
            .unwrap_err();
        assert_eq!(llm.calls(), 3);
        match err {
            FolioError::PlanExhausted { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("no fenced"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_output_counts_as_attempt() {
        let llm = Arc::new(MockLlmClient::new([
            "".to_string(),
            fenced(&single_step_plan("orders", "Retrieve")),
        ]));
        generator(llm.clone())
            .generate_plan(&intent(), &context())
            .await
            .unwrap();
        assert_eq!(llm.calls(), 2);
        assert!(llm.prompts()[1].contains("the response was empty"));
    }

    #[tokio::test]
    async fn test_model_error_is_not_retried() {
        let llm = Arc::new(MockLlmClient::new(Vec::<String>::new()));
        let err = generator(llm.clone())
            .generate_plan(&intent(), &context())
            .await
            .unwrap_err();
        assert!(matches!(err, FolioError::Llm(_)));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_single_attempt_config() {
        let llm = Arc::new(MockLlmClient::repeating("```json\n{\"steps\": []}\n```"));
        let config = PlannerConfig {
            max_attempts: 1,
            ..PlannerConfig::default()
        };
        let generator = PlanGenerator::new(
            llm.clone(),
            PlanValidator::new(["Retrieve".to_string()].into()),
            &config,
        );
        let err = generator.generate_plan(&intent(), &context()).await.unwrap_err();
        assert!(matches!(err, FolioError::PlanExhausted { attempts: 1, .. }));
        assert_eq!(llm.calls(), 1);
    }
}
