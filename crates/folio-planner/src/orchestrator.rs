use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use folio_core::config::AppConfig;
use folio_core::error::{FolioError, Result};
use folio_core::types::{ContextRecord, ExecutionPlan, Intent};
use folio_core::{PromptSchemaKey, ValueStore};
use folio_operations::{OperationRegistry, PARAM_PREFIX};

use crate::cache::PlanCache;
use crate::extraction::IntentExtractor;
use crate::interpreter::{InvocationRecord, PlanInterpreter};
use crate::plan_generator::PlanGenerator;
use crate::retrieval::ContextRetriever;

/// A prompt part that was planned (and, when executing, answered).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandledPart {
    pub description: String,
    pub psk: PromptSchemaKey,
    pub plan: ExecutionPlan,
    /// Final operation output. `None` when only planning.
    pub answer: Option<Value>,
    /// Whether the plan came from the cache.
    pub cached: bool,
    pub invocations: Vec<InvocationRecord>,
}

/// A prompt part that could not be served, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct UnhandledPart {
    pub description: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationResponse {
    pub request_id: String,
    pub handled: Vec<HandledPart>,
    pub unhandled: Vec<UnhandledPart>,
    pub elapsed_ms: u64,
}

/// Runs the per-request pipeline: extraction, then for each intent retrieval,
/// plan generation (or a cached plan) and execution.
///
/// Stages run sequentially within a request. A failing intent becomes an
/// unhandled part and the remaining intents still run.
pub struct Orchestrator {
    extractor: Arc<dyn IntentExtractor>,
    retriever: ContextRetriever,
    generator: PlanGenerator,
    interpreter: PlanInterpreter,
    registry: Arc<OperationRegistry>,
    cache: Option<PlanCache>,
    request_timeout_secs: u64,
}

impl Orchestrator {
    pub fn new(
        extractor: Arc<dyn IntentExtractor>,
        retriever: ContextRetriever,
        generator: PlanGenerator,
        registry: Arc<OperationRegistry>,
        config: &AppConfig,
    ) -> Self {
        Self {
            extractor,
            retriever,
            generator,
            interpreter: PlanInterpreter::new(),
            registry,
            cache: config.planner.cache_plans.then(PlanCache::new),
            request_timeout_secs: config.orchestrator.request_timeout_secs,
        }
    }

    pub fn cache(&self) -> Option<&PlanCache> {
        self.cache.as_ref()
    }

    /// Plan and execute every serviceable part of `prompt`.
    pub async fn handle(&self, prompt: &str, cancel: CancellationToken) -> Result<OrchestrationResponse> {
        self.guarded(prompt, true, cancel).await
    }

    /// Plan every serviceable part of `prompt` without invoking anything.
    pub async fn plan(&self, prompt: &str, cancel: CancellationToken) -> Result<OrchestrationResponse> {
        self.guarded(prompt, false, cancel).await
    }

    async fn guarded(
        &self,
        prompt: &str,
        execute: bool,
        cancel: CancellationToken,
    ) -> Result<OrchestrationResponse> {
        let limit = Duration::from_secs(self.request_timeout_secs);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Request cancelled");
                Err(FolioError::Cancelled)
            }
            res = tokio::time::timeout(limit, self.run(prompt, execute)) => match res {
                Ok(response) => response,
                Err(_) => {
                    warn!(timeout_secs = self.request_timeout_secs, "Request timed out");
                    Err(FolioError::Timeout(self.request_timeout_secs))
                }
            },
        }
    }

    async fn run(&self, prompt: &str, execute: bool) -> Result<OrchestrationResponse> {
        let started = Instant::now();
        let request_id = uuid::Uuid::new_v4().to_string();
        info!(request_id = %request_id, execute, "Handling request");

        let extraction = self.extractor.extract(prompt).await?;
        let mut handled = Vec::new();
        let mut unhandled: Vec<UnhandledPart> = extraction
            .unhandled
            .into_iter()
            .map(|description| UnhandledPart {
                description,
                reason: "not covered by the handbook".to_string(),
            })
            .collect();

        for intent in extraction.intents {
            match self.handle_intent(&intent, execute).await {
                Ok(part) => handled.push(part),
                Err(reason) => {
                    warn!(request_id = %request_id, intent = %intent.description, reason = %reason, "Intent not handled");
                    unhandled.push(UnhandledPart {
                        description: intent.description,
                        reason,
                    });
                }
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            request_id = %request_id,
            handled = handled.len(),
            unhandled = unhandled.len(),
            elapsed_ms,
            "Request complete"
        );
        Ok(OrchestrationResponse {
            request_id,
            handled,
            unhandled,
            elapsed_ms,
        })
    }

    async fn handle_intent(&self, intent: &Intent, execute: bool) -> std::result::Result<HandledPart, String> {
        if intent.entities.is_empty() {
            return Err("no handbook entity identified".to_string());
        }
        let psk = PromptSchemaKey::from_intent(intent);

        let context = self.context_for(intent).await?;

        let cached_plan = self
            .cache
            .as_ref()
            .and_then(|c| c.get(&psk, &intent.entities));
        let cached = cached_plan.is_some();
        let plan = match cached_plan {
            Some(plan) => plan,
            None => {
                let plan = self
                    .generator
                    .generate_plan(intent, &context)
                    .await
                    .map_err(|e| e.to_string())?;
                if let Some(cache) = &self.cache {
                    cache.insert(&psk, &intent.entities, plan.clone());
                }
                plan
            }
        };

        let mut part = HandledPart {
            description: intent.description.clone(),
            psk,
            plan,
            answer: None,
            cached,
            invocations: Vec::new(),
        };
        if !execute {
            return Ok(part);
        }

        let values = Arc::new(ValueStore::new());
        for (name, value) in &intent.parameters {
            values.set(format!("{}{}", PARAM_PREFIX, name), value.clone());
        }
        let input = Value::Object(intent.parameters.clone());

        let outcome = self
            .interpreter
            .execute(&part.plan, &self.registry, values, input)
            .await
            .map_err(|e| e.to_string())?;
        part.answer = Some(outcome.output);
        part.invocations = outcome.invocations;
        Ok(part)
    }

    /// Context records for an intent. An unavailable graph degrades to an
    /// empty context; an available graph with nothing relevant rejects it.
    async fn context_for(&self, intent: &Intent) -> std::result::Result<Vec<ContextRecord>, String> {
        match self.retriever.retrieve_by_context(&intent.entities).await {
            Ok(records) if records.is_empty() => {
                let names: Vec<&str> = intent.entities.iter().map(|t| t.entity.as_str()).collect();
                Err(format!("no handbook context for {}", names.join(", ")))
            }
            Ok(records) => Ok(records),
            Err(FolioError::GraphUnavailable(reason)) => {
                warn!(reason = %reason, "Graph unavailable, planning without context");
                Ok(Vec::new())
            }
            Err(e) => Err(e.to_string()),
        }
    }
}
