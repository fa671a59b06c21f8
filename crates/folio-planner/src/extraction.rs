use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use folio_core::error::Result;
use folio_core::traits::LlmClient;
use folio_core::types::{ChatMessage, Extraction};
use folio_index::Handbook;

use crate::validator::extract_fenced_json;

/// Splits a user prompt into serviceable intents.
pub trait IntentExtractor: Send + Sync + 'static {
    fn extract<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<Extraction>>;
}

const EXTRACTION_PROMPT: &str = r#"You map user requests onto the entities and operations of an API handbook.

Known entities and their operations:
{catalog}

Split the request into independent parts. For each part you can serve with the entities above, emit an intent. List every part you cannot serve under "unhandled".

Respond with ONLY a fenced JSON block in this format:
```json
{
  "intents": [
    {
      "description": "short restatement",
      "action": "list | retrieve | create | update | delete | aggregate",
      "entities": [{"entity": "EntityName", "operations": ["operationId"]}],
      "fields": ["fieldName"],
      "groupBy": ["fieldName"],
      "parameters": {"name": "literal value"}
    }
  ],
  "unhandled": ["part of the request that no entity covers"]
}
```"#;

/// LLM-backed extractor primed with the handbook's entity catalog.
pub struct LlmIntentExtractor {
    llm: Arc<dyn LlmClient>,
    catalog: String,
}

impl LlmIntentExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, handbook: &Handbook) -> Self {
        Self {
            llm,
            catalog: entity_catalog(handbook),
        }
    }

    pub fn catalog(&self) -> &str {
        &self.catalog
    }
}

/// One line per entity: `- Order (orders): List, Retrieve`.
pub fn entity_catalog(handbook: &Handbook) -> String {
    let allowed = handbook.allowed_operations();
    let mut entities: BTreeMap<&str, (&str, Vec<&str>)> = BTreeMap::new();
    for (service, op) in handbook.operations() {
        if !allowed.contains(&op.operation_id) {
            continue;
        }
        for tag in &op.tags {
            entities
                .entry(tag.as_str())
                .or_insert_with(|| (service.slug.as_str(), Vec::new()))
                .1
                .push(op.operation_id.as_str());
        }
    }
    entities
        .into_iter()
        .map(|(entity, (slug, mut ops))| {
            ops.sort_unstable();
            ops.dedup();
            format!("- {} ({}): {}", entity, slug, ops.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl IntentExtractor for LlmIntentExtractor {
    fn extract<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<Extraction>> {
        Box::pin(async move {
            let messages = vec![
                ChatMessage::system(EXTRACTION_PROMPT.replace("{catalog}", &self.catalog)),
                ChatMessage::user(prompt),
            ];
            let text = self.llm.chat(messages, &[], true, None).await?;

            let parsed = extract_fenced_json(&text)
                .ok_or_else(|| "no fenced JSON block".to_string())
                .and_then(|json| {
                    serde_json::from_str::<Extraction>(json).map_err(|e| e.to_string())
                });

            match parsed {
                Ok(extraction) => {
                    debug!(
                        intents = extraction.intents.len(),
                        unhandled = extraction.unhandled.len(),
                        "Extracted intents"
                    );
                    Ok(extraction)
                }
                Err(reason) => {
                    warn!(reason = %reason, response = %text, "Failed to parse intent extraction");
                    Ok(Extraction {
                        intents: Vec::new(),
                        unhandled: vec![prompt.to_string()],
                    })
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_test_utils::{fenced, sample_handbook, MockLlmClient};
    use serde_json::json;

    #[test]
    fn test_catalog_groups_operations_by_entity() {
        let catalog = entity_catalog(&sample_handbook());
        assert_eq!(
            catalog,
            "- Customer (orders): Lookup\n- Order (orders): List, Retrieve"
        );
    }

    #[tokio::test]
    async fn test_extract_parses_fenced_json() {
        let llm = Arc::new(MockLlmClient::repeating(fenced(&json!({
            "intents": [{
                "description": "fetch order o-1",
                "action": "retrieve",
                "entities": [{"entity": "Order", "operations": ["Retrieve"]}],
                "parameters": {"id": "o-1"}
            }],
            "unhandled": ["book a flight"]
        }))));
        let extractor = LlmIntentExtractor::new(llm.clone(), &sample_handbook());
        let extraction = extractor.extract("get order o-1 and book a flight").await.unwrap();

        assert_eq!(extraction.intents.len(), 1);
        assert_eq!(extraction.intents[0].entities[0].entity, "Order");
        assert_eq!(extraction.intents[0].parameters["id"], "o-1");
        assert_eq!(extraction.unhandled, vec!["book a flight"]);

        let conversation = &llm.conversations()[0];
        assert!(conversation[0].content.contains("- Order (orders): List, Retrieve"));
        assert_eq!(conversation[1].content, "get order o-1 and book a flight");
    }

    #[tokio::test]
    async fn test_unparseable_response_marks_prompt_unhandled() {
        let llm = Arc::new(MockLlmClient::repeating("I cannot help with that."));
        let extractor = LlmIntentExtractor::new(llm, &sample_handbook());
        let extraction = extractor.extract("what's the weather").await.unwrap();
        assert!(extraction.intents.is_empty());
        assert_eq!(extraction.unhandled, vec!["what's the weather"]);
    }
}
