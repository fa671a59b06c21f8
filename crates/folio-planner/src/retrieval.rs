use std::collections::HashSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use folio_core::error::{FolioError, Result};
use folio_core::types::{
    ContextRecord, ContextTuple, DocSnippet, ExampleSummary, FieldSummary, OperationSummary,
};
use folio_graph::{node_key, sanitize_key, GraphDriver, NodeKind, Properties};

/// Turns extracted (entity, operations) tuples into typed context records.
pub struct ContextRetriever {
    driver: Arc<dyn GraphDriver>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityRow {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    service_slug: String,
}

#[derive(Deserialize)]
struct KeyedOperation {
    #[serde(default)]
    key: String,
    #[serde(flatten)]
    summary: OperationSummary,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocRow {
    #[serde(default)]
    via: String,
    #[serde(flatten)]
    snippet: DocSnippet,
}

impl ContextRetriever {
    pub fn new(driver: Arc<dyn GraphDriver>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &Arc<dyn GraphDriver> {
        &self.driver
    }

    /// One record per tuple whose entity exists and whose operation filter
    /// matches something, in tuple order.
    pub async fn retrieve_by_context(&self, tuples: &[ContextTuple]) -> Result<Vec<ContextRecord>> {
        if !self.driver.is_initialized() {
            return Err(FolioError::GraphUnavailable(format!(
                "{} backend is not initialized",
                self.driver.id()
            )));
        }

        let mut records = Vec::new();
        for tuple in tuples {
            let entity_key = node_key(NodeKind::Entity, &tuple.entity);
            let Some(props) = self.driver.query_context(&entity_key, &[]).await? else {
                debug!(entity = %tuple.entity, "No such entity in graph");
                continue;
            };
            match build_record(&entity_key, props, &tuple.operations)? {
                Some(record) => records.push(record),
                None => debug!(
                    entity = %tuple.entity,
                    operations = ?tuple.operations,
                    "No operation matched the filter"
                ),
            }
        }
        Ok(records)
    }
}

fn rows<T: DeserializeOwned>(props: &Properties, field: &str) -> Result<Vec<T>> {
    match props.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| serde_json::from_value(v.clone()).map_err(FolioError::from))
            .collect(),
        _ => Ok(Vec::new()),
    }
}

fn build_record(
    entity_key: &str,
    props: Properties,
    filter: &[String],
) -> Result<Option<ContextRecord>> {
    let entity: EntityRow = match props.get("entity") {
        Some(v) => serde_json::from_value(v.clone())?,
        None => return Ok(None),
    };

    let mut operations: Vec<KeyedOperation> = rows(&props, "operations")?;
    if !filter.is_empty() {
        operations.retain(|op| {
            filter
                .iter()
                .any(|f| f.trim().eq_ignore_ascii_case(&op.summary.operation_id))
        });
        if operations.is_empty() {
            return Ok(None);
        }
    }

    let kept_keys: HashSet<String> = operations.iter().map(|op| sanitize_key(&op.key)).collect();

    let mut examples: Vec<ExampleSummary> = rows(&props, "examples")?;
    examples.retain(|ex| kept_keys.contains(&sanitize_key(&ex.operation_key)));

    let documentation = rows::<DocRow>(&props, "documentation")?
        .into_iter()
        .filter(|doc| doc.via == entity_key || kept_keys.contains(&doc.via))
        .map(|doc| doc.snippet)
        .collect();

    Ok(Some(ContextRecord {
        entity: entity.name,
        description: entity.description,
        service_slug: entity.service_slug,
        operations: operations.into_iter().map(|op| op.summary).collect(),
        fields: rows::<FieldSummary>(&props, "fields")?,
        examples,
        documentation,
    }))
}
