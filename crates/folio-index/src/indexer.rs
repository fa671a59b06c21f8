use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use folio_core::config::ChunkingConfig;
use folio_core::error::Result;
use folio_graph::{
    raw_key, DocumentationNode, EdgeType, EntityNode, ExampleNode, FieldNode, GraphDriver,
    GraphEdge, GraphNode, NodeKind, OperationNode,
};

use crate::chunker::{ChunkMetadata, ChunkerConfig, DocumentChunker};
use crate::handbook::{Handbook, OperationSpec, ServiceSpec};

/// Outcome of one indexing run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    pub handbook: String,
    pub backend: String,
    /// False when the backend is disabled; nothing was written.
    pub initialized: bool,
    pub entities: usize,
    pub operations: usize,
    pub documents: usize,
    pub chunks: usize,
    pub nodes_written: usize,
    pub edges_written: usize,
    pub failures: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl IndexReport {
    fn new(handbook: &str, backend: &str) -> Self {
        Self {
            handbook: handbook.to_string(),
            backend: backend.to_string(),
            initialized: false,
            entities: 0,
            operations: 0,
            documents: 0,
            chunks: 0,
            nodes_written: 0,
            edges_written: 0,
            failures: 0,
            started_at: Utc::now(),
            elapsed_ms: 0,
        }
    }
}

/// Entity merged across services by tag name.
struct EntityDraft {
    node: EntityNode,
    fields: Vec<FieldNode>,
}

/// Builds the knowledge graph for a handbook.
///
/// Each node and edge write is independent: a failure is logged, counted in
/// the report, and indexing moves on.
pub struct IndexingOrchestrator {
    driver: Arc<dyn GraphDriver>,
    chunking: ChunkingConfig,
    chunker: DocumentChunker,
    clear_on_startup: bool,
}

impl IndexingOrchestrator {
    pub fn new(driver: Arc<dyn GraphDriver>, chunking: ChunkingConfig, clear_on_startup: bool) -> Self {
        let chunker = DocumentChunker::new(ChunkerConfig::from(&chunking));
        Self {
            driver,
            chunking,
            chunker,
            clear_on_startup,
        }
    }

    pub fn driver(&self) -> &Arc<dyn GraphDriver> {
        &self.driver
    }

    /// Index every service, operation, example and document of `handbook`.
    ///
    /// Fails only when the backend cannot be initialized.
    pub async fn index_handbook(&self, handbook: &Handbook) -> Result<IndexReport> {
        let started = Instant::now();
        let mut report = IndexReport::new(&handbook.name, self.driver.id());

        self.driver.initialize().await?;
        if !self.driver.is_initialized() {
            info!(handbook = %handbook.name, "Graph backend disabled, skipping indexing");
            return Ok(report);
        }
        report.initialized = true;

        if self.clear_on_startup {
            if let Err(e) = self.driver.clear().await {
                warn!(error = %e, "Failed to clear graph before rebuild");
                report.failures += 1;
            }
        }

        let entities = merge_entities(handbook);
        let matchers = entity_matchers(&entities);
        report.entities = entities.len();

        for draft in &entities {
            let entity_key = raw_key(NodeKind::Entity, &draft.node.name);
            self.put_node(GraphNode::Entity(draft.node.clone()), &mut report).await;
            for field in &draft.fields {
                let node = GraphNode::Field(field.clone());
                let key = node.key();
                self.put_node(node, &mut report).await;
                self.put_edge(GraphEdge::new(key, &entity_key, EdgeType::PartOf), &mut report)
                    .await;
            }
        }

        for (service, op) in handbook.operations() {
            self.index_operation(service, op, &mut report).await;
        }

        for doc in &handbook.documents {
            report.documents += 1;
            let doc_key = raw_key(NodeKind::Documentation, &doc.uri);
            let chunk_keys = self
                .index_document(
                    &doc.uri,
                    &doc.source_type,
                    &doc.title,
                    doc.service.as_deref().unwrap_or_default(),
                    &doc.content,
                    &matchers,
                    &mut report,
                )
                .await;

            for entity in &doc.entities {
                let entity_key = raw_key(NodeKind::Entity, entity);
                self.put_edge(
                    GraphEdge::new(&doc_key, &entity_key, EdgeType::Describes),
                    &mut report,
                )
                .await;
                for chunk_key in &chunk_keys {
                    self.put_edge(
                        GraphEdge::new(&entity_key, chunk_key, EdgeType::HasDocumentation),
                        &mut report,
                    )
                    .await;
                }
            }
            for op_id in &doc.operations {
                let op_key = raw_key(NodeKind::Operation, op_id);
                for chunk_key in &chunk_keys {
                    self.put_edge(
                        GraphEdge::new(&op_key, chunk_key, EdgeType::HasDocumentation),
                        &mut report,
                    )
                    .await;
                }
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            handbook = %report.handbook,
            backend = %report.backend,
            nodes = report.nodes_written,
            edges = report.edges_written,
            chunks = report.chunks,
            failures = report.failures,
            elapsed_ms = report.elapsed_ms,
            "Handbook indexed"
        );
        Ok(report)
    }

    async fn index_operation(&self, service: &ServiceSpec, op: &OperationSpec, report: &mut IndexReport) {
        report.operations += 1;
        let op_key = raw_key(NodeKind::Operation, &op.operation_id);

        let examples: Vec<ExampleNode> = op
            .examples
            .iter()
            .map(|ex| ExampleNode {
                name: ex.name.clone(),
                summary: ex.summary.clone(),
                request_body: ex.request.as_ref().map(|v| v.to_string()),
                response_body: ex.response.as_ref().map(|v| v.to_string()),
                response_status: ex.status,
                operation_key: op_key.clone(),
            })
            .collect();
        let example_keys: Vec<String> = examples
            .iter()
            .map(|ex| GraphNode::Example(ex.clone()).key())
            .collect();

        let doc_uri = (!op.description.trim().is_empty())
            .then(|| format!("openapi:{}/{}", service.slug, op.operation_id));

        let node = GraphNode::Operation(OperationNode {
            operation_id: op.operation_id.clone(),
            method: op.method.to_uppercase(),
            path: op.path.clone(),
            summary: op.summary.clone(),
            description: op.description.clone(),
            service_slug: service.slug.clone(),
            tags: op.tags.clone(),
            signature: op.signature(),
            example_keys: example_keys.clone(),
            doc_uri: doc_uri.clone(),
        });
        self.put_node(node, report).await;

        for tag in &op.tags {
            let entity_key = raw_key(NodeKind::Entity, tag);
            self.put_edge(GraphEdge::new(entity_key, &op_key, EdgeType::HasOperation), report)
                .await;
        }

        for (example, key) in examples.into_iter().zip(example_keys) {
            self.put_node(GraphNode::Example(example), report).await;
            self.put_edge(GraphEdge::new(&op_key, &key, EdgeType::HasExample), report)
                .await;
            self.put_edge(GraphEdge::new(&key, &op_key, EdgeType::Demonstrates), report)
                .await;
        }

        if let Some(uri) = doc_uri {
            let title = if op.summary.is_empty() {
                op.operation_id.clone()
            } else {
                op.summary.clone()
            };
            let chunk_keys = self
                .index_document(&uri, "openapi", &title, &service.slug, &op.description, &[], report)
                .await;
            for chunk_key in chunk_keys {
                self.put_edge(
                    GraphEdge::new(&op_key, chunk_key, EdgeType::HasDocumentation),
                    report,
                )
                .await;
            }
        }
    }

    /// Store a documentation node and its chunks; returns the chunk keys.
    #[allow(clippy::too_many_arguments)]
    async fn index_document(
        &self,
        uri: &str,
        source_type: &str,
        title: &str,
        service_slug: &str,
        content: &str,
        matchers: &[(String, Regex)],
        report: &mut IndexReport,
    ) -> Vec<String> {
        let doc_key = raw_key(NodeKind::Documentation, uri);
        let meta = ChunkMetadata {
            source_uri: uri.to_string(),
            source_type: source_type.to_string(),
            parent_key: doc_key.clone(),
        };
        let chunks = if self.chunking.enabled_for(source_type) {
            self.chunker.chunk(content, &meta)
        } else {
            self.chunker.single(content, &meta)
        };
        debug!(uri, source_type, chunks = chunks.len(), "Chunked document");

        self.put_node(
            GraphNode::Documentation(DocumentationNode {
                title: title.to_string(),
                source_uri: uri.to_string(),
                source_type: source_type.to_string(),
                service_slug: service_slug.to_string(),
                chunk_count: chunks.len(),
            }),
            report,
        )
        .await;

        let mut keys = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let mentions: Vec<&String> = matchers
                .iter()
                .filter(|(_, re)| re.is_match(&chunk.content))
                .map(|(key, _)| key)
                .collect();
            let node = GraphNode::DocChunk(chunk);
            let key = node.key();
            self.put_node(node, report).await;
            report.chunks += 1;

            self.put_edge(GraphEdge::new(&key, &doc_key, EdgeType::PartOf), report)
                .await;
            if let Some(prev) = keys.last() {
                self.put_edge(GraphEdge::new(prev, &key, EdgeType::FollowsChunk), report)
                    .await;
            }
            for entity_key in mentions {
                self.put_edge(
                    GraphEdge::new(&key, entity_key, EdgeType::RelatesToEntity),
                    report,
                )
                .await;
            }
            keys.push(key);
        }
        keys
    }

    async fn put_node(&self, node: GraphNode, report: &mut IndexReport) {
        match self.driver.store_node(&node).await {
            Ok(()) => report.nodes_written += 1,
            Err(e) => {
                warn!(node_key = %node.key(), error = %e, "Failed to store node");
                report.failures += 1;
            }
        }
    }

    async fn put_edge(&self, edge: GraphEdge, report: &mut IndexReport) {
        match self.driver.store_edge(&edge).await {
            Ok(()) => report.edges_written += 1,
            Err(e) => {
                warn!(
                    from = %edge.from_key,
                    to = %edge.to_key,
                    edge_type = %edge.edge_type,
                    error = %e,
                    "Failed to store edge"
                );
                report.failures += 1;
            }
        }
    }
}

/// One entity per tag name, merged across services in first-seen order.
fn merge_entities(handbook: &Handbook) -> Vec<EntityDraft> {
    let mut drafts: Vec<EntityDraft> = Vec::new();

    fn draft_for<'a>(drafts: &'a mut Vec<EntityDraft>, name: &str, slug: &str) -> &'a mut EntityDraft {
        let idx = match drafts.iter().position(|d| d.node.name == name) {
            Some(idx) => idx,
            None => {
                drafts.push(EntityDraft {
                    node: EntityNode {
                        name: name.to_string(),
                        description: String::new(),
                        service_slug: slug.to_string(),
                        operation_ids: Vec::new(),
                    },
                    fields: Vec::new(),
                });
                drafts.len() - 1
            }
        };
        &mut drafts[idx]
    }

    for service in &handbook.services {
        for tag in &service.tags {
            let draft = draft_for(&mut drafts, &tag.name, &service.slug);
            if draft.node.description.is_empty() {
                draft.node.description = tag.description.clone();
            }
            let entity_key = raw_key(NodeKind::Entity, &tag.name);
            for field in &tag.fields {
                if draft.fields.iter().any(|f| f.name == field.name) {
                    continue;
                }
                draft.fields.push(FieldNode {
                    name: field.name.clone(),
                    description: field.description.clone(),
                    field_type: field.field_type.clone(),
                    entity_key: entity_key.clone(),
                    service_slug: service.slug.clone(),
                    source: "openapi".to_string(),
                });
            }
        }
        for op in &service.operations {
            for tag in &op.tags {
                let draft = draft_for(&mut drafts, tag, &service.slug);
                if !draft.node.operation_ids.contains(&op.operation_id) {
                    draft.node.operation_ids.push(op.operation_id.clone());
                }
            }
        }
    }
    drafts
}

/// Case-insensitive whole-word matchers for entity names.
fn entity_matchers(entities: &[EntityDraft]) -> Vec<(String, Regex)> {
    entities
        .iter()
        .filter_map(|d| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(&d.node.name));
            match Regex::new(&pattern) {
                Ok(re) => Some((raw_key(NodeKind::Entity, &d.node.name), re)),
                Err(e) => {
                    warn!(entity = %d.node.name, error = %e, "Skipping entity matcher");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::config::GraphConfig;
    use folio_core::types::ContextCategory;
    use folio_graph::InMemoryDriver;

    const HANDBOOK: &str = r#"{
        "name": "shop",
        "services": [
            {
                "slug": "orders",
                "tags": [{"name": "Order", "description": "A customer order",
                          "fields": [{"name": "total", "type": "number"},
                                     {"name": "status", "type": "string"}]}],
                "operations": [
                    {"operation_id": "Retrieve", "method": "get", "path": "/orders/{id}",
                     "summary": "Fetch an order", "tags": ["Order"],
                     "description": "Returns the order with its line items.",
                     "examples": [{"name": "found", "response": {"id": 1}, "status": 200}]},
                    {"operation_id": "List", "method": "get", "path": "/orders",
                     "tags": ["Order"]}
                ]
            },
            {
                "slug": "billing",
                "tags": [{"name": "Order", "fields": [{"name": "total", "type": "number"}]},
                         {"name": "Invoice"}],
                "operations": [
                    {"operation_id": "Bill", "method": "post", "path": "/invoices",
                     "tags": ["Invoice", "Order"]}
                ]
            }
        ],
        "documents": [
            {"uri": "docs/orders.md", "title": "Orders", "entities": ["Order"],
             "content": "Every order is billed through an invoice."}
        ]
    }"#;

    async fn indexed(config: GraphConfig) -> (Arc<InMemoryDriver>, IndexReport) {
        let driver = Arc::new(InMemoryDriver::new(&config));
        let handbook = Handbook::from_json_str(HANDBOOK).unwrap();
        let indexer = IndexingOrchestrator::new(driver.clone(), ChunkingConfig::default(), false);
        let report = indexer.index_handbook(&handbook).await.unwrap();
        (driver, report)
    }

    #[tokio::test]
    async fn test_index_report_counts() {
        let (driver, report) = indexed(GraphConfig::default()).await;
        assert!(report.initialized);
        assert_eq!(report.entities, 2);
        assert_eq!(report.operations, 3);
        assert_eq!(report.documents, 1);
        // one markdown chunk + one operation-description chunk
        assert_eq!(report.chunks, 2);
        assert_eq!(report.failures, 0);
        assert_eq!(report.nodes_written, driver.node_count());
        assert_eq!(report.edges_written, driver.edge_count());
    }

    #[tokio::test]
    async fn test_entities_merge_across_services() {
        let (driver, _) = indexed(GraphConfig::default()).await;
        let ctx = driver
            .query_context("entity|Order", &[ContextCategory::Operations, ContextCategory::Fields])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx["entity"]["description"], "A customer order");
        let ops: Vec<_> = ctx["operations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["operationId"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ops, vec!["Retrieve", "List", "Bill"]);
        assert_eq!(ctx["fields"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_documentation_links() {
        let (driver, _) = indexed(GraphConfig::default()).await;
        let op = driver
            .query_operation_for_prompt("operation|Retrieve")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(op["signature"], "GET /orders/{id} () -> 200");
        assert_eq!(op["examples"][0]["responseBody"], r#"{"id":1}"#);
        assert_eq!(
            op["documentation"][0]["content"],
            "Returns the order with its line items."
        );

        // the markdown chunk mentions Invoice, so it relates to that entity
        let invoice = driver
            .query_context("entity|Invoice", &[ContextCategory::Documentation])
            .await
            .unwrap()
            .unwrap();
        let docs = invoice["documentation"].as_array().unwrap();
        assert!(docs
            .iter()
            .any(|d| d["sourceUri"] == "docs/orders.md"));
    }

    #[tokio::test]
    async fn test_disabled_chunking_stores_whole_document() {
        let driver = Arc::new(InMemoryDriver::new(&GraphConfig::default()));
        let mut handbook = Handbook::from_json_str(HANDBOOK).unwrap();
        let long: String = (0..80)
            .map(|i| format!("Paragraph {} about orders and refunds.\n\n", i))
            .collect();
        handbook.documents[0].content = long.clone();

        let mut chunking = ChunkingConfig::default();
        chunking.overrides.insert("markdown".into(), "false".into());
        let report = IndexingOrchestrator::new(driver.clone(), chunking, false)
            .index_handbook(&handbook)
            .await
            .unwrap();
        assert_eq!(report.chunks, 2);

        let diag = driver
            .query_graph_diagnostics("chunk|docs/orders.md#0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(diag["exists"], true);
        assert!(driver
            .query_graph_diagnostics("chunk|docs/orders.md#1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reindex_without_clear_counts_failures() {
        let driver = Arc::new(InMemoryDriver::new(&GraphConfig::default()));
        let handbook = Handbook::from_json_str(HANDBOOK).unwrap();

        let additive = IndexingOrchestrator::new(driver.clone(), ChunkingConfig::default(), false);
        additive.index_handbook(&handbook).await.unwrap();
        let second = additive.index_handbook(&handbook).await.unwrap();
        assert!(second.failures > 0);
        assert_eq!(second.nodes_written, 0);

        let rebuild = IndexingOrchestrator::new(driver.clone(), ChunkingConfig::default(), true);
        let third = rebuild.index_handbook(&handbook).await.unwrap();
        assert_eq!(third.failures, 0);
    }

    #[tokio::test]
    async fn test_disabled_backend_skips() {
        let config = GraphConfig {
            enabled: false,
            ..GraphConfig::default()
        };
        let (driver, report) = indexed(config).await;
        assert!(!report.initialized);
        assert_eq!(report.nodes_written, 0);
        assert_eq!(driver.node_count(), 0);
    }
}
