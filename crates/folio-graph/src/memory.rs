use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use futures::future::BoxFuture;
use tracing::debug;

use folio_core::config::GraphConfig;
use folio_core::error::{FolioError, Result};
use folio_core::types::ContextCategory;

use crate::driver::GraphDriver;
use crate::model::{sanitize_key, EdgeType, GraphEdge, GraphNode, Properties};
use crate::query::{self, GraphView};

#[derive(Default)]
struct MemoryGraph {
    nodes: HashMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
    edge_ids: HashSet<(String, String, EdgeType)>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
}

impl GraphView for MemoryGraph {
    fn node(&self, key: &str) -> Result<Option<GraphNode>> {
        Ok(self.nodes.get(key).cloned())
    }

    fn edges_from(&self, key: &str) -> Result<Vec<GraphEdge>> {
        Ok(self
            .outgoing
            .get(key)
            .map(|idx| idx.iter().map(|&i| self.edges[i].clone()).collect())
            .unwrap_or_default())
    }

    fn edges_to(&self, key: &str) -> Result<Vec<GraphEdge>> {
        Ok(self
            .incoming
            .get(key)
            .map(|idx| idx.iter().map(|&i| self.edges[i].clone()).collect())
            .unwrap_or_default())
    }
}

/// Graph driver holding everything in process memory.
///
/// Needs no external service; used for tests and for running without a
/// database. Contents are lost on shutdown.
pub struct InMemoryDriver {
    enabled: bool,
    max_chunks: usize,
    initialized: AtomicBool,
    graph: RwLock<MemoryGraph>,
}

impl InMemoryDriver {
    pub fn new(config: &GraphConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_chunks: config.max_context_chunks,
            initialized: AtomicBool::new(false),
            graph: RwLock::new(MemoryGraph::default()),
        }
    }

    /// Number of stored nodes.
    pub fn node_count(&self) -> usize {
        self.graph.read().map(|g| g.nodes.len()).unwrap_or(0)
    }

    /// Number of stored edges.
    pub fn edge_count(&self) -> usize {
        self.graph.read().map(|g| g.edges.len()).unwrap_or(0)
    }

    fn read_with<T>(&self, f: impl FnOnce(&MemoryGraph) -> Result<Option<T>>) -> Result<Option<T>> {
        if !self.is_initialized() {
            return Ok(None);
        }
        let graph = self
            .graph
            .read()
            .map_err(|e| FolioError::Storage(e.to_string()))?;
        f(&graph)
    }
}

impl GraphDriver for InMemoryDriver {
    fn id(&self) -> &str {
        "memory"
    }

    fn initialize(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.enabled {
                debug!("Memory graph backend disabled, staying uninitialized");
                return Ok(());
            }
            self.initialized.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn store_node(&self, node: &GraphNode) -> BoxFuture<'_, Result<()>> {
        let node = node.clone();
        Box::pin(async move {
            if !self.is_initialized() {
                return Ok(());
            }
            let key = node.storage_key();
            let mut graph = self
                .graph
                .write()
                .map_err(|e| FolioError::Storage(e.to_string()))?;
            if graph.nodes.contains_key(&key) {
                return Err(FolioError::Storage(format!("duplicate node key: {}", key)));
            }
            graph.nodes.insert(key, node);
            Ok(())
        })
    }

    fn store_edge(&self, edge: &GraphEdge) -> BoxFuture<'_, Result<()>> {
        let edge = edge.sanitized();
        Box::pin(async move {
            if !self.is_initialized() {
                return Ok(());
            }
            let mut graph = self
                .graph
                .write()
                .map_err(|e| FolioError::Storage(e.to_string()))?;
            let id = (edge.from_key.clone(), edge.to_key.clone(), edge.edge_type);
            if !graph.edge_ids.insert(id) {
                return Err(FolioError::Storage(format!(
                    "duplicate edge: {} -[{}]-> {}",
                    edge.from_key, edge.edge_type, edge.to_key
                )));
            }
            let idx = graph.edges.len();
            graph.outgoing.entry(edge.from_key.clone()).or_default().push(idx);
            graph.incoming.entry(edge.to_key.clone()).or_default().push(idx);
            graph.edges.push(edge);
            Ok(())
        })
    }

    fn query_context(
        &self,
        entity_key: &str,
        categories: &[ContextCategory],
    ) -> BoxFuture<'_, Result<Option<Properties>>> {
        let key = sanitize_key(entity_key);
        let categories = categories.to_vec();
        Box::pin(async move {
            self.read_with(|g| query::entity_context(g, &key, &categories, self.max_chunks))
        })
    }

    fn query_operation_for_prompt(
        &self,
        operation_key: &str,
    ) -> BoxFuture<'_, Result<Option<Properties>>> {
        let key = sanitize_key(operation_key);
        Box::pin(async move {
            self.read_with(|g| query::operation_for_prompt(g, &key, self.max_chunks))
        })
    }

    fn query_graph_diagnostics(
        &self,
        operation_key: &str,
    ) -> BoxFuture<'_, Result<Option<Properties>>> {
        let key = sanitize_key(operation_key);
        Box::pin(async move { self.read_with(|g| query::diagnostics(g, &key)) })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut graph = self
                .graph
                .write()
                .map_err(|e| FolioError::Storage(e.to_string()))?;
            *graph = MemoryGraph::default();
            Ok(())
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.initialized.store(false, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        node_key, raw_key, DocChunkNode, EntityNode, ExampleNode, FieldNode, NodeKind,
        OperationNode,
    };

    fn entity(name: &str) -> GraphNode {
        GraphNode::Entity(EntityNode {
            name: name.into(),
            description: format!("{} entity", name),
            service_slug: "shop".into(),
            operation_ids: vec![],
        })
    }

    fn operation(id: &str) -> GraphNode {
        GraphNode::Operation(OperationNode {
            operation_id: id.into(),
            method: "GET".into(),
            path: format!("/{}", id),
            summary: String::new(),
            description: String::new(),
            service_slug: "shop".into(),
            tags: vec!["Order".into()],
            signature: format!("GET /{}", id),
            example_keys: vec![],
            doc_uri: None,
        })
    }

    fn chunk(uri: &str, index: usize, content: &str) -> GraphNode {
        GraphNode::DocChunk(DocChunkNode {
            content: content.into(),
            source_uri: uri.into(),
            source_type: "markdown".into(),
            chunk_index: index,
            start_offset: 0,
            end_offset: content.len(),
            title: "Orders".into(),
            parent_key: raw_key(NodeKind::Documentation, uri),
        })
    }

    async fn seeded() -> InMemoryDriver {
        let driver = InMemoryDriver::new(&GraphConfig::default());
        driver.initialize().await.unwrap();

        driver.store_node(&entity("Order")).await.unwrap();
        driver.store_node(&operation("retrieveOrder")).await.unwrap();
        driver.store_node(&operation("listOrders")).await.unwrap();
        driver
            .store_node(&GraphNode::Field(FieldNode {
                name: "total".into(),
                description: "Order total".into(),
                field_type: "number".into(),
                entity_key: raw_key(NodeKind::Entity, "Order"),
                service_slug: "shop".into(),
                source: "openapi".into(),
            }))
            .await
            .unwrap();
        driver
            .store_node(&GraphNode::Example(ExampleNode {
                name: "found".into(),
                summary: "An order".into(),
                request_body: None,
                response_body: Some(r#"{"id":1}"#.into()),
                response_status: Some(200),
                operation_key: raw_key(NodeKind::Operation, "retrieveOrder"),
            }))
            .await
            .unwrap();
        driver.store_node(&chunk("docs/orders.md", 0, "Orders are...")).await.unwrap();

        let edges = [
            ("entity|Order", "operation|retrieveOrder", EdgeType::HasOperation),
            ("entity|Order", "operation|listOrders", EdgeType::HasOperation),
            ("field|Order.total", "entity|Order", EdgeType::PartOf),
            ("operation|retrieveOrder", "example|retrieveOrder:found", EdgeType::HasExample),
            ("operation|retrieveOrder", "chunk|docs/orders.md#0", EdgeType::HasDocumentation),
            // dangling: target never stored
            ("entity|Order", "operation|ghost", EdgeType::HasOperation),
        ];
        for (from, to, ty) in edges {
            driver.store_edge(&GraphEdge::new(from, to, ty)).await.unwrap();
        }
        driver
    }

    #[tokio::test]
    async fn test_query_context_all_categories() {
        let driver = seeded().await;
        let ctx = driver
            .query_context("entity|Order", &[])
            .await
            .unwrap()
            .expect("entity present");

        assert_eq!(ctx["entity"]["name"], "Order");
        assert_eq!(ctx["operations"].as_array().unwrap().len(), 2);
        assert_eq!(ctx["fields"].as_array().unwrap().len(), 1);
        assert_eq!(ctx["examples"].as_array().unwrap().len(), 1);
        let docs = ctx["documentation"].as_array().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["via"], "operation_retrieveOrder");
    }

    #[tokio::test]
    async fn test_query_context_selected_categories() {
        let driver = seeded().await;
        let ctx = driver
            .query_context(&node_key(NodeKind::Entity, "Order"), &[ContextCategory::Fields])
            .await
            .unwrap()
            .unwrap();
        assert!(ctx.contains_key("fields"));
        assert!(!ctx.contains_key("operations"));
        assert!(!ctx.contains_key("documentation"));
    }

    #[tokio::test]
    async fn test_unknown_entity_is_none() {
        let driver = seeded().await;
        assert!(driver.query_context("entity|Nope", &[]).await.unwrap().is_none());
        // an operation key is not an entity
        assert!(driver
            .query_context("operation|retrieveOrder", &[])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_node_and_edge_fail() {
        let driver = seeded().await;
        let err = driver.store_node(&entity("Order")).await.unwrap_err();
        assert!(err.to_string().contains("duplicate node key"));

        let err = driver
            .store_edge(&GraphEdge::new(
                "entity|Order",
                "operation|listOrders",
                EdgeType::HasOperation,
            ))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate edge"));
        assert_eq!(driver.node_count(), 6);
    }

    #[tokio::test]
    async fn test_operation_for_prompt() {
        let driver = seeded().await;
        let op = driver
            .query_operation_for_prompt("operation_retrieveOrder")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(op["operationId"], "retrieveOrder");
        assert_eq!(op["examples"].as_array().unwrap().len(), 1);
        assert_eq!(op["documentation"].as_array().unwrap().len(), 1);
        assert!(driver
            .query_operation_for_prompt("operation|ghost")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_diagnostics_counts_dangling_edges() {
        let driver = seeded().await;
        let diag = driver
            .query_graph_diagnostics("operation|ghost")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(diag["exists"], false);
        assert_eq!(diag["incoming"]["HAS_OPERATION"], 1);
        assert_eq!(diag["danglingEdges"], 0);

        let diag = driver
            .query_graph_diagnostics("operation|retrieveOrder")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(diag["exists"], true);
        assert_eq!(diag["outgoing"]["HAS_EXAMPLE"], 1);

        assert!(driver
            .query_graph_diagnostics("operation|never")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_disabled_backend_is_inert() {
        let config = GraphConfig {
            enabled: false,
            ..GraphConfig::default()
        };
        let driver = InMemoryDriver::new(&config);
        driver.initialize().await.unwrap();
        assert!(!driver.is_initialized());

        driver.store_node(&entity("Order")).await.unwrap();
        driver
            .store_edge(&GraphEdge::new("a", "b", EdgeType::RelatesTo))
            .await
            .unwrap();
        assert_eq!(driver.node_count(), 0);
        assert!(driver.query_context("entity|Order", &[]).await.unwrap().is_none());
        assert!(driver
            .query_graph_diagnostics("operation|x")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_clear_allows_reindex() {
        let driver = seeded().await;
        driver.clear().await.unwrap();
        assert_eq!(driver.node_count(), 0);
        assert_eq!(driver.edge_count(), 0);
        driver.store_node(&entity("Order")).await.unwrap();
        assert_eq!(driver.node_count(), 1);
    }
}
