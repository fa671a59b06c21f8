use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};

use folio_core::config::GraphConfig;
use folio_core::error::{FolioError, Result};
use folio_core::types::ContextCategory;

use crate::memory::InMemoryDriver;
use crate::model::{GraphEdge, GraphNode, Properties};
use crate::sqlite::SqliteDriver;

/// Storage backend for the knowledge graph.
///
/// A driver that is disabled or failed to come up stays uninitialized: writes
/// are no-ops and reads return `None`, so indexing and retrieval degrade instead
/// of failing. Keys passed to any method are sanitized with
/// [`crate::model::sanitize_key`] before use.
pub trait GraphDriver: Send + Sync + 'static {
    /// Backend identifier (e.g. "memory", "sqlite").
    fn id(&self) -> &str;

    /// Open connections and create schema. Never fails for a disabled backend.
    fn initialize(&self) -> BoxFuture<'_, Result<()>>;

    fn is_initialized(&self) -> bool;

    /// Persist a node. Fails if a node with the same key already exists.
    fn store_node(&self, node: &GraphNode) -> BoxFuture<'_, Result<()>>;

    /// Persist an edge. Fails if the same (from, to, type) edge already exists.
    fn store_edge(&self, edge: &GraphEdge) -> BoxFuture<'_, Result<()>>;

    /// Entity properties plus the requested context categories (all when empty).
    fn query_context(
        &self,
        entity_key: &str,
        categories: &[ContextCategory],
    ) -> BoxFuture<'_, Result<Option<Properties>>>;

    /// Operation properties with its examples and documentation chunks.
    fn query_operation_for_prompt(
        &self,
        operation_key: &str,
    ) -> BoxFuture<'_, Result<Option<Properties>>>;

    /// Edge statistics around an operation node.
    fn query_graph_diagnostics(
        &self,
        operation_key: &str,
    ) -> BoxFuture<'_, Result<Option<Properties>>>;

    /// Remove every node and edge.
    fn clear(&self) -> BoxFuture<'_, Result<()>>;

    fn shutdown(&self) -> BoxFuture<'_, Result<()>>;
}

/// Factory for one backend kind.
pub trait DriverProvider: Send + Sync {
    fn id(&self) -> &'static str;

    /// Whether this backend can be built from the given configuration.
    fn is_available(&self, config: &GraphConfig) -> bool;

    fn create(&self, config: &GraphConfig, handbook_name: &str) -> Result<Arc<dyn GraphDriver>>;
}

/// Provider for [`InMemoryDriver`]. Always available.
pub struct MemoryProvider;

impl DriverProvider for MemoryProvider {
    fn id(&self) -> &'static str {
        "memory"
    }

    fn is_available(&self, _config: &GraphConfig) -> bool {
        true
    }

    fn create(&self, config: &GraphConfig, _handbook_name: &str) -> Result<Arc<dyn GraphDriver>> {
        Ok(Arc::new(InMemoryDriver::new(config)))
    }
}

/// Provider for [`SqliteDriver`]. Available when `[graph.sqlite]` is configured.
pub struct SqliteProvider;

impl DriverProvider for SqliteProvider {
    fn id(&self) -> &'static str {
        "sqlite"
    }

    fn is_available(&self, config: &GraphConfig) -> bool {
        config.sqlite.is_some()
    }

    fn create(&self, config: &GraphConfig, handbook_name: &str) -> Result<Arc<dyn GraphDriver>> {
        let sqlite = config
            .sqlite
            .as_ref()
            .ok_or_else(|| FolioError::Config("sqlite backend requires [graph.sqlite]".into()))?;
        Ok(Arc::new(SqliteDriver::open(
            sqlite.db_path(handbook_name),
            config,
        )))
    }
}

/// Registry of backend providers, consulted in registration order.
pub struct DriverRegistry {
    providers: Vec<Box<dyn DriverProvider>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Register a provider. Later registrations have lower fallback priority.
    pub fn register(&mut self, provider: impl DriverProvider + 'static) {
        self.providers.push(Box::new(provider));
    }

    /// Registry with the built-in backends: sqlite first, then memory.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(SqliteProvider);
        registry.register(MemoryProvider);
        registry
    }

    /// Ids of all registered providers.
    pub fn ids(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    /// Pick and build a driver.
    ///
    /// A configured preference must name an available provider. Without one, the
    /// first available provider wins.
    pub fn select(&self, config: &GraphConfig, handbook_name: &str) -> Result<Arc<dyn GraphDriver>> {
        let provider = match config.backend.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            Some(preferred) => {
                let provider = self
                    .providers
                    .iter()
                    .find(|p| p.id().eq_ignore_ascii_case(preferred))
                    .ok_or_else(|| {
                        FolioError::Config(format!(
                            "unknown graph backend '{}' (known: {})",
                            preferred,
                            self.ids().join(", ")
                        ))
                    })?;
                if !provider.is_available(config) {
                    return Err(FolioError::Config(format!(
                        "graph backend '{}' is not available with the current configuration",
                        preferred
                    )));
                }
                provider
            }
            None => self
                .providers
                .iter()
                .find(|p| {
                    let available = p.is_available(config);
                    debug!(backend = p.id(), available, "Probing graph backend");
                    available
                })
                .ok_or_else(|| FolioError::Config("no graph backend available".into()))?,
        };

        info!(backend = provider.id(), handbook = handbook_name, "Selected graph backend");
        provider.create(config, handbook_name)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
