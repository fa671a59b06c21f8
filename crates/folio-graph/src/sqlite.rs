use std::path::{Path, PathBuf};
use std::sync::Mutex;

use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use folio_core::config::GraphConfig;
use folio_core::error::{FolioError, Result};
use folio_core::types::ContextCategory;

use crate::driver::GraphDriver;
use crate::model::{sanitize_key, EdgeType, GraphEdge, GraphNode, Properties};
use crate::query::{self, GraphView};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS nodes (
        key TEXT PRIMARY KEY,
        node_type TEXT NOT NULL,
        properties TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS edges (
        from_key TEXT NOT NULL,
        to_key TEXT NOT NULL,
        edge_type TEXT NOT NULL,
        properties TEXT NOT NULL,
        PRIMARY KEY (from_key, to_key, edge_type)
    );

    CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_key);";

fn db_err(e: rusqlite::Error) -> FolioError {
    FolioError::Storage(e.to_string())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// SQLite-backed graph driver, one database file per handbook.
///
/// The connection is opened lazily by [`GraphDriver::initialize`]; until then
/// the driver behaves as uninitialized.
pub struct SqliteDriver {
    path: PathBuf,
    enabled: bool,
    max_chunks: usize,
    conn: Mutex<Option<Connection>>,
}

impl SqliteDriver {
    pub fn open(path: PathBuf, config: &GraphConfig) -> Self {
        Self {
            path,
            enabled: config.enabled,
            max_chunks: config.max_context_chunks,
            conn: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(path: &Path) -> Result<Connection> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FolioError::Storage(format!("Failed to create graph directory: {}", e))
            })?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(conn)
    }

    /// Run `f` against the open connection, or return `None` when uninitialized.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<Option<T>>) -> Result<Option<T>> {
        let guard = self.conn.lock().map_err(|e| FolioError::Storage(e.to_string()))?;
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Ok(None),
        }
    }
}

struct SqliteView<'a> {
    conn: &'a Connection,
}

impl SqliteView<'_> {
    fn edges(&self, sql: &str, key: &str) -> Result<Vec<GraphEdge>> {
        let mut stmt = self.conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(db_err)?;

        let mut edges = Vec::new();
        for row in rows {
            let (from_key, to_key, edge_type, props) = row.map_err(db_err)?;
            let Some(edge_type) = EdgeType::parse(&edge_type) else {
                warn!(edge_type = %edge_type, "Skipping edge with unknown type");
                continue;
            };
            let properties: Properties = serde_json::from_str(&props)?;
            edges.push(GraphEdge {
                from_key,
                to_key,
                edge_type,
                properties,
            });
        }
        Ok(edges)
    }
}

impl GraphView for SqliteView<'_> {
    fn node(&self, key: &str) -> Result<Option<GraphNode>> {
        let props: Option<String> = self
            .conn
            .query_row(
                "SELECT properties FROM nodes WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match props {
            Some(json) => {
                let props: Properties = serde_json::from_str(&json)?;
                Ok(Some(GraphNode::from_properties(props)?))
            }
            None => Ok(None),
        }
    }

    fn edges_from(&self, key: &str) -> Result<Vec<GraphEdge>> {
        self.edges(
            "SELECT from_key, to_key, edge_type, properties FROM edges
             WHERE from_key = ?1 ORDER BY rowid",
            key,
        )
    }

    fn edges_to(&self, key: &str) -> Result<Vec<GraphEdge>> {
        self.edges(
            "SELECT from_key, to_key, edge_type, properties FROM edges
             WHERE to_key = ?1 ORDER BY rowid",
            key,
        )
    }
}

impl GraphDriver for SqliteDriver {
    fn id(&self) -> &str {
        "sqlite"
    }

    fn initialize(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.enabled {
                debug!("SQLite graph backend disabled, staying uninitialized");
                return Ok(());
            }
            let mut guard = self.conn.lock().map_err(|e| FolioError::Storage(e.to_string()))?;
            if guard.is_none() {
                *guard = Some(Self::connect(&self.path)?);
                debug!(path = %self.path.display(), "SQLite graph opened");
            }
            Ok(())
        })
    }

    fn is_initialized(&self) -> bool {
        self.conn.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    fn store_node(&self, node: &GraphNode) -> BoxFuture<'_, Result<()>> {
        let node = node.clone();
        Box::pin(async move {
            let key = node.storage_key();
            let props = serde_json::to_string(&node.properties()?)?;
            self.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO nodes (key, node_type, properties) VALUES (?1, ?2, ?3)",
                    params![key, node.node_type(), props],
                )
                .map_err(|e| {
                    if is_constraint_violation(&e) {
                        FolioError::Storage(format!("duplicate node key: {}", key))
                    } else {
                        db_err(e)
                    }
                })?;
                Ok(Some(()))
            })?;
            Ok(())
        })
    }

    fn store_edge(&self, edge: &GraphEdge) -> BoxFuture<'_, Result<()>> {
        let edge = edge.sanitized();
        Box::pin(async move {
            let props = serde_json::to_string(&edge.properties)?;
            self.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO edges (from_key, to_key, edge_type, properties)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![edge.from_key, edge.to_key, edge.edge_type.as_str(), props],
                )
                .map_err(|e| {
                    if is_constraint_violation(&e) {
                        FolioError::Storage(format!(
                            "duplicate edge: {} -[{}]-> {}",
                            edge.from_key, edge.edge_type, edge.to_key
                        ))
                    } else {
                        db_err(e)
                    }
                })?;
                Ok(Some(()))
            })?;
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
            self.with_conn(|conn| {
                query::entity_context(&SqliteView { conn }, &key, &categories, self.max_chunks)
            })
        })
    }

    fn query_operation_for_prompt(
        &self,
        operation_key: &str,
    ) -> BoxFuture<'_, Result<Option<Properties>>> {
        let key = sanitize_key(operation_key);
        Box::pin(async move {
            self.with_conn(|conn| {
                query::operation_for_prompt(&SqliteView { conn }, &key, self.max_chunks)
            })
        })
    }

    fn query_graph_diagnostics(
        &self,
        operation_key: &str,
    ) -> BoxFuture<'_, Result<Option<Properties>>> {
        let key = sanitize_key(operation_key);
        Box::pin(async move {
            self.with_conn(|conn| query::diagnostics(&SqliteView { conn }, &key))
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.with_conn(|conn| {
                conn.execute_batch("DELETE FROM edges; DELETE FROM nodes;")
                    .map_err(db_err)?;
                Ok(Some(()))
            })?;
            Ok(())
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut guard = self.conn.lock().map_err(|e| FolioError::Storage(e.to_string()))?;
            if guard.take().is_some() {
                debug!(path = %self.path.display(), "SQLite graph closed");
            }
            Ok(())
        })
    }
}
