//! Knowledge graph storage for handbook content.
//!
//! Indexed handbook content is persisted as typed [`GraphNode`]s linked by typed
//! [`GraphEdge`]s through a [`GraphDriver`]. Drivers are chosen at startup from a
//! [`DriverRegistry`] of providers; the in-memory driver needs no external
//! dependency and the SQLite driver persists one database per handbook.

pub mod driver;
pub mod memory;
pub mod model;
pub mod query;
pub mod sqlite;

pub use driver::{DriverProvider, DriverRegistry, GraphDriver};
pub use memory::InMemoryDriver;
pub use model::{
    node_key, raw_key, sanitize_key, DocChunkNode, DocumentationNode, EdgeType, EntityNode,
    ExampleNode, FieldNode, GraphEdge, GraphNode, NodeKind, OperationNode, Properties,
};
pub use sqlite::SqliteDriver;
