use serde::{Deserialize, Serialize};

use folio_core::error::{FolioError, Result};

/// Serialized property map of a node or edge.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Namespace of a node key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Entity,
    Operation,
    Field,
    Example,
    DocChunk,
    Documentation,
}

impl NodeKind {
    /// Prefix used in `kind|name` keys.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Operation => "operation",
            Self::Field => "field",
            Self::Example => "example",
            Self::DocChunk => "chunk",
            Self::Documentation => "doc",
        }
    }
}

/// Unsanitized `kind|name` key.
pub fn raw_key(kind: NodeKind, name: &str) -> String {
    format!("{}|{}", kind.prefix(), name)
}

/// Storage-safe form of a key: `|` becomes `_`.
///
/// Every driver persists and looks up keys in this form. Applying it to an
/// already sanitized key is a no-op.
pub fn sanitize_key(key: &str) -> String {
    key.replace('|', "_")
}

/// Storage-safe key for a `(kind, name)` pair.
pub fn node_key(kind: NodeKind, name: &str) -> String {
    sanitize_key(&raw_key(kind, name))
}

/// Name part of a raw `kind|name` key.
fn key_name(key: &str) -> &str {
    key.split_once('|').map(|(_, name)| name).unwrap_or(key)
}

/// A business concept, one per OpenAPI tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityNode {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub service_slug: String,
    #[serde(default)]
    pub operation_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationNode {
    pub operation_id: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub service_slug: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub example_keys: Vec<String>,
    #[serde(default)]
    pub doc_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldNode {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub field_type: String,
    /// Raw key of the owning entity.
    pub entity_key: String,
    #[serde(default)]
    pub service_slug: String,
    /// Where the field definition came from (e.g. "openapi").
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExampleNode {
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub request_body: Option<String>,
    #[serde(default)]
    pub response_body: Option<String>,
    #[serde(default)]
    pub response_status: Option<u16>,
    /// Raw key of the owning operation.
    pub operation_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocChunkNode {
    pub content: String,
    pub source_uri: String,
    pub source_type: String,
    pub chunk_index: usize,
    /// Byte offset of `content` in the source document.
    pub start_offset: usize,
    pub end_offset: usize,
    #[serde(default)]
    pub title: String,
    /// Raw key of the parent documentation node.
    pub parent_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentationNode {
    #[serde(default)]
    pub title: String,
    pub source_uri: String,
    pub source_type: String,
    #[serde(default)]
    pub service_slug: String,
    #[serde(default)]
    pub chunk_count: usize,
}

/// A node in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "nodeType")]
pub enum GraphNode {
    Entity(EntityNode),
    Operation(OperationNode),
    Field(FieldNode),
    Example(ExampleNode),
    DocChunk(DocChunkNode),
    Documentation(DocumentationNode),
}

impl GraphNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Entity(_) => NodeKind::Entity,
            Self::Operation(_) => NodeKind::Operation,
            Self::Field(_) => NodeKind::Field,
            Self::Example(_) => NodeKind::Example,
            Self::DocChunk(_) => NodeKind::DocChunk,
            Self::Documentation(_) => NodeKind::Documentation,
        }
    }

    /// Discriminator stored alongside the properties.
    pub fn node_type(&self) -> &'static str {
        match self {
            Self::Entity(_) => "Entity",
            Self::Operation(_) => "Operation",
            Self::Field(_) => "Field",
            Self::Example(_) => "Example",
            Self::DocChunk(_) => "DocChunk",
            Self::Documentation(_) => "Documentation",
        }
    }

    /// Unsanitized `kind|name` key.
    pub fn key(&self) -> String {
        let name = match self {
            Self::Entity(n) => n.name.clone(),
            Self::Operation(n) => n.operation_id.clone(),
            Self::Field(n) => format!("{}.{}", key_name(&n.entity_key), n.name),
            Self::Example(n) => format!("{}:{}", key_name(&n.operation_key), n.name),
            Self::DocChunk(n) => format!("{}#{}", n.source_uri, n.chunk_index),
            Self::Documentation(n) => n.source_uri.clone(),
        };
        raw_key(self.kind(), &name)
    }

    /// Key under which the node is persisted.
    pub fn storage_key(&self) -> String {
        sanitize_key(&self.key())
    }

    /// Property map including the `nodeType` discriminator.
    pub fn properties(&self) -> Result<Properties> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(FolioError::Storage(format!(
                "node serialized to non-object: {}",
                other
            ))),
        }
    }

    /// Rebuild a node from its property map.
    pub fn from_properties(props: Properties) -> Result<Self> {
        Ok(serde_json::from_value(serde_json::Value::Object(props))?)
    }
}

/// Relationship vocabulary of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    HasOperation,
    HasExample,
    HasDocumentation,
    FollowsChunk,
    PartOf,
    RelatesTo,
    RelatesToEntity,
    Demonstrates,
    Describes,
    DependsOn,
    /// Reserved.
    HasFeedback,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HasOperation => "HAS_OPERATION",
            Self::HasExample => "HAS_EXAMPLE",
            Self::HasDocumentation => "HAS_DOCUMENTATION",
            Self::FollowsChunk => "FOLLOWS_CHUNK",
            Self::PartOf => "PART_OF",
            Self::RelatesTo => "RELATES_TO",
            Self::RelatesToEntity => "RELATES_TO_ENTITY",
            Self::Demonstrates => "DEMONSTRATES",
            Self::Describes => "DESCRIBES",
            Self::DependsOn => "DEPENDS_ON",
            Self::HasFeedback => "HAS_FEEDBACK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed, typed relationship between two node keys.
///
/// Edges reference nodes by key only; the target need not exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub from_key: String,
    pub to_key: String,
    pub edge_type: EdgeType,
    #[serde(default)]
    pub properties: Properties,
}

impl GraphEdge {
    pub fn new(from_key: impl Into<String>, to_key: impl Into<String>, edge_type: EdgeType) -> Self {
        Self {
            from_key: from_key.into(),
            to_key: to_key.into(),
            edge_type,
            properties: Properties::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Copy of the edge with both endpoints in storage-safe form.
    pub fn sanitized(&self) -> Self {
        Self {
            from_key: sanitize_key(&self.from_key),
            to_key: sanitize_key(&self.to_key),
            edge_type: self.edge_type,
            properties: self.properties.clone(),
        }
    }
}
