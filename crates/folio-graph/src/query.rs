//! Backend-independent assembly of context query results.
//!
//! Drivers expose a synchronous [`GraphView`] over their storage (taken while
//! holding their lock) and reuse these traversals so every backend answers the
//! same query with the same shape.

use std::collections::{BTreeMap, HashSet};

use serde_json::{json, Value};

use folio_core::error::Result;
use folio_core::types::ContextCategory;

use crate::model::{sanitize_key, EdgeType, GraphEdge, GraphNode, Properties};

/// Read access to stored nodes and edges. Keys are storage keys.
pub trait GraphView {
    fn node(&self, key: &str) -> Result<Option<GraphNode>>;

    fn edges_from(&self, key: &str) -> Result<Vec<GraphEdge>>;

    fn edges_to(&self, key: &str) -> Result<Vec<GraphEdge>>;
}

/// Node properties plus its storage key under `key`.
fn keyed_properties(key: &str, node: &GraphNode) -> Result<Properties> {
    let mut props = node.properties()?;
    props.insert("key".into(), Value::String(key.to_string()));
    Ok(props)
}

/// Targets of outgoing edges of one type, skipping dangling ends.
fn targets(view: &dyn GraphView, key: &str, edge_type: EdgeType) -> Result<Vec<(String, GraphNode)>> {
    let mut out = Vec::new();
    for edge in view.edges_from(key)? {
        if edge.edge_type != edge_type {
            continue;
        }
        if let Some(node) = view.node(&edge.to_key)? {
            out.push((edge.to_key, node));
        }
    }
    Ok(out)
}

/// Sources of incoming edges of one type, skipping dangling ends.
fn sources(view: &dyn GraphView, key: &str, edge_type: EdgeType) -> Result<Vec<(String, GraphNode)>> {
    let mut out = Vec::new();
    for edge in view.edges_to(key)? {
        if edge.edge_type != edge_type {
            continue;
        }
        if let Some(node) = view.node(&edge.from_key)? {
            out.push((edge.from_key, node));
        }
    }
    Ok(out)
}

/// Documentation chunks linked from `owner`, tagged with `via`.
fn documentation_of(
    view: &dyn GraphView,
    owner: &str,
    seen: &mut HashSet<String>,
    out: &mut Vec<Value>,
    limit: usize,
) -> Result<()> {
    for (key, node) in targets(view, owner, EdgeType::HasDocumentation)? {
        if out.len() >= limit {
            break;
        }
        if !matches!(node, GraphNode::DocChunk(_)) || !seen.insert(key.clone()) {
            continue;
        }
        let mut props = keyed_properties(&key, &node)?;
        props.insert("via".into(), Value::String(owner.to_string()));
        out.push(Value::Object(props));
    }
    Ok(())
}

/// Entity context: the entity plus the requested categories.
pub fn entity_context(
    view: &dyn GraphView,
    entity_key: &str,
    categories: &[ContextCategory],
    max_chunks: usize,
) -> Result<Option<Properties>> {
    let key = sanitize_key(entity_key);
    let entity = match view.node(&key)? {
        Some(node @ GraphNode::Entity(_)) => node,
        _ => return Ok(None),
    };

    let wanted: &[ContextCategory] = if categories.is_empty() {
        &ContextCategory::ALL
    } else {
        categories
    };
    let wants = |c: ContextCategory| wanted.contains(&c);

    let mut result = Properties::new();
    result.insert("entity".into(), Value::Object(keyed_properties(&key, &entity)?));

    let operations = targets(view, &key, EdgeType::HasOperation)?
        .into_iter()
        .filter(|(_, n)| matches!(n, GraphNode::Operation(_)))
        .collect::<Vec<_>>();

    if wants(ContextCategory::Operations) {
        let ops = operations
            .iter()
            .map(|(k, n)| keyed_properties(k, n).map(Value::Object))
            .collect::<Result<Vec<_>>>()?;
        result.insert("operations".into(), Value::Array(ops));
    }

    if wants(ContextCategory::Fields) {
        let fields = sources(view, &key, EdgeType::PartOf)?
            .into_iter()
            .filter(|(_, n)| matches!(n, GraphNode::Field(_)))
            .map(|(k, n)| keyed_properties(&k, &n).map(Value::Object))
            .collect::<Result<Vec<_>>>()?;
        result.insert("fields".into(), Value::Array(fields));
    }

    if wants(ContextCategory::Examples) {
        let mut examples = Vec::new();
        for (op_key, _) in &operations {
            for (k, n) in targets(view, op_key, EdgeType::HasExample)? {
                if matches!(n, GraphNode::Example(_)) {
                    examples.push(Value::Object(keyed_properties(&k, &n)?));
                }
            }
        }
        result.insert("examples".into(), Value::Array(examples));
    }

    if wants(ContextCategory::Documentation) {
        let mut seen = HashSet::new();
        let mut docs = Vec::new();
        documentation_of(view, &key, &mut seen, &mut docs, max_chunks)?;
        for (op_key, _) in &operations {
            documentation_of(view, op_key, &mut seen, &mut docs, max_chunks)?;
        }
        for (k, n) in sources(view, &key, EdgeType::RelatesToEntity)? {
            if docs.len() >= max_chunks {
                break;
            }
            if matches!(n, GraphNode::DocChunk(_)) && seen.insert(k.clone()) {
                let mut props = keyed_properties(&k, &n)?;
                props.insert("via".into(), Value::String(key.clone()));
                docs.push(Value::Object(props));
            }
        }
        result.insert("documentation".into(), Value::Array(docs));
    }

    Ok(Some(result))
}

/// Operation properties with `examples` and `documentation` arrays.
pub fn operation_for_prompt(
    view: &dyn GraphView,
    operation_key: &str,
    max_chunks: usize,
) -> Result<Option<Properties>> {
    let key = sanitize_key(operation_key);
    let op = match view.node(&key)? {
        Some(node @ GraphNode::Operation(_)) => node,
        _ => return Ok(None),
    };

    let mut result = keyed_properties(&key, &op)?;

    let examples = targets(view, &key, EdgeType::HasExample)?
        .into_iter()
        .filter(|(_, n)| matches!(n, GraphNode::Example(_)))
        .map(|(k, n)| keyed_properties(&k, &n).map(Value::Object))
        .collect::<Result<Vec<_>>>()?;
    result.insert("examples".into(), Value::Array(examples));

    let mut seen = HashSet::new();
    let mut docs = Vec::new();
    documentation_of(view, &key, &mut seen, &mut docs, max_chunks)?;
    result.insert("documentation".into(), Value::Array(docs));

    Ok(Some(result))
}

/// Edge counts by type and neighbour keys around a node.
///
/// Returns `None` when neither the node nor any edge touching it exists.
pub fn diagnostics(view: &dyn GraphView, operation_key: &str) -> Result<Option<Properties>> {
    let key = sanitize_key(operation_key);
    let node = view.node(&key)?;
    let outgoing = view.edges_from(&key)?;
    let incoming = view.edges_to(&key)?;

    if node.is_none() && outgoing.is_empty() && incoming.is_empty() {
        return Ok(None);
    }

    let mut out_counts: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut in_counts: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut neighbours = Vec::new();
    let mut dangling = 0u64;

    for edge in &outgoing {
        *out_counts.entry(edge.edge_type.as_str()).or_default() += 1;
        if view.node(&edge.to_key)?.is_none() {
            dangling += 1;
        }
        neighbours.push(edge.to_key.clone());
    }
    for edge in &incoming {
        *in_counts.entry(edge.edge_type.as_str()).or_default() += 1;
        if view.node(&edge.from_key)?.is_none() {
            dangling += 1;
        }
        neighbours.push(edge.from_key.clone());
    }
    neighbours.sort();
    neighbours.dedup();

    let mut result = Properties::new();
    result.insert("key".into(), json!(key));
    result.insert("exists".into(), json!(node.is_some()));
    result.insert("nodeType".into(), json!(node.as_ref().map(|n| n.node_type())));
    result.insert("outgoing".into(), json!(out_counts));
    result.insert("incoming".into(), json!(in_counts));
    result.insert("neighbours".into(), json!(neighbours));
    result.insert("danglingEdges".into(), json!(dangling));
    Ok(Some(result))
}
