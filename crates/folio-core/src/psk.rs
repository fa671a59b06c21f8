use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::Intent;

/// Prompt Schema Key: a structural cache key for an intent.
///
/// Derived from the action, the sorted entity names, the sorted field names and
/// the group-by list in declared order. Parameter values never contribute, so two
/// requests that differ only in literal arguments share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptSchemaKey {
    /// Human-readable form.
    pub key: String,
    /// SHA-256 hex digest of `key`.
    pub hash: String,
}

impl PromptSchemaKey {
    pub fn derive(
        action: &str,
        entities: &[&str],
        fields: &[&str],
        group_by: &[&str],
    ) -> Self {
        let key = format!(
            "action={};entities={};fields={};groupBy={}",
            normalize(action),
            sorted_list(entities),
            sorted_list(fields),
            group_by
                .iter()
                .map(|g| normalize(g))
                .collect::<Vec<_>>()
                .join(","),
        );
        let hash = format!("{:x}", Sha256::digest(key.as_bytes()));
        Self { key, hash }
    }

    pub fn from_intent(intent: &Intent) -> Self {
        let entities: Vec<&str> = intent.entities.iter().map(|t| t.entity.as_str()).collect();
        let fields: Vec<&str> = intent.fields.iter().map(String::as_str).collect();
        let group_by: Vec<&str> = intent.group_by.iter().map(String::as_str).collect();
        Self::derive(&intent.action, &entities, &fields, &group_by)
    }
}

impl fmt::Display for PromptSchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_string()
}

fn sorted_list(items: &[&str]) -> String {
    let mut v: Vec<String> = items.iter().map(|s| normalize(s)).collect();
    v.sort();
    v.dedup();
    v.join(",")
}
