use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use folio_core::error::{FolioError, Result};

/// A normalized handbook: services, free-text documentation, and the
/// operation policy.
///
/// Produced by an external OpenAPI normalizer; loaded here from JSON or TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Handbook {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub documents: Vec<DocumentSpec>,
    #[serde(default)]
    pub policy: OperationPolicy,
}

/// One API service (one OpenAPI document).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub slug: String,
    #[serde(default)]
    pub title: String,
    /// Base URL the HTTP invoker prefixes to operation paths.
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub tags: Vec<TagSpec>,
    #[serde(default)]
    pub operations: Vec<OperationSpec>,
}

/// A tag, indexed as an entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationSpec {
    pub operation_id: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// Primary success status, rendered in the signature.
    #[serde(default = "default_status")]
    pub response_status: u16,
    #[serde(default)]
    pub examples: Vec<ExampleSpec>,
}

fn default_status() -> u16 {
    200
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    /// "path", "query", "header", or "body".
    #[serde(rename = "in", default = "default_location")]
    pub location: String,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "type", default)]
    pub param_type: String,
}

fn default_location() -> String {
    "query".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExampleSpec {
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub request: Option<serde_json::Value>,
    #[serde(default)]
    pub response: Option<serde_json::Value>,
    #[serde(default)]
    pub status: Option<u16>,
}

/// A free-text documentation file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentSpec {
    pub uri: String,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub service: Option<String>,
    /// Entities (tag names) this document describes.
    #[serde(default)]
    pub entities: Vec<String>,
    /// Operations this document is attached to.
    #[serde(default)]
    pub operations: Vec<String>,
    pub content: String,
}

fn default_source_type() -> String {
    "markdown".to_string()
}

/// Which operations plans may reference.
///
/// An empty allow-list admits every operation in the handbook; the deny-list
/// always wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationPolicy {
    #[serde(default)]
    pub allowed_operations: Vec<String>,
    #[serde(default)]
    pub denied_operations: Vec<String>,
}

impl OperationSpec {
    /// `METHOD /path (params) -> status`.
    pub fn signature(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|p| {
                if p.required {
                    p.name.clone()
                } else {
                    format!("{}?", p.name)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{} {} ({}) -> {}",
            self.method.to_uppercase(),
            self.path,
            params,
            self.response_status
        )
    }
}

impl Handbook {
    /// Load a handbook file, choosing the format by extension (`.toml`, else JSON).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FolioError::NotFound(format!("handbook {}: {}", path.display(), e))
        })?;
        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
        let handbook = if is_toml {
            Self::from_toml_str(&content)?
        } else {
            Self::from_json_str(&content)?
        };
        debug!(
            path = %path.display(),
            services = handbook.services.len(),
            documents = handbook.documents.len(),
            "Handbook loaded"
        );
        Ok(handbook)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FolioError::Config(format!("handbook: {}", e)))
    }

    /// All operations with their owning service, in declaration order.
    pub fn operations(&self) -> impl Iterator<Item = (&ServiceSpec, &OperationSpec)> {
        self.services
            .iter()
            .flat_map(|s| s.operations.iter().map(move |op| (s, op)))
    }

    /// Look up an operation by id.
    pub fn operation(&self, operation_id: &str) -> Option<(&ServiceSpec, &OperationSpec)> {
        self.operations().find(|(_, op)| op.operation_id == operation_id)
    }

    /// Operation ids plans may reference, after applying the policy.
    pub fn allowed_operations(&self) -> BTreeSet<String> {
        let allow: BTreeSet<&str> = self
            .policy
            .allowed_operations
            .iter()
            .map(String::as_str)
            .collect();
        let deny: BTreeSet<&str> = self
            .policy
            .denied_operations
            .iter()
            .map(String::as_str)
            .collect();
        self.operations()
            .map(|(_, op)| op.operation_id.as_str())
            .filter(|id| allow.is_empty() || allow.contains(id))
            .filter(|id| !deny.contains(id))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOP_JSON: &str = r#"{
        "name": "shop",
        "services": [{
            "slug": "orders",
            "base_url": "https://api.example.com",
            "tags": [{"name": "Order", "fields": [{"name": "total", "type": "number"}]}],
            "operations": [
                {"operation_id": "Retrieve", "method": "get", "path": "/orders/{id}",
                 "tags": ["Order"],
                 "parameters": [{"name": "id", "in": "path", "required": true},
                                {"name": "expand"}]},
                {"operation_id": "Cancel", "method": "POST", "path": "/orders/{id}/cancel",
                 "tags": ["Order"], "response_status": 202}
            ]
        }],
        "policy": {"denied_operations": ["Cancel"]}
    }"#;

    #[test]
    fn test_parse_json_and_policy() {
        let hb = Handbook::from_json_str(SHOP_JSON).unwrap();
        assert_eq!(hb.services[0].operations.len(), 2);
        let allowed = hb.allowed_operations();
        assert!(allowed.contains("Retrieve"));
        assert!(!allowed.contains("Cancel"));
        let (svc, op) = hb.operation("Retrieve").unwrap();
        assert_eq!(svc.slug, "orders");
        assert_eq!(op.parameters[1].location, "query");
    }

    #[test]
    fn test_signature() {
        let hb = Handbook::from_json_str(SHOP_JSON).unwrap();
        let (_, op) = hb.operation("Retrieve").unwrap();
        assert_eq!(op.signature(), "GET /orders/{id} (id, expand?) -> 200");
        let (_, op) = hb.operation("Cancel").unwrap();
        assert_eq!(op.signature(), "POST /orders/{id}/cancel () -> 202");
    }

    #[test]
    fn test_allow_list_restricts() {
        let mut hb = Handbook::from_json_str(SHOP_JSON).unwrap();
        hb.policy.denied_operations.clear();
        hb.policy.allowed_operations = vec!["Cancel".into(), "Unknown".into()];
        let allowed: Vec<_> = hb.allowed_operations().into_iter().collect();
        assert_eq!(allowed, vec!["Cancel".to_string()]);
    }

    #[test]
    fn test_load_toml_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.toml");
        std::fs::write(
            &path,
            r#"
name = "shop"

[[services]]
slug = "orders"

[[services.operations]]
operation_id = "Retrieve"
method = "GET"
path = "/orders/{id}"

[[documents]]
uri = "docs/orders.md"
content = "Orders are placed by customers."
"#,
        )
        .unwrap();
        let hb = Handbook::load(&path).unwrap();
        assert_eq!(hb.name, "shop");
        assert_eq!(hb.documents[0].source_type, "markdown");
        assert!(hb.allowed_operations().contains("Retrieve"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Handbook::load(Path::new("/nonexistent/handbook.json")).unwrap_err();
        assert!(matches!(err, FolioError::NotFound(_)));
    }
}
