use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// Tool definition for sending to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// An (entity, requested operations) pair: the unit of retrieval intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTuple {
    pub entity: String,
    #[serde(default)]
    pub operations: Vec<String>,
}

impl ContextTuple {
    pub fn new(entity: impl Into<String>, operations: Vec<String>) -> Self {
        Self {
            entity: entity.into(),
            operations,
        }
    }
}

/// One serviceable part of a user prompt, as produced by intent extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    /// Short restatement of what this part of the prompt asks for.
    #[serde(default)]
    pub description: String,
    /// Verb-like action ("list", "retrieve", "aggregate", ...).
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub entities: Vec<ContextTuple>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Literal argument values. Excluded from the prompt schema key.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Output of intent extraction for a whole prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub intents: Vec<Intent>,
    /// Parts of the prompt the extractor could not map to the handbook.
    #[serde(default)]
    pub unhandled: Vec<String>,
}

/// A named service and the operations to invoke on it for a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub service_name: String,
    #[serde(default)]
    pub operations: Vec<String>,
}

/// One step of an execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub services: Vec<Service>,
}

/// Ordered list of steps naming the operations to invoke.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub steps: Vec<Step>,
}

impl ExecutionPlan {
    /// Every operation id referenced by the plan, in execution order.
    pub fn operation_ids(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .flat_map(|s| s.services.iter())
            .flat_map(|svc| svc.operations.iter())
            .map(String::as_str)
    }

    /// Number of operation invocations the plan will make.
    pub fn invocation_count(&self) -> usize {
        self.operation_ids().count()
    }
}

/// Categories of context attached to an entity in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextCategory {
    Operations,
    Fields,
    Examples,
    Documentation,
}

impl ContextCategory {
    pub const ALL: [ContextCategory; 4] = [
        ContextCategory::Operations,
        ContextCategory::Fields,
        ContextCategory::Examples,
        ContextCategory::Documentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operations => "operations",
            Self::Fields => "fields",
            Self::Examples => "examples",
            Self::Documentation => "documentation",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSummary {
    pub operation_id: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub service_slug: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSummary {
    pub name: String,
    #[serde(default)]
    pub field_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExampleSummary {
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub operation_key: String,
    #[serde(default)]
    pub request_body: Option<String>,
    #[serde(default)]
    pub response_body: Option<String>,
    #[serde(default)]
    pub response_status: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocSnippet {
    #[serde(default)]
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub source_uri: String,
}

/// Context retrieved from the graph for one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRecord {
    pub entity: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub service_slug: String,
    #[serde(default)]
    pub operations: Vec<OperationSummary>,
    #[serde(default)]
    pub fields: Vec<FieldSummary>,
    #[serde(default)]
    pub examples: Vec<ExampleSummary>,
    #[serde(default)]
    pub documentation: Vec<DocSnippet>,
}
