use dashmap::DashMap;

/// Request-scoped scratch memory for intermediate operation results.
///
/// Keys are strings; values are JSON. Lookups accept a trailing `*` to match
/// every key with the given prefix. One store belongs to one in-flight request
/// and is dropped with it.
#[derive(Debug, Default)]
pub struct ValueStore {
    data: DashMap<String, serde_json::Value>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by exact key.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.data.get(key).map(|v| v.value().clone())
    }

    /// Set a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) -> Option<serde_json::Value> {
        self.data.insert(key.into(), value)
    }

    /// Look up entries by key or `prefix*` pattern, sorted by key.
    pub fn lookup(&self, pattern: &str) -> Vec<(String, serde_json::Value)> {
        let mut out: Vec<(String, serde_json::Value)> = match pattern.strip_suffix('*') {
            Some(prefix) => self
                .data
                .iter()
                .filter(|e| e.key().starts_with(prefix))
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            None => self
                .get(pattern)
                .map(|v| vec![(pattern.to_string(), v)])
                .unwrap_or_default(),
        };
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
