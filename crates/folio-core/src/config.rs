use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{FolioError, Result};

/// Top-level Folio configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub handbook: HandbookConfig,
    #[serde(default)]
    pub model: Option<ModelConfig>,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandbookConfig {
    #[serde(default = "default_handbook_name")]
    pub name: String,
    /// Path to the normalized handbook file (JSON or TOML).
    #[serde(default = "default_handbook_path")]
    pub path: String,
}

impl Default for HandbookConfig {
    fn default() -> Self {
        Self {
            name: default_handbook_name(),
            path: default_handbook_path(),
        }
    }
}

fn default_handbook_name() -> String { "default".to_string() }
fn default_handbook_path() -> String { "handbook.json".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

fn default_provider() -> String { "anthropic".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Graph storage backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Master switch. A disabled backend initializes to a no-op state.
    #[serde(default = "default_graph_enabled")]
    pub enabled: bool,
    /// Preferred backend id (e.g. "sqlite", "memory"). None = first available.
    #[serde(default)]
    pub backend: Option<String>,
    /// Wipe the store before indexing so reindexing is idempotent.
    #[serde(default)]
    pub clear_on_startup: bool,
    /// Upper bound on documentation chunks returned per context query.
    #[serde(default = "default_max_context_chunks")]
    pub max_context_chunks: usize,
    /// SQLite backend settings; its presence makes the sqlite backend available.
    #[serde(default)]
    pub sqlite: Option<SqliteGraphConfig>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            enabled: default_graph_enabled(),
            backend: None,
            clear_on_startup: false,
            max_context_chunks: default_max_context_chunks(),
            sqlite: None,
        }
    }
}

fn default_graph_enabled() -> bool { true }
fn default_max_context_chunks() -> usize { 8 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteGraphConfig {
    /// Directory holding one database file per handbook.
    #[serde(default = "default_sqlite_dir")]
    pub dir: String,
}

impl Default for SqliteGraphConfig {
    fn default() -> Self {
        Self {
            dir: default_sqlite_dir(),
        }
    }
}

fn default_sqlite_dir() -> String { "~/.folio/graph".to_string() }

impl SqliteGraphConfig {
    /// Database file for a given handbook.
    pub fn db_path(&self, handbook_name: &str) -> PathBuf {
        let file: String = handbook_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        expand_home(&self.dir).join(format!("{}.db", file))
    }
}

/// Document chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunking_enabled")]
    pub enabled: bool,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    /// Per document type overrides ("openapi", "markdown"). Values are
    /// "true"/"false"; blank values fall back to `enabled`.
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: default_chunking_enabled(),
            min_chars: default_min_chars(),
            target_chars: default_target_chars(),
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
            overrides: HashMap::new(),
        }
    }
}

fn default_chunking_enabled() -> bool { true }
fn default_min_chars() -> usize { 300 }
fn default_target_chars() -> usize { 800 }
fn default_max_chars() -> usize { 1500 }
fn default_overlap_chars() -> usize { 150 }

impl ChunkingConfig {
    /// Whether chunking applies to a document type.
    pub fn enabled_for(&self, doc_type: &str) -> bool {
        let Some(raw) = self.overrides.get(doc_type) else {
            return self.enabled;
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "" => self.enabled,
            "true" | "yes" | "on" | "1" => true,
            "false" | "no" | "off" | "0" => false,
            other => {
                warn!(doc_type, value = other, "Unrecognized chunking override, using global flag");
                self.enabled
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Total attempts (first try included) before plan generation fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Reuse validated plans for structurally identical intents.
    #[serde(default = "default_cache_plans")]
    pub cache_plans: bool,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            cache_plans: default_cache_plans(),
            system_prompt: None,
        }
    }
}

fn default_max_attempts() -> usize { 3 }
fn default_cache_plans() -> bool { true }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 { 120 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FolioError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| FolioError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if !(c.min_chars <= c.target_chars && c.target_chars <= c.max_chars) {
            return Err(FolioError::Config(format!(
                "chunking sizes must satisfy min <= target <= max (got {} / {} / {})",
                c.min_chars, c.target_chars, c.max_chars
            )));
        }
        if c.overlap_chars >= c.min_chars {
            return Err(FolioError::Config(
                "chunking.overlap_chars must be smaller than chunking.min_chars".into(),
            ));
        }
        if c.min_chars + c.overlap_chars > c.max_chars {
            return Err(FolioError::Config(
                "chunking.max_chars must leave room for min_chars plus overlap_chars".into(),
            ));
        }
        if self.planner.max_attempts == 0 {
            return Err(FolioError::Config("planner.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Resolve the handbook path relative to the directory of the config file.
    pub fn handbook_path(&self, config_dir: &Path) -> PathBuf {
        let p = expand_home(&self.handbook.path);
        if p.is_absolute() {
            p
        } else {
            config_dir.join(p)
        }
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_FOLIO_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_FOLIO_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_FOLIO_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_FOLIO_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_FOLIO_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.model.is_none());
        assert!(config.graph.enabled);
        assert!(config.graph.sqlite.is_none());
        assert_eq!(config.graph.max_context_chunks, 8);
        assert_eq!(config.chunking.min_chars, 300);
        assert_eq!(config.chunking.target_chars, 800);
        assert_eq!(config.chunking.max_chars, 1500);
        assert_eq!(config.planner.max_attempts, 3);
        assert!(config.planner.cache_plans);
        assert_eq!(config.orchestrator.request_timeout_secs, 120);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_chunking_override_blank_falls_back() {
        let toml_str = r#"
[chunking]
enabled = true
[chunking.overrides]
openapi = "false"
markdown = "   "
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.chunking.enabled_for("openapi"));
        assert!(config.chunking.enabled_for("markdown"));
        assert!(config.chunking.enabled_for("unlisted"));
    }

    #[test]
    fn test_chunking_override_enables_when_global_off() {
        let mut chunking = ChunkingConfig {
            enabled: false,
            ..ChunkingConfig::default()
        };
        chunking.overrides.insert("markdown".into(), "TRUE".into());
        chunking.overrides.insert("openapi".into(), String::new());
        assert!(chunking.enabled_for("markdown"));
        assert!(!chunking.enabled_for("openapi"));
    }

    #[test]
    fn test_validate_rejects_inverted_sizes() {
        let mut config = AppConfig::default();
        config.chunking.min_chars = 900;
        assert!(matches!(config.validate(), Err(FolioError::Config(_))));
    }

    #[test]
    fn test_sqlite_db_path_sanitizes_name() {
        let cfg = SqliteGraphConfig {
            dir: "/var/lib/folio".into(),
        };
        assert_eq!(
            cfg.db_path("shop api/v1"),
            PathBuf::from("/var/lib/folio/shop_api_v1.db")
        );
    }
}
