use std::io::Write;

use folio_core::config::AppConfig;
use folio_core::FolioError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[handbook]
name = "shop"
path = "handbook.json"

[model]
provider = "openai"
model_id = "gpt-4o-mini"
api_key = "sk-test-key"
max_tokens = 2048
temperature = 0.2

[graph]
enabled = true
backend = "sqlite"
clear_on_startup = true
max_context_chunks = 4

[graph.sqlite]
dir = "/tmp/folio-graph"

[chunking]
enabled = true
min_chars = 200
target_chars = 600
max_chars = 1200
overlap_chars = 100

[chunking.overrides]
openapi = "false"
markdown = ""

[planner]
max_attempts = 5
cache_plans = false

[orchestrator]
request_timeout_secs = 30
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.handbook.name, "shop");
    let model = config.model.expect("model present");
    assert_eq!(model.provider, "openai");
    assert_eq!(model.model_id, "gpt-4o-mini");
    assert_eq!(model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(model.max_tokens, 2048);

    assert_eq!(config.graph.backend.as_deref(), Some("sqlite"));
    assert!(config.graph.clear_on_startup);
    assert_eq!(config.graph.max_context_chunks, 4);
    let sqlite = config.graph.sqlite.expect("sqlite present");
    assert_eq!(
        sqlite.db_path("shop"),
        std::path::PathBuf::from("/tmp/folio-graph/shop.db")
    );

    assert_eq!(config.chunking.min_chars, 200);
    assert!(!config.chunking.enabled_for("openapi"));
    assert!(config.chunking.enabled_for("markdown"));

    assert_eq!(config.planner.max_attempts, 5);
    assert!(!config.planner.cache_plans);
    assert_eq!(config.orchestrator.request_timeout_secs, 30);
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("FOLIO_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[model]
provider = "anthropic"
model_id = "claude-sonnet"
api_key = "${FOLIO_TEST_API_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(
        config.model.unwrap().api_key,
        Some("expanded-key-value".to_string())
    );

    std::env::remove_var("FOLIO_TEST_API_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[handbook]\nname = \"tiny\"\n").expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.handbook.path, "handbook.json");
    assert!(config.model.is_none());
    assert!(config.graph.enabled);
    assert!(config.graph.backend.is_none());
    assert_eq!(config.chunking.max_chars, 1500);
    assert_eq!(config.planner.max_attempts, 3);
}

#[test]
fn test_missing_file_is_config_not_found() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/folio.toml")).unwrap_err();
    assert!(matches!(err, FolioError::ConfigNotFound(_)));
}

#[test]
fn test_invalid_values_rejected() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[planner]\nmax_attempts = 0\n").expect("write toml");
    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, FolioError::Config(_)));

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[graph]\nenabled = \"maybe\"\n").expect("write toml");
    assert!(matches!(
        AppConfig::load(tmp.path()).unwrap_err(),
        FolioError::Config(_)
    ));
}

#[test]
fn test_handbook_path_relative_to_config_dir() {
    let (_dir, path) = folio_test_utils::temp_config("[handbook]\npath = \"books/shop.toml\"\n");
    let config = AppConfig::load(&path).unwrap();
    let dir = path.parent().unwrap();
    assert_eq!(config.handbook_path(dir), dir.join("books/shop.toml"));
}
