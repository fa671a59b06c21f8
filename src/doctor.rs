use std::path::Path;

use folio_core::config::AppConfig;
use folio_graph::DriverRegistry;
use folio_index::Handbook;

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

impl CheckResult {
    fn ok(label: &str, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(label: &str, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Print a health report and return the number of failed checks.
pub fn run_doctor(config: &AppConfig, config_dir: &Path) -> usize {
    let checks = vec![
        check_settings(config),
        check_model(config),
        check_handbook(config, config_dir),
        check_graph(config),
    ];

    let mut fail_count = 0;
    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if !check.ok {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", checks.len() - fail_count, fail_count);
    fail_count
}

fn check_settings(config: &AppConfig) -> CheckResult {
    match config.validate() {
        Ok(()) => CheckResult::ok(
            "Settings",
            format!(
                "chunks {}/{}/{} chars, {} plan attempts",
                config.chunking.min_chars,
                config.chunking.target_chars,
                config.chunking.max_chars,
                config.planner.max_attempts
            ),
        ),
        Err(e) => CheckResult::fail("Settings", e.to_string()),
    }
}

fn check_model(config: &AppConfig) -> CheckResult {
    let Some(model) = &config.model else {
        return CheckResult::fail("Model", "No [model] section (plan/ask unavailable)");
    };
    let has_key = model
        .api_key
        .as_ref()
        .is_some_and(|k| !k.is_empty() && !k.starts_with("${"));
    let needs_key = model.provider != "ollama" && model.base_url.is_none();

    if !needs_key || has_key {
        CheckResult::ok("Model", format!("{} ({})", model.model_id, model.provider))
    } else {
        CheckResult::fail(
            "Model",
            format!("No API key set for provider '{}'", model.provider),
        )
    }
}

fn check_handbook(config: &AppConfig, config_dir: &Path) -> CheckResult {
    let path = config.handbook_path(config_dir);
    match Handbook::load(&path) {
        Ok(handbook) => {
            let operations = handbook.operations().count();
            let allowed = handbook.allowed_operations().len();
            if operations == 0 {
                CheckResult::fail("Handbook", format!("{} declares no operations", path.display()))
            } else {
                CheckResult::ok(
                    "Handbook",
                    format!(
                        "{} ({} services, {} operations, {} allowed, {} documents)",
                        path.display(),
                        handbook.services.len(),
                        operations,
                        allowed,
                        handbook.documents.len()
                    ),
                )
            }
        }
        Err(e) => CheckResult::fail("Handbook", e.to_string()),
    }
}

fn check_graph(config: &AppConfig) -> CheckResult {
    if !config.graph.enabled {
        return CheckResult::ok("Graph", "Disabled (planning runs without retrieved context)");
    }
    let registry = DriverRegistry::with_builtins();
    match registry.select(&config.graph, &config.handbook.name) {
        Ok(driver) => CheckResult::ok(
            "Graph",
            format!("{} backend (known: {})", driver.id(), registry.ids().join(", ")),
        ),
        Err(e) => CheckResult::fail("Graph", e.to_string()),
    }
}
