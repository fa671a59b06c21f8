mod doctor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use folio_core::config::AppConfig;
use folio_core::types::ContextTuple;
use folio_graph::{DriverRegistry, GraphDriver};
use folio_index::{Handbook, IndexReport, IndexingOrchestrator};
use folio_operations::OperationRegistry;
use folio_planner::{
    ContextRetriever, LlmIntentExtractor, Orchestrator, PlanGenerator, PlanValidator,
};

#[derive(Parser)]
#[command(name = "folio", version, about = "Natural-language execution over API handbooks")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "folio.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the knowledge graph from the handbook
    Index,
    /// Show the context retrieved for an entity
    Context {
        /// Entity (tag) name
        entity: String,
        /// Only keep these operations (comma-separated)
        #[arg(long, value_delimiter = ',')]
        ops: Vec<String>,
    },
    /// Plan a prompt without invoking any operation
    Plan {
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
    },
    /// Plan and execute a prompt against the live API
    Ask {
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
    },
    /// Run configuration and backend health checks
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("folio=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        warn!(path = %cli.config.display(), "No config file found, using defaults");
        AppConfig::default()
    };
    let config_dir = cli
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    if let Commands::Doctor = cli.command {
        println!("Folio Doctor");
        println!("============");
        let failures = doctor::run_doctor(&config, &config_dir);
        if failures > 0 {
            std::process::exit(1);
        }
        return Ok(());
    }

    let handbook_path = config.handbook_path(&config_dir);
    let handbook = Handbook::load(&handbook_path)
        .with_context(|| format!("loading handbook {}", handbook_path.display()))?;

    match cli.command {
        Commands::Index => {
            let (_, report) = open_graph(&config, &handbook, true).await?;
            if let Some(report) = report {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Commands::Context { entity, ops } => {
            let (driver, _) = open_graph(&config, &handbook, false).await?;
            let records = ContextRetriever::new(driver)
                .retrieve_by_context(&[ContextTuple::new(entity, ops)])
                .await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::Plan { prompt } => {
            let (driver, _) = open_graph(&config, &handbook, false).await?;
            let orchestrator = build_orchestrator(&config, &handbook, driver, OperationRegistry::new())?;
            let response = orchestrator.plan(&prompt.join(" "), ctrl_c_token()).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Ask { prompt } => {
            let (driver, _) = open_graph(&config, &handbook, false).await?;
            let registry = OperationRegistry::from_handbook(&handbook);
            info!(operations = registry.len(), "Operations registered");
            let orchestrator = build_orchestrator(&config, &handbook, driver, registry)?;
            let response = orchestrator.handle(&prompt.join(" "), ctrl_c_token()).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Doctor => {}
    }

    Ok(())
}

/// Select the graph backend and make sure it holds the handbook.
///
/// The in-memory backend is rebuilt on every run. Indexing failures are
/// logged and the command continues without graph-assisted retrieval.
async fn open_graph(
    config: &AppConfig,
    handbook: &Handbook,
    reindex: bool,
) -> anyhow::Result<(Arc<dyn GraphDriver>, Option<IndexReport>)> {
    let driver = DriverRegistry::with_builtins().select(&config.graph, &handbook.name)?;

    let report = if reindex || driver.id() == "memory" {
        let indexer = IndexingOrchestrator::new(
            driver.clone(),
            config.chunking.clone(),
            config.graph.clear_on_startup || driver.id() == "memory",
        );
        match indexer.index_handbook(handbook).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Indexing failed, continuing without graph context");
                None
            }
        }
    } else {
        if let Err(e) = driver.initialize().await {
            warn!(error = %e, "Graph backend failed to initialize");
        }
        None
    };

    Ok((driver, report))
}

fn build_orchestrator(
    config: &AppConfig,
    handbook: &Handbook,
    driver: Arc<dyn GraphDriver>,
    registry: OperationRegistry,
) -> anyhow::Result<Orchestrator> {
    let model = config
        .model
        .as_ref()
        .context("no [model] section configured")?;
    let llm = folio_llm::create_client(model);

    Ok(Orchestrator::new(
        Arc::new(LlmIntentExtractor::new(llm.clone(), handbook)),
        ContextRetriever::new(driver),
        PlanGenerator::new(llm, PlanValidator::from_handbook(handbook), &config.planner),
        Arc::new(registry),
        config,
    ))
}

/// Token cancelled on Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Cancelling request...");
        cancel_clone.cancel();
    });
    cancel
}
