//! Developer harness for the dual-AI workflow.
//!
//! Usage:
//!   cargo run --bin dualai -- run --request request.json
//!   cargo run --bin dualai -- batch --requests requests.json
//!   cargo run --bin dualai -- history --limit 20
//!   cargo run --bin dualai -- prompts
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dual_ai::prompts::PromptRegistry;
use dual_ai::store::{SqliteWorkflowStore, WorkflowStore};
use dual_ai::{Config, DualAiService, GenerationRequest};
use serde::de::DeserializeOwned;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dualai")]
#[command(about = "Generate, validate and improve content with two models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one workflow from a JSON request file
    Run {
        #[arg(long)]
        request: PathBuf,
    },
    /// Run a JSON array of requests in batches
    Batch {
        #[arg(long)]
        requests: PathBuf,
    },
    /// Show recent workflow runs from the sqlite store
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// List registered prompts with their checksums
    Prompts,
}

#[tokio::main]
async fn main() -> Result<()> {
    dual_ai::load_env();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dual_ai=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { request } => run(&request).await,
        Commands::Batch { requests } => batch(&requests).await,
        Commands::History { limit } => history(limit),
        Commands::Prompts => prompts(),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn service() -> Result<DualAiService> {
    let config = Config::load().context("loading configuration")?;
    DualAiService::from_config(config).context("building workflow service")
}

async fn run(path: &Path) -> Result<()> {
    let request: GenerationRequest = read_json(path)?;
    let result = service()?.execute(request).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn batch(path: &Path) -> Result<()> {
    let requests: Vec<GenerationRequest> = read_json(path)?;
    let results = service()?.execute_batch(requests).await;
    let rendered: Vec<serde_json::Value> = results
        .into_iter()
        .map(|r| match r {
            Ok(result) => serde_json::to_value(result).unwrap_or_default(),
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(())
}

fn history(limit: usize) -> Result<()> {
    let config = Config::load().context("loading configuration")?;
    let path = config
        .store
        .sqlite_path
        .context("store.sqlite_path is not configured")?;
    let store = SqliteWorkflowStore::open(&path)?;
    for run in store.recent(limit)? {
        println!(
            "{}  {:<10} {:<15} conf={:<6} iter={} {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.content_type,
            run.status.as_str(),
            run.confidence.map_or("-".to_string(), |c| format!("{:.1}", c)),
            run.iterations,
            run.error.unwrap_or_default()
        );
    }
    Ok(())
}

fn prompts() -> Result<()> {
    for prompt in PromptRegistry::new().list() {
        println!(
            "{:<28} v{:<4} {}  {}",
            prompt.id, prompt.version, prompt.lineage.checksum, prompt.one_liner
        );
    }
    Ok(())
}
