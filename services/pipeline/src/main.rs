//! Pipeline - Runs fetch, process, create_schema and load once, in dependency order
//!
//! Usage:
//!   cargo run --bin pipeline
//!   cargo run --bin pipeline -- --plan
//!   cargo run --bin pipeline -- --dry-run

use anyhow::{Context, Result};
use clap::Parser;
use covid_core::config::SourcesConfig;
use covid_core::fetch::{HttpProvider, Provider};
use covid_core::staging::Staging;
use covid_core::store::{CaseStore, MemoryStore, PgStore};
use covid_core::tasks::{plan, Pipeline, TaskOutcome};
use covid_core::{telemetry, Config, Metric};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pipeline", about = "Runs the whole ingestion DAG once")]
struct Args {
    /// Print the task stages and exit
    #[arg(long, default_value = "false")]
    plan: bool,

    /// JSON file with one source URL per metric (overrides *_URL env vars)
    #[arg(long)]
    sources: Option<PathBuf>,

    /// Staging directory (overrides STAGING_DIR)
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Dry run - fetch and process for real, load into memory only
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

async fn run<P: Provider, S: CaseStore>(pipeline: Pipeline<'_, P, S>) -> Result<()> {
    let outcomes = pipeline.run().await?;
    for (task, outcome) in outcomes {
        match outcome {
            TaskOutcome::Fetched { hashes } => {
                for (metric, hash) in hashes {
                    info!(%task, %metric, %hash, "fetched");
                }
            }
            TaskOutcome::Processed {
                observations,
                aligned,
            } => info!(%task, observations, aligned, "processed"),
            TaskOutcome::SchemaReady => info!(%task, "schema ready"),
            TaskOutcome::Loaded(summary) => {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init();
    let args = Args::parse();

    if args.plan {
        for (i, stage) in plan().iter().enumerate() {
            let names: Vec<&str> = stage.iter().map(|t| t.name()).collect();
            println!("stage {}: {}", i + 1, names.join(", "));
        }
        return Ok(());
    }

    let mut config = Config::from_env()?;
    if let Some(path) = &args.sources {
        let sources = SourcesConfig::load(path).await?;
        info!(path = %path.display(), version = %sources.version, "loaded sources config");
        config = config.with_sources(sources)?;
    }
    let staging = Staging::new(args.staging_dir.unwrap_or(config.staging_dir.clone()));
    let provider =
        HttpProvider::new(config.fetch_timeout).context("Failed to build HTTP client")?;

    if args.dry_run {
        let store = MemoryStore::new();
        run(Pipeline {
            provider: &provider,
            store: &store,
            staging,
            sources: config.sources,
            metrics: Metric::ALL.to_vec(),
        })
        .await
    } else {
        let store = PgStore::connect(&config).await?;
        run(Pipeline {
            provider: &provider,
            store: &store,
            staging,
            sources: config.sources,
            metrics: Metric::ALL.to_vec(),
        })
        .await
    }
}
