//! Loader Service - Provisions the star schema and loads processed observations
//!
//! Usage:
//!   cargo run --bin loader -- create-schema
//!   cargo run --bin loader -- load
//!   cargo run --bin loader -- load --metric deaths      # replay one metric
//!   cargo run --bin loader -- load --dry-run            # no database writes

use anyhow::Result;
use clap::{Parser, Subcommand};
use covid_core::staging::Staging;
use covid_core::store::{CaseStore, MemoryStore, PgStore};
use covid_core::tasks::load_staged;
use covid_core::{telemetry, Config, Metric};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "loader", about = "Loads processed observations into Postgres")]
struct Args {
    /// Staging directory (overrides STAGING_DIR)
    #[arg(long, global = true)]
    staging_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create dim_location and fact_covid_cases if they do not exist
    CreateSchema,

    /// Upsert locations and merge facts from processed staging files
    Load {
        /// Metric to load; repeat for several (default: all)
        #[arg(long = "metric")]
        metrics: Vec<Metric>,

        /// Dry run - load into memory and print the summary
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init();
    let args = Args::parse();
    let config = Config::from_env()?;

    match args.command {
        Command::CreateSchema => {
            let store = PgStore::connect(&config).await?;
            store.create_schema().await?;
            info!("schema ready");
        }
        Command::Load { metrics, dry_run } => {
            let staging = Staging::new(args.staging_dir.unwrap_or(config.staging_dir.clone()));
            let metrics = if metrics.is_empty() {
                Metric::ALL.to_vec()
            } else {
                metrics
            };

            let summary = if dry_run {
                info!("dry run - loading into memory only");
                load_staged(&MemoryStore::provisioned(), &staging, &metrics).await?
            } else {
                let store = PgStore::connect(&config).await?;
                load_staged(&store, &staging, &metrics).await?
            };

            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
