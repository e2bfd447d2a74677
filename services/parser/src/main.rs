//! Parser Service - Reshapes staged wide tables into per-date observations
//!
//! Responsibilities:
//! - Read the raw `<metric>.csv` tables staged by the collector
//! - Normalise date headers to YYYY-MM-DD and blank states to "N/A"
//! - Unpivot every (location, date) cell into one observation
//! - Report, but keep, misalignment between the three tables
//! - Stage `processed_<metric>.csv` for the loader
//!
//! CRITICAL: the same staged tables always produce the same processed files.

use anyhow::Result;
use clap::Parser;
use covid_core::staging::Staging;
use covid_core::tasks::{process, reshape_staged};
use covid_core::{telemetry, Config};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "parser", about = "Reshapes staged time-series tables")]
struct Args {
    /// Staging directory (overrides STAGING_DIR)
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Dry run - reshape and report without writing processed files
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init();
    let args = Args::parse();
    let config = Config::from_env()?;
    let staging = Staging::new(args.staging_dir.unwrap_or(config.staging_dir));

    if args.dry_run {
        let processed = reshape_staged(&staging).await?;
        for (metric, obs) in &processed.observations {
            info!(%metric, observations = obs.len(), "dry run - not staged");
        }
        return Ok(());
    }

    let processed = process(&staging).await?;
    let total: usize = processed.observations.values().map(Vec::len).sum();
    info!(
        observations = total,
        aligned = processed.alignment.is_aligned(),
        "parsing complete, ready for loader"
    );

    Ok(())
}
