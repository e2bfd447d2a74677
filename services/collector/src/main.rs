//! Collector Service - Fetches the three provider time-series tables
//!
//! Responsibilities:
//! - Fetch confirmed/deaths/recovered CSVs from the configured URLs
//! - Fail the whole run if any one of them cannot be retrieved
//! - Stage the raw tables as `<metric>.csv` for the parser
//!
//! Usage:
//!   cargo run --bin collector
//!   cargo run --bin collector -- --sources config/sources.json --staging-dir /tmp/covid
//!   cargo run --bin collector -- --dry-run

use anyhow::{Context, Result};
use clap::Parser;
use covid_core::config::SourcesConfig;
use covid_core::fetch::{fetch_all, fetch_tables, HttpProvider};
use covid_core::staging::Staging;
use covid_core::{telemetry, Config};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "collector", about = "Fetches raw time-series tables into the staging directory")]
struct Args {
    /// JSON file with one source URL per metric (overrides *_URL env vars)
    #[arg(long)]
    sources: Option<PathBuf>,

    /// Staging directory (overrides STAGING_DIR)
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Dry run - fetch and validate without staging
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init();
    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(path) = &args.sources {
        let sources = SourcesConfig::load(path).await?;
        info!(path = %path.display(), version = %sources.version, "loaded sources config");
        config = config.with_sources(sources)?;
    }
    let staging = Staging::new(args.staging_dir.unwrap_or(config.staging_dir.clone()));

    let provider =
        HttpProvider::new(config.fetch_timeout).context("Failed to build HTTP client")?;
    let tables = if args.dry_run {
        info!("dry run - nothing will be staged");
        fetch_tables(&provider, &config.sources).await?
    } else {
        fetch_all(&provider, &config.sources, &staging).await?
    };

    for (metric, table) in &tables {
        info!(
            %metric,
            url = %table.url,
            rows = table.table.rows.len(),
            hash = %table.content_hash,
            "collected"
        );
    }
    if !args.dry_run {
        info!(staging = %staging.dir().display(), "collection complete, ready for parser");
    }

    Ok(())
}
