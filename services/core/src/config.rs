//! Environment and sources-file configuration.

use crate::model::Metric;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const JHU_BASE_URL: &str = "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/master/csse_covid_19_data/csse_covid_19_time_series";

pub fn default_source_url(metric: Metric) -> String {
    format!("{}/time_series_covid19_{}_global.csv", JHU_BASE_URL, metric)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: Option<String>,
    pub staging_dir: PathBuf,
    pub sources: BTreeMap<Metric, String>,
    pub fetch_timeout: Duration,
    pub load_timeout: Duration,
    pub db_max_connections: u32,
    pub load_batch_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut sources = BTreeMap::new();
        for metric in Metric::ALL {
            let key = format!("{}_URL", metric.as_str().to_uppercase());
            let url = std::env::var(&key).unwrap_or_else(|_| default_source_url(metric));
            sources.insert(metric, url);
        }

        Ok(Self {
            db_url: std::env::var("DB_URL").ok(),
            staging_dir: PathBuf::from(
                std::env::var("STAGING_DIR").unwrap_or_else(|_| "./data/staging".to_string()),
            ),
            sources,
            fetch_timeout: Duration::from_secs(env_number("FETCH_TIMEOUT_SECS", 120)?),
            load_timeout: Duration::from_secs(env_number("LOAD_TIMEOUT_SECS", 300)?),
            db_max_connections: env_number("DB_MAX_CONNECTIONS", 5)?,
            load_batch_size: env_number("LOAD_BATCH_SIZE", 5000)?,
        })
    }

    pub fn db_url(&self) -> Result<&str> {
        self.db_url.as_deref().context("DB_URL env var missing")
    }

    /// Replace the per-metric URLs with those of a sources file.
    pub fn with_sources(mut self, sources: SourcesConfig) -> Result<Self> {
        self.sources = sources.into_urls()?;
        Ok(self)
    }
}

fn env_number<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Deserialize)]
pub struct SourcesConfig {
    pub version: String,
    pub sources: Vec<Source>,
}

#[derive(Debug, Deserialize)]
pub struct Source {
    pub metric: Metric,
    pub url: String,
    #[serde(default)]
    pub description: String,
}

impl SourcesConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .context("Failed to read sources config")?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse sources config")
    }

    /// Exactly one URL per metric is required.
    pub fn into_urls(self) -> Result<BTreeMap<Metric, String>> {
        let mut urls = BTreeMap::new();
        for source in self.sources {
            if urls.insert(source.metric, source.url).is_some() {
                anyhow::bail!("metric {} is configured more than once", source.metric);
            }
        }
        for metric in Metric::ALL {
            if !urls.contains_key(&metric) {
                anyhow::bail!("no source configured for metric {}", metric);
            }
        }
        Ok(urls)
    }
}
