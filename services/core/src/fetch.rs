//! Retrieval of the three provider tables.
//!
//! A single attempt per table; retries belong to whoever schedules the run.

use crate::error::{FetchCause, FetchError};
use crate::model::{Metric, RawTable};
use crate::reshape::METADATA_COLUMNS;
use crate::staging::Staging;
use futures::future::try_join_all;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

const USER_AGENT: &str = "covid-etl/0.1 (daily time-series loader)";

/// Source of raw table text.
pub trait Provider {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, FetchCause>> + Send;
}

pub struct HttpProvider {
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

impl Provider for HttpProvider {
    async fn fetch(&self, url: &str) -> Result<String, FetchCause> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.text().await?)
    }
}

#[derive(Debug, Clone)]
pub struct FetchedTable {
    pub metric: Metric,
    pub url: String,
    pub table: RawTable,
    pub content: String,
    pub content_hash: String,
}

/// Fetch every metric concurrently and stage the raw tables. Nothing is
/// staged unless all of them succeed.
pub async fn fetch_all<P: Provider>(
    provider: &P,
    sources: &BTreeMap<Metric, String>,
    staging: &Staging,
) -> Result<BTreeMap<Metric, FetchedTable>, FetchError> {
    let tables = fetch_tables(provider, sources).await?;
    stage_tables(staging, &tables).await?;
    Ok(tables)
}

/// Fetch and validate every metric without touching the staging directory.
pub async fn fetch_tables<P: Provider>(
    provider: &P,
    sources: &BTreeMap<Metric, String>,
) -> Result<BTreeMap<Metric, FetchedTable>, FetchError> {
    let fetched = try_join_all(
        Metric::ALL
            .into_iter()
            .map(|metric| fetch_one(provider, metric, sources.get(&metric))),
    )
    .await?;
    Ok(fetched.into_iter().map(|t| (t.metric, t)).collect())
}

async fn stage_tables(
    staging: &Staging,
    tables: &BTreeMap<Metric, FetchedTable>,
) -> Result<(), FetchError> {
    let paths = staging
        .write_raw_set(tables.values().map(|t| (t.metric, t.content.as_str())))
        .await
        .map_err(|(metric, e)| FetchError {
            metric,
            cause: e.into(),
        })?;
    for path in paths {
        info!(path = %path.display(), "staged raw table");
    }
    Ok(())
}

async fn fetch_one<P: Provider>(
    provider: &P,
    metric: Metric,
    url: Option<&String>,
) -> Result<FetchedTable, FetchError> {
    let fail = |cause: FetchCause| {
        warn!(%metric, error = %cause, "fetch failed");
        FetchError { metric, cause }
    };

    let url = url.ok_or_else(|| fail(FetchCause::Unavailable("no URL configured".to_string())))?;

    info!(%metric, %url, "fetching");
    let content = provider.fetch(url).await.map_err(fail)?;

    let table = RawTable::parse(&content)
        .map_err(|e| fail(FetchCause::Malformed(e.to_string())))?;
    if table.headers.len() <= METADATA_COLUMNS {
        return Err(fail(FetchCause::Malformed(format!(
            "expected metadata columns plus at least one date column, found {} columns",
            table.headers.len()
        ))));
    }

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let content_hash = format!("sha256:{:x}", hasher.finalize());

    info!(
        %metric,
        rows = table.rows.len(),
        columns = table.headers.len(),
        bytes = content.len(),
        hash = %content_hash,
        "fetched"
    );

    Ok(FetchedTable {
        metric,
        url: url.clone(),
        table,
        content,
        content_hash,
    })
}
