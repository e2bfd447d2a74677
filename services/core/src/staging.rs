//! Staging directory shared by the tasks.
//!
//! Raw provider tables land in `<metric>.csv` and reshaped observations in
//! `processed_<metric>.csv`, so any task can be replayed without re-running
//! the ones before it.

use crate::error::StagingError;
use crate::model::{Location, Metric, NormalizedObservation, RawTable};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Long-format row of a processed staging file. The metric is implied by the file name.
#[derive(Debug, Serialize, Deserialize)]
struct ProcessedRecord {
    date: NaiveDate,
    country: String,
    state: String,
    value: u32,
}

/// Collapse every run of non-word characters into a single `_`.
pub fn safe_file_stem(name: &str) -> String {
    let mut stem = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_alphanumeric() || c == '_' {
            stem.push(c);
            in_run = false;
        } else if !in_run {
            stem.push('_');
            in_run = true;
        }
    }
    stem
}

#[derive(Debug, Clone)]
pub struct Staging {
    dir: PathBuf,
}

impl Staging {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn raw_path(&self, metric: Metric) -> PathBuf {
        self.dir.join(format!("{}.csv", safe_file_stem(metric.as_str())))
    }

    pub fn processed_path(&self, metric: Metric) -> PathBuf {
        self.dir
            .join(format!("processed_{}.csv", safe_file_stem(metric.as_str())))
    }

    pub async fn write_raw(&self, metric: Metric, content: &str) -> Result<PathBuf, StagingError> {
        let path = self.raw_path(metric);
        self.write_atomic(&path, content.as_bytes()).await?;
        Ok(path)
    }

    /// Stage several raw tables as one set. Every temporary file is written
    /// before any is renamed into place, so a failed write leaves the previous
    /// set untouched.
    pub async fn write_raw_set<'c>(
        &self,
        tables: impl IntoIterator<Item = (Metric, &'c str)>,
    ) -> Result<Vec<PathBuf>, (Metric, StagingError)> {
        let mut pending: Vec<(Metric, PathBuf, PathBuf)> = Vec::new();
        for (metric, content) in tables {
            let path = self.raw_path(metric);
            let tmp = tmp_path(&path);
            if let Err(e) = self.write_tmp(&path, &tmp, content.as_bytes()).await {
                fs::remove_file(&tmp).await.ok();
                for (_, written, _) in &pending {
                    fs::remove_file(written).await.ok();
                }
                return Err((metric, e));
            }
            pending.push((metric, tmp, path));
        }

        let mut staged = Vec::with_capacity(pending.len());
        for (metric, tmp, path) in pending {
            fs::rename(&tmp, &path).await.map_err(|source| {
                (
                    metric,
                    StagingError::Io {
                        path: path.clone(),
                        source,
                    },
                )
            })?;
            staged.push(path);
        }
        Ok(staged)
    }

    pub async fn read_raw(&self, metric: Metric) -> Result<RawTable, StagingError> {
        let path = self.raw_path(metric);
        let content = read_file(&path).await?;
        RawTable::parse(&content).map_err(|source| StagingError::Csv { path, source })
    }

    pub async fn write_processed(
        &self,
        metric: Metric,
        observations: &[NormalizedObservation],
    ) -> Result<PathBuf, StagingError> {
        let path = self.processed_path(metric);
        let csv_err = |source| StagingError::Csv {
            path: path.clone(),
            source,
        };

        let mut writer = csv::Writer::from_writer(Vec::new());
        for obs in observations {
            writer
                .serialize(ProcessedRecord {
                    date: obs.date,
                    country: obs.location.country.clone(),
                    state: obs.location.state.clone(),
                    value: obs.value,
                })
                .map_err(csv_err)?;
        }
        let bytes = writer.into_inner().map_err(|e| StagingError::Io {
            path: path.clone(),
            source: e.into_error(),
        })?;

        self.write_atomic(&path, &bytes).await?;
        Ok(path)
    }

    pub async fn read_processed(
        &self,
        metric: Metric,
    ) -> Result<Vec<NormalizedObservation>, StagingError> {
        let path = self.processed_path(metric);
        let content = read_file(&path).await?;

        let mut reader = csv::Reader::from_reader(content.as_bytes());
        let mut observations = Vec::new();
        for result in reader.deserialize::<ProcessedRecord>() {
            let record = result.map_err(|source| StagingError::Csv {
                path: path.clone(),
                source,
            })?;
            observations.push(NormalizedObservation {
                date: record.date,
                location: Location::new(&record.country, &record.state),
                metric,
                value: record.value,
            });
        }
        Ok(observations)
    }

    /// Write through a temporary file so a crashed run never leaves a half-written table.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StagingError> {
        let tmp = tmp_path(path);
        self.write_tmp(path, &tmp, bytes).await?;
        fs::rename(&tmp, path)
            .await
            .map_err(|source| StagingError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn write_tmp(&self, path: &Path, tmp: &Path, bytes: &[u8]) -> Result<(), StagingError> {
        let io_err = |source| StagingError::Io {
            path: path.to_path_buf(),
            source,
        };
        fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        fs::write(tmp, bytes).await.map_err(io_err)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("csv.tmp")
}

async fn read_file(path: &Path) -> Result<String, StagingError> {
    fs::read_to_string(path)
        .await
        .map_err(|source| StagingError::Io {
            path: path.to_path_buf(),
            source,
        })
}
