//! The four units of work handed to the scheduler and their dependency order.
//!
//! Tasks hand data to each other through the staging directory only, so each
//! one can run in its own process or be replayed on its own.

use crate::error::{LoadError, LoadPhase, PipelineError, ReshapeError};
use crate::fetch::{fetch_all, Provider};
use crate::load::{load, LoadSummary};
use crate::model::{Metric, ObservationSet};
use crate::reshape::{check_alignment, reshape, AlignmentReport};
use crate::staging::Staging;
use crate::store::CaseStore;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Task {
    Fetch,
    Process,
    CreateSchema,
    Load,
}

impl Task {
    pub const ALL: [Task; 4] = [Task::Fetch, Task::Process, Task::CreateSchema, Task::Load];

    pub fn name(&self) -> &'static str {
        match self {
            Task::Fetch => "fetch",
            Task::Process => "process",
            Task::CreateSchema => "create_schema",
            Task::Load => "load",
        }
    }

    pub fn depends_on(&self) -> &'static [Task] {
        match self {
            Task::Fetch => &[],
            Task::Process => &[Task::Fetch],
            Task::CreateSchema => &[],
            Task::Load => &[Task::Process, Task::CreateSchema],
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Layer the tasks so every task sits after all of its dependencies.
pub fn plan() -> Vec<Vec<Task>> {
    let mut placed = BTreeSet::new();
    let mut stages = Vec::new();
    while placed.len() < Task::ALL.len() {
        let stage: Vec<Task> = Task::ALL
            .into_iter()
            .filter(|t| !placed.contains(t) && t.depends_on().iter().all(|d| placed.contains(d)))
            .collect();
        if stage.is_empty() {
            break;
        }
        placed.extend(stage.iter().copied());
        stages.push(stage);
    }
    stages
}

#[derive(Debug)]
pub struct Processed {
    pub observations: ObservationSet,
    pub alignment: AlignmentReport,
}

/// Reshape the staged raw tables and stage the results. Nothing is written
/// unless every metric reshapes cleanly.
pub async fn process(staging: &Staging) -> Result<Processed, ReshapeError> {
    let processed = reshape_staged(staging).await?;

    for (metric, obs) in &processed.observations {
        let path = staging
            .write_processed(*metric, obs)
            .await
            .map_err(|e| ReshapeError {
                metric: *metric,
                cause: e.into(),
            })?;
        info!(%metric, observations = obs.len(), path = %path.display(), "staged processed table");
    }

    Ok(processed)
}

/// Read and reshape the staged raw tables and log their alignment, without
/// writing anything.
pub async fn reshape_staged(staging: &Staging) -> Result<Processed, ReshapeError> {
    let mut raw = BTreeMap::new();
    for metric in Metric::ALL {
        let table = staging
            .read_raw(metric)
            .await
            .map_err(|e| ReshapeError {
                metric,
                cause: e.into(),
            })?;
        raw.insert(metric, table);
    }

    let observations = reshape(&raw)?;
    let alignment = check_alignment(&observations);
    alignment.log();

    Ok(Processed {
        observations,
        alignment,
    })
}

/// Load the processed staging files of `metrics`.
pub async fn load_staged<S: CaseStore>(
    store: &S,
    staging: &Staging,
    metrics: &[Metric],
) -> Result<LoadSummary, LoadError> {
    let mut observations = ObservationSet::new();
    for metric in metrics {
        let obs = staging
            .read_processed(*metric)
            .await
            .map_err(|e| LoadError::new(LoadPhase::Input, e))?;
        observations.insert(*metric, obs);
    }
    check_alignment(&observations).log();
    load(store, &observations).await
}

#[derive(Debug)]
pub enum TaskOutcome {
    Fetched { hashes: BTreeMap<Metric, String> },
    Processed { observations: usize, aligned: bool },
    SchemaReady,
    Loaded(LoadSummary),
}

/// Everything one run needs.
pub struct Pipeline<'a, P, S> {
    pub provider: &'a P,
    pub store: &'a S,
    pub staging: Staging,
    pub sources: BTreeMap<Metric, String>,
    /// Metrics the load task writes.
    pub metrics: Vec<Metric>,
}

impl<P: Provider, S: CaseStore> Pipeline<'_, P, S> {
    pub async fn run_task(&self, task: Task) -> Result<TaskOutcome, PipelineError> {
        match task {
            Task::Fetch => {
                let tables = fetch_all(self.provider, &self.sources, &self.staging).await?;
                Ok(TaskOutcome::Fetched {
                    hashes: tables
                        .into_iter()
                        .map(|(metric, t)| (metric, t.content_hash))
                        .collect(),
                })
            }
            Task::Process => {
                let processed = process(&self.staging).await?;
                Ok(TaskOutcome::Processed {
                    observations: processed.observations.values().map(Vec::len).sum(),
                    aligned: processed.alignment.is_aligned(),
                })
            }
            Task::CreateSchema => {
                self.store.create_schema().await?;
                Ok(TaskOutcome::SchemaReady)
            }
            Task::Load => {
                let summary = load_staged(self.store, &self.staging, &self.metrics).await?;
                Ok(TaskOutcome::Loaded(summary))
            }
        }
    }

    /// Run every task once. A task starts as soon as its dependencies have
    /// finished; the first failure cancels whatever is still running.
    pub async fn run(&self) -> Result<Vec<(Task, TaskOutcome)>, PipelineError> {
        let mut started = BTreeSet::new();
        let mut finished = BTreeSet::new();
        let mut running = FuturesUnordered::new();
        let mut outcomes = Vec::new();

        loop {
            for task in Task::ALL {
                let ready = task.depends_on().iter().all(|d| finished.contains(d));
                if ready && started.insert(task) {
                    info!(%task, "task started");
                    running.push(async move { (task, self.run_task(task).await) });
                }
            }

            match running.next().await {
                Some((task, Ok(outcome))) => {
                    info!(%task, "task finished");
                    finished.insert(task);
                    outcomes.push((task, outcome));
                }
                Some((task, Err(err))) => {
                    error!(%task, phase = err.phase(), error = %err, "task failed");
                    return Err(err);
                }
                None => break,
            }
        }

        Ok(outcomes)
    }
}
