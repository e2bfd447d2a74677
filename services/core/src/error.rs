//! Typed failures for each stage of a run, tagged with the metric or load phase.

use crate::model::{Location, Metric};
use chrono::NaiveDate;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Reading or writing a file in the staging directory.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("staging I/O failed for {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("staging file {} is not valid CSV: {}", .path.display(), .source)]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// One metric's table could not be retrieved; the whole fetch is abandoned.
#[derive(Debug, Error)]
#[error("fetching {metric} failed: {cause}")]
pub struct FetchError {
    pub metric: Metric,
    #[source]
    pub cause: FetchCause,
}

/// Cause of a [`FetchError`].
#[derive(Debug, Error)]
pub enum FetchCause {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed table: {0}")]
    Malformed(String),

    #[error(transparent)]
    Staging(#[from] StagingError),
}

/// A date column header that could not be read as a calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("column {column} header '{raw_value}' is not a recognised date")]
pub struct DateParseError {
    pub column: usize,
    pub raw_value: String,
}

#[derive(Debug, Error)]
#[error("reshaping {metric} failed: {cause}")]
pub struct ReshapeError {
    pub metric: Metric,
    #[source]
    pub cause: ReshapeCause,
}

/// Malformed source schema or content. `row` is the 1-based line in the table.
#[derive(Debug, Error)]
pub enum ReshapeCause {
    #[error(transparent)]
    DateParse(#[from] DateParseError),

    #[error("expected at least {expected} columns, found {found}")]
    TooFewColumns { expected: usize, found: usize },

    #[error("no {0} column among the metadata columns")]
    MissingColumn(&'static str),

    #[error("row {row}: country is blank")]
    BlankCountry { row: usize },

    #[error("row {row}, column '{column}': invalid count '{raw}'")]
    InvalidValue {
        row: usize,
        column: String,
        raw: String,
    },

    #[error("row {row}: location {location} appears more than once")]
    DuplicateLocation { row: usize, location: Location },

    #[error("column {column} header '{raw_value}' repeats date {date}")]
    DuplicateDateColumn {
        column: usize,
        raw_value: String,
        date: NaiveDate,
    },

    #[error(transparent)]
    Staging(#[from] StagingError),
}

/// Creating the tables or the fact key index failed.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema provisioning failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("schema provisioning timed out after {0:?}")]
    Timeout(Duration),
}

/// Where in the load protocol a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Input,
    Dimension,
    Fact,
    Commit,
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadPhase::Input => "input",
            LoadPhase::Dimension => "dimension",
            LoadPhase::Fact => "fact",
            LoadPhase::Commit => "commit",
        })
    }
}

#[derive(Debug, Error)]
#[error("load failed in {phase} phase: {cause}")]
pub struct LoadError {
    pub phase: LoadPhase,
    #[source]
    pub cause: LoadCause,
}

impl LoadError {
    pub fn new(phase: LoadPhase, cause: impl Into<LoadCause>) -> Self {
        Self {
            phase,
            cause: cause.into(),
        }
    }
}

/// What went wrong inside a load. Any of these rolls the whole run back.
#[derive(Debug, Error)]
pub enum LoadCause {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{metric} value {value} for {location} on {date} does not fit the fact column")]
    ValueOutOfRange {
        metric: Metric,
        date: NaiveDate,
        location: Location,
        value: u32,
    },

    #[error("{metric} has more than one observation for {location} on {date}")]
    DuplicateObservation {
        metric: Metric,
        date: NaiveDate,
        location: Location,
    },

    #[error("table {0} does not exist")]
    MissingTable(&'static str),

    #[error("fact for {location} on {date} references a missing location")]
    MissingLocation { date: NaiveDate, location: Location },

    #[error(transparent)]
    Staging(#[from] StagingError),
}

/// A run failure, tagged with the stage that produced it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Reshape(#[from] ReshapeError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl PipelineError {
    pub fn phase(&self) -> &'static str {
        match self {
            PipelineError::Fetch(_) => "fetch",
            PipelineError::Reshape(_) => "process",
            PipelineError::Schema(_) => "create_schema",
            PipelineError::Load(_) => "load",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn load_error_reports_phase_and_cause() {
        let err = LoadError::new(LoadPhase::Dimension, LoadCause::Timeout(Duration::from_secs(3)));
        assert_eq!(err.to_string(), "load failed in dimension phase: timed out after 3s");
        assert!(err.source().is_some());
    }

    #[test]
    fn reshape_error_wraps_date_parse_error() {
        let err = ReshapeError {
            metric: Metric::Deaths,
            cause: DateParseError {
                column: 4,
                raw_value: "Lat2".to_string(),
            }
            .into(),
        };
        assert_eq!(
            err.to_string(),
            "reshaping deaths failed: column 4 header 'Lat2' is not a recognised date"
        );
        assert_eq!(PipelineError::from(err).phase(), "process");
    }
}
