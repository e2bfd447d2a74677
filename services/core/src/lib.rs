//! Daily COVID-19 time-series ingestion: fetch the provider's wide CSV tables,
//! reshape them into per-date observations, and load them idempotently into a
//! location dimension and a case-fact table.

pub mod config;
pub mod error;
pub mod fetch;
pub mod load;
pub mod model;
pub mod reshape;
pub mod schema;
pub mod staging;
pub mod store;
pub mod tasks;
pub mod telemetry;

pub use config::Config;
pub use error::{
    DateParseError, FetchError, LoadError, LoadPhase, PipelineError, ReshapeError, SchemaError,
};
pub use model::{Location, Metric, NormalizedObservation, ObservationSet, RawTable};
