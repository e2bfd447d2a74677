//! Persistence seam for the location dimension and the case-fact table.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::{LoadError, SchemaError};
use crate::model::{FactRow, Location};
use serde::Serialize;
use std::future::Future;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub locations_created: u64,
    pub facts_inserted: u64,
    /// Existing rows whose stored counts changed.
    pub facts_updated: u64,
}

pub trait CaseStore {
    /// Create the dimension and fact tables if they are missing.
    fn create_schema(&self) -> impl Future<Output = Result<(), SchemaError>> + Send;

    /// Upsert `locations`, then merge `facts`, as a single unit of work.
    ///
    /// Locations are inserted or ignored; facts are inserted, or merged into the
    /// stored row so that metrics absent from `facts` keep their stored value.
    /// On error nothing is written.
    fn write(
        &self,
        locations: &[Location],
        facts: &[FactRow],
    ) -> impl Future<Output = Result<WriteStats, LoadError>> + Send;
}
