use super::{CaseStore, WriteStats};
use crate::error::{LoadCause, LoadError, LoadPhase, SchemaError};
use crate::model::{CaseCounts, FactKey, FactRow, Location};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default, Clone)]
struct Tables {
    provisioned: bool,
    locations: BTreeSet<Location>,
    facts: BTreeMap<FactKey, CaseCounts>,
}

/// In-process store with the same merge and foreign-key rules as Postgres.
/// Backs dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose tables already exist.
    pub fn provisioned() -> Self {
        let store = Self::default();
        store.lock().provisioned = true;
        store
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn locations(&self) -> Vec<Location> {
        self.lock().locations.iter().cloned().collect()
    }

    pub fn facts(&self) -> Vec<(FactKey, CaseCounts)> {
        self.lock()
            .facts
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn fact(&self, date: NaiveDate, location: &Location) -> Option<CaseCounts> {
        let key = FactKey {
            date,
            location: location.clone(),
        };
        self.lock().facts.get(&key).copied()
    }
}

impl CaseStore for MemoryStore {
    async fn create_schema(&self) -> Result<(), SchemaError> {
        self.lock().provisioned = true;
        Ok(())
    }

    async fn write(
        &self,
        locations: &[Location],
        facts: &[FactRow],
    ) -> Result<WriteStats, LoadError> {
        let mut tables = self.lock();
        if !tables.provisioned {
            return Err(LoadError::new(
                LoadPhase::Dimension,
                LoadCause::MissingTable("dim_location"),
            ));
        }

        // Work on a copy and swap it in only once every row succeeded.
        let mut next = tables.clone();
        let mut stats = WriteStats::default();

        for location in locations {
            if next.locations.insert(location.clone()) {
                stats.locations_created += 1;
            }
        }

        for fact in facts {
            if !next.locations.contains(&fact.key.location) {
                return Err(LoadError::new(
                    LoadPhase::Fact,
                    LoadCause::MissingLocation {
                        date: fact.key.date,
                        location: fact.key.location.clone(),
                    },
                ));
            }
            match next.facts.get_mut(&fact.key) {
                Some(stored) => {
                    let merged = fact.values.merge_onto(stored);
                    if merged != *stored {
                        *stored = merged;
                        stats.facts_updated += 1;
                    }
                }
                None => {
                    next.facts
                        .insert(fact.key.clone(), fact.values.merge_onto(&CaseCounts::default()));
                    stats.facts_inserted += 1;
                }
            }
        }

        *tables = next;
        Ok(stats)
    }
}
