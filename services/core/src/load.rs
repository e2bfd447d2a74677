//! Loader: observations in, dimension and fact rows out.

use crate::error::{LoadCause, LoadError, LoadPhase};
use crate::model::{FactKey, FactRow, Location, Metric, MetricValues, ObservationSet};
use crate::store::{CaseStore, WriteStats};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub run_id: Uuid,
    pub metrics: Vec<Metric>,
    pub locations_seen: usize,
    pub facts_seen: usize,
    #[serde(flatten)]
    pub written: WriteStats,
}

/// Distinct `(country, state)` pairs across every metric, in key order.
pub fn distinct_locations(observations: &ObservationSet) -> Vec<Location> {
    observations
        .values()
        .flatten()
        .map(|o| &o.location)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .cloned()
        .collect()
}

/// Group observations by `(date, location)`, one column per metric.
/// Metrics with no observation for a key stay `None`.
pub fn merge_observations(observations: &ObservationSet) -> Result<Vec<FactRow>, LoadCause> {
    let mut grouped: BTreeMap<FactKey, MetricValues> = BTreeMap::new();

    for (metric, obs) in observations {
        for o in obs {
            let key = FactKey {
                date: o.date,
                location: o.location.clone(),
            };
            let slot = grouped.entry(key).or_default().slot(*metric);
            if slot.is_some() {
                return Err(LoadCause::DuplicateObservation {
                    metric: *metric,
                    date: o.date,
                    location: o.location.clone(),
                });
            }
            *slot = Some(o.value);
        }
    }

    Ok(grouped
        .into_iter()
        .map(|(key, values)| FactRow { key, values })
        .collect())
}

/// Write one run's observations: every location first, then the merged facts,
/// all in one unit of work.
pub async fn load<S: CaseStore>(
    store: &S,
    observations: &ObservationSet,
) -> Result<LoadSummary, LoadError> {
    let run_id = Uuid::new_v4();
    let metrics: Vec<Metric> = observations.keys().copied().collect();

    let locations = distinct_locations(observations);
    let facts = merge_observations(observations).map_err(|e| LoadError::new(LoadPhase::Input, e))?;

    info!(
        %run_id,
        metrics = ?metrics,
        locations = locations.len(),
        facts = facts.len(),
        "loading"
    );

    let written = store.write(&locations, &facts).await?;

    info!(
        %run_id,
        locations_created = written.locations_created,
        facts_inserted = written.facts_inserted,
        facts_updated = written.facts_updated,
        "load committed"
    );

    Ok(LoadSummary {
        run_id,
        metrics,
        locations_seen: locations.len(),
        facts_seen: facts.len(),
        written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CaseCounts, NormalizedObservation, MISSING_STATE};
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn obs(metric: Metric, d: &str, country: &str, value: u32) -> NormalizedObservation {
        NormalizedObservation {
            date: date(d),
            location: Location::new(country, ""),
            metric,
            value,
        }
    }

    fn set(entries: Vec<NormalizedObservation>) -> ObservationSet {
        let mut set = ObservationSet::new();
        for o in entries {
            set.entry(o.metric).or_default().push(o);
        }
        set
    }

    fn testland() -> Location {
        Location::new("Testland", MISSING_STATE)
    }

    #[test]
    fn merge_combines_metrics_per_key() {
        let rows = merge_observations(&set(vec![
            obs(Metric::Confirmed, "2022-01-01", "Testland", 5),
            obs(Metric::Deaths, "2022-01-01", "Testland", 1),
            obs(Metric::Confirmed, "2022-01-02", "Testland", 9),
        ]))
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].values,
            MetricValues {
                confirmed: Some(5),
                deaths: Some(1),
                recovered: None
            }
        );
        assert_eq!(rows[1].key.date, date("2022-01-02"));
        assert_eq!(rows[1].values.deaths, None);
    }

    #[test]
    fn duplicate_observation_is_rejected() {
        let err = merge_observations(&set(vec![
            obs(Metric::Deaths, "2022-01-01", "Testland", 1),
            obs(Metric::Deaths, "2022-01-01", "Testland", 2),
        ]))
        .unwrap_err();
        assert!(matches!(err, LoadCause::DuplicateObservation { metric: Metric::Deaths, .. }));
    }

    #[test]
    fn locations_are_distinct_across_metrics() {
        let locations = distinct_locations(&set(vec![
            obs(Metric::Confirmed, "2022-01-01", "Testland", 5),
            obs(Metric::Deaths, "2022-01-01", "Testland", 1),
            obs(Metric::Recovered, "2022-01-01", "Otherland", 1),
        ]));
        assert_eq!(
            locations,
            vec![Location::new("Otherland", ""), Location::new("Testland", "")]
        );
    }

    #[tokio::test]
    async fn single_metric_scenario_is_idempotent() {
        let store = MemoryStore::provisioned();
        let input = set(vec![
            obs(Metric::Confirmed, "2022-01-01", "Testland", 5),
            obs(Metric::Confirmed, "2022-01-02", "Testland", 9),
        ]);

        let first = load(&store, &input).await.unwrap();
        assert_eq!(first.written.locations_created, 1);
        assert_eq!(first.written.facts_inserted, 2);
        assert_eq!(store.locations(), vec![testland()]);
        assert_eq!(
            store.fact(date("2022-01-01"), &testland()),
            Some(CaseCounts { confirmed: 5, deaths: 0, recovered: 0 })
        );
        assert_eq!(
            store.fact(date("2022-01-02"), &testland()),
            Some(CaseCounts { confirmed: 9, deaths: 0, recovered: 0 })
        );

        let before = store.facts();
        let second = load(&store, &input).await.unwrap();
        assert_eq!(second.written, WriteStats::default());
        assert_eq!(store.facts(), before);
        assert_eq!(store.locations().len(), 1);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn later_partial_run_merges_instead_of_overwriting() {
        let store = MemoryStore::provisioned();
        load(&store, &set(vec![obs(Metric::Confirmed, "2022-01-01", "Testland", 5)]))
            .await
            .unwrap();
        let summary = load(&store, &set(vec![obs(Metric::Deaths, "2022-01-01", "Testland", 2)]))
            .await
            .unwrap();

        assert_eq!(summary.metrics, vec![Metric::Deaths]);
        assert_eq!(summary.written.facts_updated, 1);
        assert_eq!(store.facts().len(), 1);
        assert_eq!(
            store.fact(date("2022-01-01"), &testland()),
            Some(CaseCounts { confirmed: 5, deaths: 2, recovered: 0 })
        );
    }

    #[tokio::test]
    async fn concurrent_partial_runs_keep_both_metrics() {
        let store = MemoryStore::provisioned();
        let confirmed = set(vec![obs(Metric::Confirmed, "2022-01-01", "Testland", 5)]);
        let deaths = set(vec![obs(Metric::Deaths, "2022-01-01", "Testland", 2)]);

        let (a, b) = tokio::join!(load(&store, &confirmed), load(&store, &deaths));
        a.unwrap();
        b.unwrap();

        assert_eq!(store.locations(), vec![testland()]);
        assert_eq!(
            store.fact(date("2022-01-01"), &testland()),
            Some(CaseCounts { confirmed: 5, deaths: 2, recovered: 0 })
        );
    }

    #[tokio::test]
    async fn corrected_value_replaces_only_its_metric() {
        let store = MemoryStore::provisioned();
        load(
            &store,
            &set(vec![
                obs(Metric::Confirmed, "2022-01-01", "Testland", 5),
                obs(Metric::Recovered, "2022-01-01", "Testland", 3),
            ]),
        )
        .await
        .unwrap();
        load(&store, &set(vec![obs(Metric::Confirmed, "2022-01-01", "Testland", 6)]))
            .await
            .unwrap();

        assert_eq!(
            store.fact(date("2022-01-01"), &testland()),
            Some(CaseCounts { confirmed: 6, deaths: 0, recovered: 3 })
        );
    }

    #[tokio::test]
    async fn input_errors_write_nothing() {
        let store = MemoryStore::provisioned();
        let err = load(
            &store,
            &set(vec![
                obs(Metric::Deaths, "2022-01-01", "Testland", 1),
                obs(Metric::Deaths, "2022-01-01", "Testland", 2),
            ]),
        )
        .await
        .unwrap_err();

        assert_eq!(err.phase, LoadPhase::Input);
        assert!(store.locations().is_empty());
    }

    #[test]
    fn summary_serializes_flat() {
        let summary = LoadSummary {
            run_id: Uuid::nil(),
            metrics: vec![Metric::Confirmed],
            locations_seen: 1,
            facts_seen: 2,
            written: WriteStats {
                locations_created: 1,
                facts_inserted: 2,
                facts_updated: 0,
            },
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["metrics"], serde_json::json!(["confirmed"]));
        assert_eq!(json["facts_inserted"], 2);
    }
}
