//! Domain types shared by every stage of the pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Sentinel stored in place of a blank province/state so the location key is never null.
pub const MISSING_STATE: &str = "N/A";

/// One of the three published time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Confirmed,
    Deaths,
    Recovered,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Confirmed, Metric::Deaths, Metric::Recovered];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Confirmed => "confirmed",
            Metric::Deaths => "deaths",
            Metric::Recovered => "recovered",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "confirmed" => Ok(Metric::Confirmed),
            "deaths" => Ok(Metric::Deaths),
            "recovered" => Ok(Metric::Recovered),
            other => Err(format!("unknown metric '{}'", other)),
        }
    }
}

/// A wide table exactly as the provider published it: one row per location,
/// one column per reporting date.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Parse CSV text. Rows must all have as many fields as the header.
    pub fn parse(content: &str) -> Result<Self, csv::Error> {
        // Remove UTF-8 BOM if present
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);

        let mut reader = csv::ReaderBuilder::new()
            .flexible(false)
            .from_reader(content.as_bytes());

        let headers = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(|v| v.to_string()).collect());
        }

        Ok(Self { headers, rows })
    }
}

/// Natural key of the location dimension.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub country: String,
    pub state: String,
}

impl Location {
    /// Build a location, replacing a blank state with [`MISSING_STATE`].
    pub fn new(country: &str, state: &str) -> Self {
        let state = state.trim();
        Self {
            country: country.trim().to_string(),
            state: if state.is_empty() {
                MISSING_STATE.to_string()
            } else {
                state.to_string()
            },
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.country, self.state)
    }
}

/// One cell of a wide table after unpivoting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedObservation {
    pub date: NaiveDate,
    pub location: Location,
    pub metric: Metric,
    pub value: u32,
}

/// Reshaped observations keyed by the metric they came from. A load may carry
/// any subset of the metrics.
pub type ObservationSet = BTreeMap<Metric, Vec<NormalizedObservation>>;

/// A fact row about to be written. `None` means the metric was not supplied
/// by this run and must not overwrite a stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricValues {
    pub confirmed: Option<u32>,
    pub deaths: Option<u32>,
    pub recovered: Option<u32>,
}

impl MetricValues {
    pub fn get(&self, metric: Metric) -> Option<u32> {
        match metric {
            Metric::Confirmed => self.confirmed,
            Metric::Deaths => self.deaths,
            Metric::Recovered => self.recovered,
        }
    }

    pub fn slot(&mut self, metric: Metric) -> &mut Option<u32> {
        match metric {
            Metric::Confirmed => &mut self.confirmed,
            Metric::Deaths => &mut self.deaths,
            Metric::Recovered => &mut self.recovered,
        }
    }

    /// Overlay these values on a stored row; absent metrics keep the stored value.
    pub fn merge_onto(&self, stored: &CaseCounts) -> CaseCounts {
        CaseCounts {
            confirmed: self.confirmed.unwrap_or(stored.confirmed),
            deaths: self.deaths.unwrap_or(stored.deaths),
            recovered: self.recovered.unwrap_or(stored.recovered),
        }
    }
}

/// The three metric columns of a persisted fact row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaseCounts {
    pub confirmed: u32,
    pub deaths: u32,
    pub recovered: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FactKey {
    pub date: NaiveDate,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactRow {
    pub key: FactKey,
    pub values: MetricValues,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_state_becomes_sentinel() {
        assert_eq!(Location::new("Testland", "").state, MISSING_STATE);
        assert_eq!(Location::new("Testland", "   ").state, MISSING_STATE);
        assert_eq!(Location::new(" Testland ", " North ").state, "North");
        assert_eq!(Location::new(" Testland ", "North").country, "Testland");
    }

    #[test]
    fn metric_parses_case_insensitively() {
        assert_eq!("Deaths".parse::<Metric>().unwrap(), Metric::Deaths);
        assert!("active".parse::<Metric>().is_err());
    }

    #[test]
    fn raw_table_strips_bom_and_rejects_ragged_rows() {
        let table = RawTable::parse("\u{feff}a,b\n1,2\n").unwrap();
        assert_eq!(table.headers, vec!["a", "b"]);
        assert_eq!(table.rows, vec![vec!["1".to_string(), "2".to_string()]]);

        assert!(RawTable::parse("a,b\n1,2,3\n").is_err());
    }

    #[test]
    fn merge_keeps_stored_values_for_absent_metrics() {
        let stored = CaseCounts {
            confirmed: 5,
            deaths: 1,
            recovered: 2,
        };
        let incoming = MetricValues {
            deaths: Some(3),
            ..Default::default()
        };
        assert_eq!(
            incoming.merge_onto(&stored),
            CaseCounts {
                confirmed: 5,
                deaths: 3,
                recovered: 2
            }
        );
    }
}
