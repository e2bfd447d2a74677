//! Wide-to-long reshape of provider tables.
//!
//! Pure functions over in-memory tables; nothing here touches the network,
//! the staging directory or the database.

use crate::error::{DateParseError, ReshapeCause, ReshapeError};
use crate::model::{Location, Metric, NormalizedObservation, ObservationSet, RawTable};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::warn;

/// Leading columns that describe the location (state, country, lat, long).
pub const METADATA_COLUMNS: usize = 4;

const COUNTRY_HEADERS: &[&str] = &["country/region", "country_region", "country"];
const STATE_HEADERS: &[&str] = &["province/state", "province_state", "state"];

/// Tried in order; the provider's native `1/22/20` comes first so two-digit
/// years are never read as the first century.
const DATE_FORMATS: &[&str] = &["%m/%d/%y", "%m/%d/%Y", "%Y-%m-%d"];

pub fn parse_date_header(column: usize, raw: &str) -> Result<NaiveDate, DateParseError> {
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| DateParseError {
            column,
            raw_value: raw.to_string(),
        })
}

fn find_column(headers: &[String], candidates: &[&str]) -> Option<usize> {
    headers
        .iter()
        .take(METADATA_COLUMNS)
        .position(|h| candidates.contains(&h.trim().to_lowercase().as_str()))
}

/// Unpivot one table: every `(location, date column)` cell becomes one observation.
pub fn reshape_table(
    metric: Metric,
    raw: &RawTable,
) -> Result<Vec<NormalizedObservation>, ReshapeError> {
    unpivot(metric, raw).map_err(|cause| ReshapeError { metric, cause })
}

fn unpivot(metric: Metric, raw: &RawTable) -> Result<Vec<NormalizedObservation>, ReshapeCause> {
    if raw.headers.len() < METADATA_COLUMNS {
        return Err(ReshapeCause::TooFewColumns {
            expected: METADATA_COLUMNS,
            found: raw.headers.len(),
        });
    }

    let country_col =
        find_column(&raw.headers, COUNTRY_HEADERS).ok_or(ReshapeCause::MissingColumn("country"))?;
    let state_col =
        find_column(&raw.headers, STATE_HEADERS).ok_or(ReshapeCause::MissingColumn("state"))?;

    // Every date header must parse before any row is touched.
    let dates = raw
        .headers
        .iter()
        .enumerate()
        .skip(METADATA_COLUMNS)
        .map(|(idx, header)| parse_date_header(idx, header))
        .collect::<Result<Vec<_>, _>>()?;

    let mut distinct = BTreeSet::new();
    for (offset, date) in dates.iter().enumerate() {
        if !distinct.insert(*date) {
            let column = METADATA_COLUMNS + offset;
            return Err(ReshapeCause::DuplicateDateColumn {
                column,
                raw_value: raw.headers[column].clone(),
                date: *date,
            });
        }
    }

    let mut observations = Vec::with_capacity(raw.rows.len() * dates.len());
    let mut seen: HashSet<Location> = HashSet::with_capacity(raw.rows.len());

    for (row_idx, row) in raw.rows.iter().enumerate() {
        let line = row_idx + 2; // header is line 1
        let field = |idx: usize| row.get(idx).map(String::as_str).unwrap_or("");

        if field(country_col).trim().is_empty() {
            return Err(ReshapeCause::BlankCountry { row: line });
        }
        let location = Location::new(field(country_col), field(state_col));
        if !seen.insert(location.clone()) {
            return Err(ReshapeCause::DuplicateLocation {
                row: line,
                location,
            });
        }

        for (offset, date) in dates.iter().enumerate() {
            let col = METADATA_COLUMNS + offset;
            let raw_value = field(col);
            let value = raw_value
                .trim()
                .parse::<u32>()
                .map_err(|_| ReshapeCause::InvalidValue {
                    row: line,
                    column: raw.headers[col].clone(),
                    raw: raw_value.to_string(),
                })?;

            observations.push(NormalizedObservation {
                date: *date,
                location: location.clone(),
                metric,
                value,
            });
        }
    }

    Ok(observations)
}

/// Reshape every table. Fails as a whole if any metric fails.
pub fn reshape(raw: &BTreeMap<Metric, RawTable>) -> Result<ObservationSet, ReshapeError> {
    raw.iter()
        .map(|(metric, table)| Ok((*metric, reshape_table(*metric, table)?)))
        .collect()
}

/// What one metric lacks compared with the union over all metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentGap {
    pub metric: Metric,
    pub missing_dates: Vec<NaiveDate>,
    pub missing_locations: Vec<Location>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentReport {
    pub gaps: Vec<AlignmentGap>,
}

impl AlignmentReport {
    pub fn is_aligned(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn log(&self) {
        for gap in &self.gaps {
            warn!(
                metric = %gap.metric,
                missing_dates = gap.missing_dates.len(),
                missing_locations = gap.missing_locations.len(),
                first_missing_date = ?gap.missing_dates.first(),
                first_missing_location = ?gap.missing_locations.first().map(ToString::to_string),
                "source tables are not aligned"
            );
        }
    }
}

/// Compare the date and location coverage of each metric.
pub fn check_alignment(observations: &ObservationSet) -> AlignmentReport {
    let coverage: BTreeMap<Metric, (BTreeSet<NaiveDate>, BTreeSet<&Location>)> = observations
        .iter()
        .map(|(metric, obs)| {
            let dates = obs.iter().map(|o| o.date).collect();
            let locations = obs.iter().map(|o| &o.location).collect();
            (*metric, (dates, locations))
        })
        .collect();

    let all_dates: BTreeSet<NaiveDate> = coverage.values().flat_map(|(d, _)| d.iter().copied()).collect();
    let all_locations: BTreeSet<&Location> =
        coverage.values().flat_map(|(_, l)| l.iter().copied()).collect();

    let gaps = coverage
        .iter()
        .filter_map(|(metric, (dates, locations))| {
            let missing_dates: Vec<NaiveDate> = all_dates.difference(dates).copied().collect();
            let missing_locations: Vec<Location> = all_locations
                .difference(locations)
                .map(|l| (*l).clone())
                .collect();
            if missing_dates.is_empty() && missing_locations.is_empty() {
                None
            } else {
                Some(AlignmentGap {
                    metric: *metric,
                    missing_dates,
                    missing_locations,
                })
            }
        })
        .collect();

    AlignmentReport { gaps }
}
