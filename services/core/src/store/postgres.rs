use super::{CaseStore, WriteStats};
use crate::config::Config;
use crate::error::{LoadCause, LoadError, LoadPhase, SchemaError};
use crate::model::{FactRow, Location, Metric};
use crate::schema;
use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::debug;

const UPSERT_LOCATIONS: &str = r#"
    INSERT INTO dim_location (country, state)
    SELECT * FROM UNNEST($1::varchar[], $2::varchar[])
    ON CONFLICT (country, state) DO NOTHING
"#;

/// New keys only; metrics absent from this run start at zero.
const INSERT_FACTS: &str = r#"
    INSERT INTO fact_covid_cases (date, country, state, confirmed, deaths, recovered)
    SELECT t.d, t.c, t.s, COALESCE(t.cf, 0), COALESCE(t.de, 0), COALESCE(t.re, 0)
    FROM UNNEST($1::date[], $2::varchar[], $3::varchar[], $4::int4[], $5::int4[], $6::int4[])
        AS t (d, c, s, cf, de, re)
    ON CONFLICT (date, country, state) DO NOTHING
"#;

/// Merge into existing keys; a NULL metric keeps the stored value.
const MERGE_FACTS: &str = r#"
    UPDATE fact_covid_cases f
    SET confirmed = COALESCE(t.cf, f.confirmed),
        deaths = COALESCE(t.de, f.deaths),
        recovered = COALESCE(t.re, f.recovered)
    FROM UNNEST($1::date[], $2::varchar[], $3::varchar[], $4::int4[], $5::int4[], $6::int4[])
        AS t (d, c, s, cf, de, re)
    WHERE f.date = t.d AND f.country = t.c AND f.state = t.s
      AND (f.confirmed, f.deaths, f.recovered) IS DISTINCT FROM
          (COALESCE(t.cf, f.confirmed), COALESCE(t.de, f.deaths), COALESCE(t.re, f.recovered))
"#;

pub struct PgStore {
    pool: PgPool,
    timeout: Duration,
    batch_size: usize,
}

impl PgStore {
    pub fn new(pool: PgPool, timeout: Duration, batch_size: usize) -> Self {
        Self {
            pool,
            timeout,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(config.load_timeout)
            .connect(config.db_url()?)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool, config.load_timeout, config.load_batch_size))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl CaseStore for PgStore {
    async fn create_schema(&self) -> Result<(), SchemaError> {
        let provision = async {
            let mut tx = self.pool.begin().await?;
            for statement in schema::STATEMENTS {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            tx.commit().await
        };
        timeout(self.timeout, provision)
            .await
            .map_err(|_| SchemaError::Timeout(self.timeout))??;
        Ok(())
    }

    async fn write(
        &self,
        locations: &[Location],
        facts: &[FactRow],
    ) -> Result<WriteStats, LoadError> {
        let deadline = Instant::now() + self.timeout;
        let budget = self.timeout;

        // Dropping `tx` on any early return rolls back and releases the connection.
        let mut tx = within(deadline, budget, LoadPhase::Dimension, self.pool.begin()).await?;

        let locations_created = within(
            deadline,
            budget,
            LoadPhase::Dimension,
            upsert_locations(&mut tx, locations, self.batch_size),
        )
        .await?;

        let (facts_inserted, facts_updated) = within(
            deadline,
            budget,
            LoadPhase::Fact,
            merge_facts(&mut tx, facts, self.batch_size),
        )
        .await?;

        within(deadline, budget, LoadPhase::Commit, tx.commit()).await?;

        Ok(WriteStats {
            locations_created,
            facts_inserted,
            facts_updated,
        })
    }
}

async fn within<T, E>(
    deadline: Instant,
    budget: Duration,
    phase: LoadPhase,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, LoadError>
where
    E: Into<LoadCause>,
{
    match timeout_at(deadline, fut).await {
        Ok(result) => result.map_err(|e| LoadError::new(phase, e)),
        Err(_) => Err(LoadError::new(phase, LoadCause::Timeout(budget))),
    }
}

async fn upsert_locations(
    conn: &mut PgConnection,
    locations: &[Location],
    batch_size: usize,
) -> Result<u64, sqlx::Error> {
    let mut created = 0;
    for chunk in locations.chunks(batch_size) {
        let (countries, states): (Vec<String>, Vec<String>) = chunk
            .iter()
            .map(|l| (l.country.clone(), l.state.clone()))
            .unzip();
        created += sqlx::query(UPSERT_LOCATIONS)
            .bind(countries)
            .bind(states)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    debug!(created, total = locations.len(), "upserted locations");
    Ok(created)
}

/// Column-major copy of a batch of fact rows, ready to bind to `UNNEST`.
#[derive(Default, Clone)]
struct FactColumns {
    dates: Vec<NaiveDate>,
    countries: Vec<String>,
    states: Vec<String>,
    confirmed: Vec<Option<i32>>,
    deaths: Vec<Option<i32>>,
    recovered: Vec<Option<i32>>,
}

impl FactColumns {
    fn from_rows(rows: &[FactRow]) -> Result<Self, LoadCause> {
        let mut cols = FactColumns::default();
        for row in rows {
            let column = |metric: Metric| -> Result<Option<i32>, LoadCause> {
                row.values
                    .get(metric)
                    .map(|value| {
                        i32::try_from(value).map_err(|_| LoadCause::ValueOutOfRange {
                            metric,
                            date: row.key.date,
                            location: row.key.location.clone(),
                            value,
                        })
                    })
                    .transpose()
            };
            cols.confirmed.push(column(Metric::Confirmed)?);
            cols.deaths.push(column(Metric::Deaths)?);
            cols.recovered.push(column(Metric::Recovered)?);
            cols.dates.push(row.key.date);
            cols.countries.push(row.key.location.country.clone());
            cols.states.push(row.key.location.state.clone());
        }
        Ok(cols)
    }

    fn bind_to<'q>(
        self,
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        query
            .bind(self.dates)
            .bind(self.countries)
            .bind(self.states)
            .bind(self.confirmed)
            .bind(self.deaths)
            .bind(self.recovered)
    }
}

/// Insert new keys, then merge into every existing key of the batch.
async fn merge_facts(
    conn: &mut PgConnection,
    facts: &[FactRow],
    batch_size: usize,
) -> Result<(u64, u64), LoadCause> {
    let mut inserted = 0;
    let mut updated = 0;
    for chunk in facts.chunks(batch_size) {
        let columns = FactColumns::from_rows(chunk)?;

        let new_rows = columns
            .clone()
            .bind_to(sqlx::query(INSERT_FACTS))
            .execute(&mut *conn)
            .await?
            .rows_affected();
        let merged_rows = columns
            .bind_to(sqlx::query(MERGE_FACTS))
            .execute(&mut *conn)
            .await?
            .rows_affected();

        inserted += new_rows;
        updated += merged_rows;
        debug!(batch = chunk.len(), new_rows, merged_rows, "merged fact batch");
    }
    Ok((inserted, updated))
}
