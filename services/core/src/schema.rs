//! DDL for the star schema. Every statement is safe to run repeatedly.

pub const CREATE_DIM_LOCATION: &str = r#"
    CREATE TABLE IF NOT EXISTS dim_location (
        id SERIAL PRIMARY KEY,
        country VARCHAR(255) NOT NULL,
        state VARCHAR(255) NOT NULL,
        UNIQUE (country, state)
    )
"#;

pub const CREATE_FACT_COVID_CASES: &str = r#"
    CREATE TABLE IF NOT EXISTS fact_covid_cases (
        id SERIAL PRIMARY KEY,
        date DATE NOT NULL,
        country VARCHAR(255) NOT NULL,
        state VARCHAR(255) NOT NULL,
        confirmed INT NOT NULL DEFAULT 0,
        deaths INT NOT NULL DEFAULT 0,
        recovered INT NOT NULL DEFAULT 0,
        FOREIGN KEY (country, state) REFERENCES dim_location (country, state)
    )
"#;

/// Kept separate from the table so tables created before the key existed gain it too.
pub const CREATE_FACT_KEY_INDEX: &str = r#"
    CREATE UNIQUE INDEX IF NOT EXISTS fact_covid_cases_date_location_key
        ON fact_covid_cases (date, country, state)
"#;

/// In dependency order.
pub const STATEMENTS: &[&str] = &[
    CREATE_DIM_LOCATION,
    CREATE_FACT_COVID_CASES,
    CREATE_FACT_KEY_INDEX,
];
