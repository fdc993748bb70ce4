use ::duckdb::{params, Connection};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

/// Name of the table holding daily OHLCV rows.
pub const PRICE_TABLE: &str = "price_records";

const MIGRATIONS: &[Migration] = &[Migration {
    version: "0001_price_records",
    sql: r#"
CREATE TABLE IF NOT EXISTS price_records (
    symbol TEXT NOT NULL,
    record_date DATE NOT NULL,
    open DOUBLE NOT NULL,
    high DOUBLE NOT NULL,
    low DOUBLE NOT NULL,
    close DOUBLE NOT NULL,
    volume BIGINT NOT NULL,
    source TEXT NOT NULL,
    fetched_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(symbol, record_date),
    CHECK (low <= high),
    CHECK (open >= low AND open <= high),
    CHECK (close >= low AND close <= high),
    CHECK (volume >= 0)
);
"#,
}];

/// Apply every migration that has not been recorded in `schema_migrations`.
///
/// Returns the versions applied by this call, oldest first. Running it again
/// against an up-to-date database is a no-op.
pub fn apply_migrations(connection: &Connection) -> Result<Vec<&'static str>, ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    let mut applied = Vec::new();
    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params![migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params![migration.version],
            )?;
            tracing::debug!(version = migration.version, "applied migration");
            applied.push(migration.version);
        }
    }

    Ok(applied)
}
