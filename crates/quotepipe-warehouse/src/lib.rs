//! # Quotepipe Warehouse
//!
//! DuckDB-backed storage for daily OHLCV rows.
//!
//! ## Overview
//!
//! The warehouse owns one table, `price_records`, keyed on
//! `(symbol, record_date)`. Writes go through [`Warehouse::upsert_prices`],
//! which issues `INSERT .. ON CONFLICT .. DO UPDATE` for every row inside one
//! short transaction, so re-running a batch converges on the same stored state
//! and never produces a second row for the same key.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quotepipe_warehouse::{PriceRow, Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::at("warehouse.duckdb"))?;
//!
//!     let rows = vec![PriceRow {
//!         symbol: "AAPL".to_string(),
//!         record_date: "2024-01-02".to_string(),
//!         open: 100.0,
//!         high: 105.0,
//!         low: 99.0,
//!         close: 104.0,
//!         volume: 1_000,
//!     }];
//!     let affected = warehouse.upsert_prices("alphavantage", &rows)?;
//!     assert_eq!(affected, 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `price_records` | Daily OHLCV rows, one per symbol and date |
//! | `schema_migrations` | Applied migration versions |

pub mod duckdb;
pub mod migrations;

use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{params, ToSql};
use serde::Serialize;
use thiserror::Error;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};
pub use migrations::PRICE_TABLE;

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A stored row could not be mapped back into a [`StoredPrice`].
    #[error("stored row for {symbol} is invalid: {reason}")]
    InvalidRow { symbol: String, reason: String },
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseConfig {
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl WarehouseConfig {
    /// Default pool size used by [`WarehouseConfig::at`].
    pub const DEFAULT_POOL_SIZE: usize = 4;

    pub fn at(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            max_pool_size: Self::DEFAULT_POOL_SIZE,
        }
    }

    pub fn with_pool_size(mut self, max_pool_size: usize) -> Self {
        self.max_pool_size = max_pool_size;
        self
    }
}

/// A daily OHLCV row for ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRow {
    /// Ticker symbol (e.g., "AAPL").
    pub symbol: String,
    /// Trading date as `YYYY-MM-DD`.
    pub record_date: String,
    /// Opening price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Traded volume.
    pub volume: u64,
}

/// A row read back from `price_records`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPrice {
    pub symbol: String,
    pub record_date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub source: String,
    pub fetched_at: String,
}

const UPSERT_PRICE_SQL: &str = "INSERT INTO price_records \
     (symbol, record_date, open, high, low, close, volume, source, fetched_at) \
     VALUES (?, CAST(? AS DATE), ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP) \
     ON CONFLICT (symbol, record_date) DO UPDATE SET \
     open = EXCLUDED.open, \
     high = EXCLUDED.high, \
     low = EXCLUDED.low, \
     close = EXCLUDED.close, \
     volume = EXCLUDED.volume, \
     source = EXCLUDED.source, \
     fetched_at = EXCLUDED.fetched_at";

/// The main warehouse interface for daily price storage.
#[derive(Clone)]
pub struct Warehouse {
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open a warehouse, creating the database file and schema when missing.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = DuckDbConnectionManager::open(config.db_path, config.max_pool_size)?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply pending migrations. Returns the versions applied by this call.
    pub fn initialize(&self) -> Result<Vec<&'static str>, WarehouseError> {
        let connection = self.manager.acquire()?;
        Ok(migrations::apply_migrations(&connection)?)
    }

    /// Every migration version recorded in the database, oldest first.
    pub fn applied_migrations(&self) -> Result<Vec<String>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement =
            connection.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
        let versions = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(versions)
    }

    /// Get the path to the database file.
    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    /// Upsert daily rows keyed on `(symbol, record_date)`.
    ///
    /// All rows are written in one transaction: either every row lands or
    /// none does. Existing rows have their OHLCV fields, `source` and
    /// `fetched_at` overwritten. Returns the number of rows affected.
    ///
    /// # Security
    /// Every value is bound as a query parameter.
    pub fn upsert_prices(&self, source: &str, rows: &[PriceRow]) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            let mut statement = connection.prepare(UPSERT_PRICE_SQL)?;
            let mut affected = 0;
            for row in rows {
                let volume = i64::try_from(row.volume).map_err(|_| WarehouseError::InvalidRow {
                    symbol: row.symbol.clone(),
                    reason: format!("volume {} does not fit BIGINT", row.volume),
                })?;
                let params: [&dyn ToSql; 8] = [
                    &row.symbol,
                    &row.record_date,
                    &row.open,
                    &row.high,
                    &row.low,
                    &row.close,
                    &volume,
                    &source,
                ];
                affected += statement.execute(params.as_slice())?;
            }
            Ok(affected)
        })();

        finalize_transaction(&connection, result)
    }

    /// Stored rows for `symbol`, newest first.
    pub fn prices_for(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<StoredPrice>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT symbol, CAST(record_date AS VARCHAR), open, high, low, close, volume, \
             source, CAST(fetched_at AS VARCHAR) \
             FROM price_records WHERE symbol = ? ORDER BY record_date DESC LIMIT ?",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let params: [&dyn ToSql; 2] = [&symbol, &limit];
        let rows = statement.query_map(params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut prices = Vec::new();
        for row in rows {
            let (symbol, record_date, open, high, low, close, volume, source, fetched_at) = row?;
            let volume = u64::try_from(volume).map_err(|_| WarehouseError::InvalidRow {
                symbol: symbol.clone(),
                reason: format!("negative volume {volume} on {record_date}"),
            })?;
            prices.push(StoredPrice {
                symbol,
                record_date,
                open,
                high,
                low,
                close,
                volume,
                source,
                fetched_at,
            });
        }

        Ok(prices)
    }

    /// Number of stored rows, optionally restricted to one symbol.
    pub fn count_prices(&self, symbol: Option<&str>) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let count: i64 = match symbol {
            Some(symbol) => connection.query_row(
                "SELECT COUNT(*) FROM price_records WHERE symbol = ?",
                params![symbol],
                |row| row.get(0),
            )?,
            None => connection.query_row("SELECT COUNT(*) FROM price_records", [], |row| {
                row.get(0)
            })?,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

fn finalize_transaction<T>(
    connection: &::duckdb::Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = connection.execute_batch("ROLLBACK") {
                tracing::warn!(error = %rollback_error, "rollback failed");
            }
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_temp(dir: &Path) -> Warehouse {
        Warehouse::open(WarehouseConfig::at(dir.join("warehouse.duckdb")).with_pool_size(2))
            .expect("warehouse open")
    }

    fn row(symbol: &str, date: &str, close: f64, volume: u64) -> PriceRow {
        PriceRow {
            symbol: symbol.to_string(),
            record_date: date.to_string(),
            open: 100.0,
            high: 110.0,
            low: 90.0,
            close,
            volume,
        }
    }

    #[test]
    fn open_creates_schema_and_nested_directories() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("db").join("warehouse.duckdb");
        let warehouse = Warehouse::open(WarehouseConfig::at(&path)).expect("open");

        assert_eq!(warehouse.db_path(), path.as_path());
        assert_eq!(warehouse.count_prices(None).expect("count"), 0);
        assert!(warehouse.initialize().expect("re-init").is_empty());
        assert_eq!(
            warehouse.applied_migrations().expect("versions"),
            vec!["0001_price_records".to_string()]
        );
    }

    #[test]
    fn upsert_overwrites_existing_key_in_place() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(temp.path());

        warehouse
            .upsert_prices("alphavantage", &[row("AAPL", "2024-01-02", 104.0, 1_000)])
            .expect("first write");
        let first_fetch = warehouse.prices_for("AAPL", 1).expect("read first")[0]
            .fetched_at
            .clone();
        let affected = warehouse
            .upsert_prices("alphavantage", &[row("AAPL", "2024-01-02", 101.5, 2_500)])
            .expect("conflicting write updates in place");
        assert_eq!(affected, 1);

        let stored = warehouse.prices_for("AAPL", 10).expect("read back");
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].fetched_at.is_empty());
        assert!(stored[0].fetched_at >= first_fetch);
        assert_eq!(stored[0].record_date, "2024-01-02");
        assert_eq!(stored[0].close, 101.5);
        assert_eq!(stored[0].volume, 2_500);
        assert_eq!(stored[0].source, "alphavantage");
    }

    #[test]
    fn failed_row_rolls_back_the_whole_batch() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(temp.path());

        let mut broken = row("MSFT", "2024-01-03", 104.0, 10);
        broken.low = 200.0;
        let error = warehouse
            .upsert_prices("alphavantage", &[row("MSFT", "2024-01-02", 104.0, 10), broken])
            .expect_err("check constraint must reject low > high");
        assert!(matches!(error, WarehouseError::DuckDb(_)));

        assert_eq!(warehouse.count_prices(Some("MSFT")).expect("count"), 0);
    }

    #[test]
    fn prices_for_orders_newest_first_and_respects_limit() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(temp.path());

        let rows = vec![
            row("IBM", "2024-01-02", 100.0, 1),
            row("IBM", "2024-01-04", 100.0, 3),
            row("IBM", "2024-01-03", 100.0, 2),
            row("AAPL", "2024-01-05", 100.0, 9),
        ];
        assert_eq!(warehouse.upsert_prices("alphavantage", &rows).expect("write"), 4);

        let stored = warehouse.prices_for("IBM", 2).expect("read");
        let dates = stored
            .iter()
            .map(|price| price.record_date.as_str())
            .collect::<Vec<_>>();
        assert_eq!(dates, vec!["2024-01-04", "2024-01-03"]);
        assert_eq!(warehouse.count_prices(Some("IBM")).expect("count"), 3);
        assert_eq!(warehouse.count_prices(None).expect("count"), 4);
    }

    #[test]
    fn symbol_values_are_bound_not_interpolated() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(temp.path());

        let hostile = "AAPL'; DROP TABLE price_records; --";
        warehouse
            .upsert_prices("alphavantage", &[row(hostile, "2024-01-02", 104.0, 1)])
            .expect("write");

        assert_eq!(warehouse.prices_for(hostile, 1).expect("read").len(), 1);
        assert_eq!(warehouse.count_prices(None).expect("table still exists"), 1);
    }
}
