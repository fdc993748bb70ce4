use quotepipe_warehouse::{PriceRow, Warehouse, WarehouseError};

use crate::domain::format_date;
use crate::{PipelineError, PriceRecord};

/// Destination for normalized records.
///
/// Implementations must upsert on `(symbol, record_date)` so replaying a
/// batch leaves the store unchanged, and must commit all records of one call
/// atomically.
pub trait PriceSink: Send + Sync {
    /// Upsert `records` tagged with provider `source`; returns rows affected.
    fn upsert(&self, source: &str, records: &[PriceRecord]) -> Result<usize, PipelineError>;
}

impl PriceSink for Warehouse {
    fn upsert(&self, source: &str, records: &[PriceRecord]) -> Result<usize, PipelineError> {
        if records.is_empty() {
            return Ok(0);
        }

        let rows = records.iter().map(to_row).collect::<Vec<_>>();
        self.upsert_prices(source, &rows).map_err(storage_error)
    }
}

fn to_row(record: &PriceRecord) -> PriceRow {
    PriceRow {
        symbol: record.symbol().to_string(),
        record_date: format_date(record.date()),
        open: record.open(),
        high: record.high(),
        low: record.low(),
        close: record.close(),
        volume: record.volume(),
    }
}

fn storage_error(error: WarehouseError) -> PipelineError {
    PipelineError::storage_unavailable(format!("warehouse write failed: {error}"))
}
