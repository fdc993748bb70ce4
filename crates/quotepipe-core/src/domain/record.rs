use serde_json::Value;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::Date;

use crate::{Symbol, ValidationError};

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Parse an ISO `YYYY-MM-DD` calendar date.
pub fn parse_date(input: &str) -> Result<Date, time::error::Parse> {
    Date::parse(input, DATE_FORMAT)
}

/// Format a date as ISO `YYYY-MM-DD`.
pub fn format_date(date: Date) -> String {
    date.format(DATE_FORMAT).unwrap_or_else(|_| date.to_string())
}

/// Provider payload for one symbol, exactly as received.
#[derive(Debug, Clone, PartialEq)]
pub struct RawQuote {
    pub symbol: Symbol,
    pub document: Value,
}

impl RawQuote {
    pub fn new(symbol: Symbol, document: Value) -> Self {
        Self {
            symbol,
            document,
        }
    }
}

/// One validated trading day for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRecord {
    symbol: Symbol,
    date: Date,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

impl PriceRecord {
    /// Build a record, enforcing `low <= min(open, close)`,
    /// `max(open, close) <= high` and finite non-negative prices.
    pub fn new(
        symbol: Symbol,
        date: Date,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Result<Self, ValidationError> {
        for (field, value) in [("open", open), ("high", high), ("low", low), ("close", close)] {
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteValue { field });
            }
            if value < 0.0 {
                return Err(ValidationError::NegativeValue { field });
            }
        }

        if high < low {
            return Err(ValidationError::InvalidPriceRange);
        }
        if open < low || open > high || close < low || close > high {
            return Err(ValidationError::InvalidPriceBounds);
        }

        Ok(Self {
            symbol,
            date,
            open,
            high,
            low,
            close,
            volume,
        })
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub const fn date(&self) -> Date {
        self.date
    }

    pub const fn open(&self) -> f64 {
        self.open
    }

    pub const fn high(&self) -> f64 {
        self.high
    }

    pub const fn low(&self) -> f64 {
        self.low
    }

    pub const fn close(&self) -> f64 {
        self.close
    }

    pub const fn volume(&self) -> u64 {
        self.volume
    }
}

/// Convert a provider volume figure to a whole share count.
///
/// Providers sometimes send `"1000.0"`; whole floats are accepted,
/// negative or fractional values are not.
pub fn volume_from_f64(value: f64) -> Result<u64, ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field: "volume" });
    }
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field: "volume" });
    }
    if value.fract() != 0.0 || value >= u64::MAX as f64 {
        return Err(ValidationError::FractionalVolume {
            value: value.to_string(),
        });
    }
    Ok(value as u64)
}
