//! Turns a raw Alpha Vantage daily payload into validated price records.
//!
//! Only structural problems fail the whole payload with `MalformedResponse`:
//! no series, a series or day entry that is not an object, or a non-empty
//! series with no usable day. A single bad day (date key, missing or
//! non-numeric field, invalid volume, OHLC range violation) is dropped and
//! counted instead.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::{parse_date, volume_from_f64};
use crate::{PipelineError, PriceRecord, RawQuote, Symbol, ValidationError};

const DAILY_SERIES_KEY: &str = "Time Series (Daily)";
const SERIES_KEY_PREFIX: &str = "Time Series";

/// One day as the provider spells it.
#[derive(Debug, Deserialize)]
struct DailyBarPayload {
    #[serde(rename = "1. open")]
    open: Option<Value>,
    #[serde(rename = "2. high")]
    high: Option<Value>,
    #[serde(rename = "3. low")]
    low: Option<Value>,
    #[serde(rename = "4. close")]
    close: Option<Value>,
    #[serde(rename = "5. volume")]
    volume: Option<Value>,
}

/// A day that was dropped instead of written.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// Series key as received.
    pub date: String,
    pub reason: ValidationError,
}

/// Normalizer output: records in ascending date order plus dropped days.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Normalized {
    pub records: Vec<PriceRecord>,
    pub rejected: Vec<Rejection>,
}

impl Normalized {
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }
}

/// Normalize one payload. Pure: no I/O and no shared state.
pub fn normalize(raw: &RawQuote) -> Result<Normalized, PipelineError> {
    let series = series_object(&raw.document)?;

    let mut normalized = Normalized {
        records: Vec::with_capacity(series.len()),
        rejected: Vec::new(),
    };
    for (date_key, entry) in series {
        if !entry.is_object() {
            return Err(PipelineError::malformed(format!(
                "{}: entry {date_key} is not an object",
                raw.symbol
            )));
        }
        let payload = DailyBarPayload::deserialize(entry).map_err(|error| {
            PipelineError::malformed(format!("{}: entry {date_key} is unreadable: {error}", raw.symbol))
        })?;

        match build_record(&raw.symbol, date_key, payload) {
            Ok(record) => normalized.records.push(record),
            Err(reason) => {
                tracing::warn!(
                    symbol = %raw.symbol,
                    date = %date_key,
                    reason = %reason,
                    "dropping daily bar"
                );
                normalized.rejected.push(Rejection {
                    date: date_key.clone(),
                    reason,
                });
            }
        }
    }

    if normalized.records.is_empty() && !normalized.rejected.is_empty() {
        return Err(PipelineError::malformed(format!(
            "{}: none of {} daily bars is usable (first: {} {})",
            raw.symbol,
            normalized.rejected.len(),
            normalized.rejected[0].date,
            normalized.rejected[0].reason
        )));
    }

    normalized.records.sort_by_key(PriceRecord::date);
    normalized.rejected.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(normalized)
}

fn series_object(document: &Value) -> Result<&Map<String, Value>, PipelineError> {
    let object = document
        .as_object()
        .ok_or_else(|| PipelineError::malformed("payload is not a JSON object"))?;

    let series = object.get(DAILY_SERIES_KEY).or_else(|| {
        object
            .iter()
            .find(|(key, _)| key.starts_with(SERIES_KEY_PREFIX))
            .map(|(_, value)| value)
    });

    series
        .ok_or_else(|| PipelineError::malformed("payload has no daily time series"))?
        .as_object()
        .ok_or_else(|| PipelineError::malformed("daily time series is not an object"))
}

fn build_record(
    symbol: &Symbol,
    date_key: &str,
    payload: DailyBarPayload,
) -> Result<PriceRecord, ValidationError> {
    let date = parse_date(date_key).map_err(|_| ValidationError::InvalidDate {
        value: date_key.to_string(),
    })?;
    let open = number("open", payload.open)?;
    let high = number("high", payload.high)?;
    let low = number("low", payload.low)?;
    let close = number("close", payload.close)?;
    let volume = volume_from_f64(number("volume", payload.volume)?)?;

    PriceRecord::new(symbol.clone(), date, open, high, low, close, volume)
}

fn number(field: &'static str, value: Option<Value>) -> Result<f64, ValidationError> {
    match value {
        None | Some(Value::Null) => Err(ValidationError::MissingField { field }),
        Some(Value::String(text)) => {
            text.trim()
                .parse::<f64>()
                .map_err(|_| ValidationError::NonNumericField { field, value: text })
        }
        Some(Value::Number(number)) => {
            number
                .as_f64()
                .ok_or_else(|| ValidationError::NonNumericField {
                    field,
                    value: number.to_string(),
                })
        }
        Some(other) => Err(ValidationError::NonNumericField {
            field,
            value: other.to_string(),
        }),
    }
}
