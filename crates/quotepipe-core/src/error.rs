use std::fmt::{Display, Formatter};

use serde::Serialize;
use thiserror::Error;

/// Validation errors raised while constructing domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter: '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
    #[error("volume must be a whole number, got {value}")]
    FractionalVolume { value: String },
    #[error("'{value}' is not a YYYY-MM-DD date")]
    InvalidDate { value: String },
    #[error("field '{field}' is missing")]
    MissingField { field: &'static str },
    #[error("field '{field}' is not numeric: {value}")]
    NonNumericField { field: &'static str, value: String },

    #[error("high must be >= low")]
    InvalidPriceRange,
    #[error("open/close must be within the low/high range")]
    InvalidPriceBounds,
}

/// Error taxonomy shared by every pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The provider throttled the request and retries were exhausted.
    RateLimited,
    /// The provider could not be reached (transport failure, timeout, 5xx).
    Unreachable,
    /// The provider rejected the symbol.
    InvalidSymbol,
    /// The payload could not be decoded into price records.
    MalformedResponse,
    /// The store could not be reached or the write did not commit.
    StorageUnavailable,
}

impl ErrorKind {
    pub const fn code(self) -> &'static str {
        match self {
            Self::RateLimited => "fetch.rate_limited",
            Self::Unreachable => "fetch.unreachable",
            Self::InvalidSymbol => "fetch.invalid_symbol",
            Self::MalformedResponse => "parse.malformed_response",
            Self::StorageUnavailable => "write.storage_unavailable",
        }
    }

    /// Whether re-triggering the whole run later can plausibly succeed.
    pub const fn retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Unreachable | Self::StorageUnavailable
        )
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Structured per-symbol failure surfaced to the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineError {
    kind: ErrorKind,
    message: String,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unreachable, message)
    }

    pub fn invalid_symbol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidSymbol, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedResponse, message)
    }

    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageUnavailable, message)
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for PipelineError {}

/// Errors raised while building [`crate::PipelineConfig`] from named values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required setting '{key}' is missing")]
    Missing { key: &'static str },

    #[error("setting '{key}' has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("setting '{key}' contains an invalid symbol: {source}")]
    Symbol {
        key: &'static str,
        #[source]
        source: ValidationError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_stable_code() {
        let error = PipelineError::rate_limited("provider asked us to slow down");
        assert_eq!(
            error.to_string(),
            "provider asked us to slow down (fetch.rate_limited)"
        );
    }

    #[test]
    fn only_transient_kinds_are_retryable() {
        assert!(ErrorKind::RateLimited.retryable());
        assert!(ErrorKind::Unreachable.retryable());
        assert!(ErrorKind::StorageUnavailable.retryable());
        assert!(!ErrorKind::InvalidSymbol.retryable());
        assert!(!ErrorKind::MalformedResponse.retryable());
    }

    #[test]
    fn kind_serializes_as_snake_case() {
        let value = serde_json::to_value(ErrorKind::StorageUnavailable).expect("serialize");
        assert_eq!(value, serde_json::json!("storage_unavailable"));
    }
}
