//! Pipeline configuration built once from a flat map of named values.
//!
//! [`PipelineConfig::from_env`] snapshots the process environment; tests and
//! embedders use [`PipelineConfig::from_map`]. Nothing below the CLI reads the
//! environment directly.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use quotepipe_warehouse::WarehouseConfig;

use crate::retry::{Backoff, RetryPolicy};
use crate::{ConfigError, Symbol};

pub const API_KEY: &str = "ALPHA_VANTAGE_API_KEY";
pub const SYMBOLS: &str = "STOCK_SYMBOLS";
pub const REQUEST_INTERVAL_SEC: &str = "REQUEST_INTERVAL_SEC";
pub const BACKOFF_CEILING_SEC: &str = "BACKOFF_CEILING_SEC";
pub const MAX_FETCH_ATTEMPTS: &str = "MAX_FETCH_ATTEMPTS";
pub const UNREACHABLE_RETRIES: &str = "UNREACHABLE_RETRIES";
pub const UNREACHABLE_DELAY_SEC: &str = "UNREACHABLE_DELAY_SEC";
pub const REQUEST_TIMEOUT_SEC: &str = "REQUEST_TIMEOUT_SEC";
pub const RATE_LIMIT_STATUSES: &str = "RATE_LIMIT_STATUSES";
pub const RATE_LIMIT_KEYS: &str = "RATE_LIMIT_KEYS";
pub const MAX_CONCURRENCY: &str = "MAX_CONCURRENCY";
pub const OUTPUT_SIZE: &str = "OUTPUT_SIZE";
pub const BASE_URL: &str = "ALPHA_VANTAGE_BASE_URL";
pub const DB_PATH: &str = "QUOTEPIPE_DB_PATH";
pub const HOME: &str = "QUOTEPIPE_HOME";
pub const POOL_SIZE: &str = "QUOTEPIPE_POOL_SIZE";

const DEFAULT_SYMBOLS: &str = "IBM";
const DEFAULT_INTERVAL_SECS: f64 = 15.0;
const DEFAULT_TIMEOUT_SECS: f64 = 30.0;
const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";
const DEFAULT_RATE_LIMIT_KEYS: &[&str] = &["Note", "Information"];
const DEFAULT_RATE_LIMIT_STATUSES: &[u16] = &[429];

/// Amount of history requested per symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputSize {
    /// Latest 100 trading days.
    #[default]
    Compact,
    /// Full history.
    Full,
}

impl OutputSize {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Full => "full",
        }
    }
}

impl FromStr for OutputSize {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "full" => Ok(Self::Full),
            other => Err(format!("expected 'compact' or 'full', got '{other}'")),
        }
    }
}

/// Provider responses that mean "slow down".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSignals {
    pub statuses: Vec<u16>,
    pub payload_keys: Vec<String>,
}

impl RateLimitSignals {
    pub fn matches_status(&self, status: u16) -> bool {
        self.statuses.contains(&status)
    }

    /// First configured key present at the top level of `document`.
    pub fn matching_key<'a>(
        &self,
        document: &'a serde_json::Value,
    ) -> Option<(&str, &'a serde_json::Value)> {
        let object = document.as_object()?;
        self.payload_keys
            .iter()
            .find_map(|key| object.get(key).map(|value| (key.as_str(), value)))
    }
}

impl Default for RateLimitSignals {
    fn default() -> Self {
        Self {
            statuses: DEFAULT_RATE_LIMIT_STATUSES.to_vec(),
            payload_keys: DEFAULT_RATE_LIMIT_KEYS.iter().map(|key| key.to_string()).collect(),
        }
    }
}

/// Settings consumed by [`crate::Fetcher`].
#[derive(Clone, PartialEq)]
pub struct FetchConfig {
    pub api_key: String,
    pub base_url: String,
    pub output_size: OutputSize,
    pub request_interval: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitSignals,
}

impl FetchConfig {
    /// Production defaults with the given key.
    pub fn new(api_key: impl Into<String>) -> Self {
        let interval = Duration::from_secs_f64(DEFAULT_INTERVAL_SECS);
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            output_size: OutputSize::default(),
            request_interval: interval,
            request_timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::from_interval(interval, interval * 4),
            rate_limit: RateLimitSignals::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Use `interval` for pacing, keeping the retry policy as configured.
    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitSignals) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

impl Debug for FetchConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchConfig")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .field("output_size", &self.output_size)
            .field("request_interval", &self.request_interval)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

/// Everything one pipeline run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub symbols: Vec<Symbol>,
    pub max_concurrency: usize,
    pub fetch: FetchConfig,
    pub warehouse: WarehouseConfig,
}

impl PipelineConfig {
    /// Snapshot the process environment and build from it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let values = std::env::vars().collect::<HashMap<_, _>>();
        Self::from_map(&values)
    }

    pub fn from_map(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let settings = Settings(values);

        let api_key = settings.get(API_KEY).ok_or(ConfigError::Missing { key: API_KEY })?;
        let symbols = Symbol::parse_list(settings.get(SYMBOLS).unwrap_or(DEFAULT_SYMBOLS))
            .map_err(|source| ConfigError::Symbol { key: SYMBOLS, source })?;
        if symbols.is_empty() {
            return Err(ConfigError::Invalid {
                key: SYMBOLS,
                value: settings.get(SYMBOLS).unwrap_or_default().to_string(),
                reason: String::from("at least one symbol is required"),
            });
        }

        let interval = settings.seconds(REQUEST_INTERVAL_SEC, DEFAULT_INTERVAL_SECS)?;
        let ceiling = settings.seconds(BACKOFF_CEILING_SEC, interval.as_secs_f64() * 4.0)?;
        let max_attempts =
            settings.positive::<u32>(MAX_FETCH_ATTEMPTS, RetryPolicy::DEFAULT_MAX_ATTEMPTS)?;
        let unreachable_retries =
            settings.parsed::<u32>(UNREACHABLE_RETRIES, RetryPolicy::DEFAULT_UNREACHABLE_RETRIES)?;
        let unreachable_delay = settings.seconds(
            UNREACHABLE_DELAY_SEC,
            RetryPolicy::DEFAULT_UNREACHABLE_DELAY.as_secs_f64(),
        )?;

        let retry = RetryPolicy {
            max_attempts,
            rate_limit_backoff: Backoff::doubling(interval, ceiling.max(interval)),
            unreachable_retries,
            unreachable_backoff: Backoff::Fixed {
                delay: unreachable_delay,
            },
        };

        let rate_limit = RateLimitSignals {
            statuses: match settings.get(RATE_LIMIT_STATUSES) {
                Some(raw) => parse_statuses(raw)?,
                None => DEFAULT_RATE_LIMIT_STATUSES.to_vec(),
            },
            payload_keys: match settings.get(RATE_LIMIT_KEYS) {
                Some(raw) => split_list(raw).map(str::to_string).collect(),
                None => RateLimitSignals::default().payload_keys,
            },
        };

        let fetch = FetchConfig {
            api_key: api_key.to_string(),
            base_url: settings
                .get(BASE_URL)
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            output_size: settings.parsed(OUTPUT_SIZE, OutputSize::default())?,
            request_interval: interval,
            request_timeout: settings.seconds(REQUEST_TIMEOUT_SEC, DEFAULT_TIMEOUT_SECS)?,
            retry,
            rate_limit,
        };

        let warehouse = warehouse_config(&settings)?;

        Ok(Self {
            symbols,
            max_concurrency: settings.positive(MAX_CONCURRENCY, 1)?,
            fetch,
            warehouse,
        })
    }
}

/// Storage settings only, for commands that never call the provider.
pub fn warehouse_from_map(values: &HashMap<String, String>) -> Result<WarehouseConfig, ConfigError> {
    warehouse_config(&Settings(values))
}

pub fn warehouse_from_env() -> Result<WarehouseConfig, ConfigError> {
    let values = std::env::vars().collect::<HashMap<_, _>>();
    warehouse_from_map(&values)
}

fn warehouse_config(settings: &Settings<'_>) -> Result<WarehouseConfig, ConfigError> {
    Ok(WarehouseConfig::at(resolve_db_path(settings))
        .with_pool_size(settings.positive(POOL_SIZE, WarehouseConfig::DEFAULT_POOL_SIZE)?))
}

/// Lookup helper that treats blank values as unset.
struct Settings<'a>(&'a HashMap<String, String>);

impl Settings<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse::<T>().map_err(|error| ConfigError::Invalid {
                key,
                value: raw.to_string(),
                reason: error.to_string(),
            }),
        }
    }

    fn positive<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default,
        T::Err: std::fmt::Display,
    {
        let value = self.parsed(key, default)?;
        if value <= T::default() {
            return Err(ConfigError::Invalid {
                key,
                value: self.get(key).unwrap_or_default().to_string(),
                reason: String::from("must be greater than zero"),
            });
        }
        Ok(value)
    }

    fn seconds(&self, key: &'static str, default: f64) -> Result<Duration, ConfigError> {
        let seconds = self.parsed::<f64>(key, default)?;
        Duration::try_from_secs_f64(seconds).map_err(|error| ConfigError::Invalid {
            key,
            value: self.get(key).unwrap_or_default().to_string(),
            reason: error.to_string(),
        })
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|part| !part.is_empty())
}

fn parse_statuses(raw: &str) -> Result<Vec<u16>, ConfigError> {
    split_list(raw)
        .map(|part| {
            part.parse::<u16>()
                .ok()
                .filter(|status| (100..=599).contains(status))
                .ok_or_else(|| ConfigError::Invalid {
                    key: RATE_LIMIT_STATUSES,
                    value: raw.to_string(),
                    reason: format!("'{part}' is not an HTTP status code"),
                })
        })
        .collect()
}

fn resolve_db_path(settings: &Settings<'_>) -> PathBuf {
    if let Some(path) = settings.get(DB_PATH) {
        return PathBuf::from(path);
    }
    let home = settings
        .get(HOME)
        .map(PathBuf::from)
        .or_else(|| settings.get("HOME").map(|home| PathBuf::from(home).join(".quotepipe")))
        .unwrap_or_else(|| PathBuf::from(".quotepipe"));
    home.join("warehouse.duckdb")
}
