//! # Quotepipe Core
//!
//! Daily stock-quote ingestion: fetch each symbol's daily OHLCV series from
//! Alpha Vantage, validate it, and upsert it into the DuckDB warehouse.
//!
//! ## Overview
//!
//! - **Fetcher** issues one paced HTTP request per attempt and retries
//!   rate-limit and transport failures with bounded backoff
//! - **Normalizer** turns the raw payload into ordered, validated records
//! - **Writer** upserts records through the [`PriceSink`] seam
//! - **Runner** drives every symbol independently and aggregates a [`RunReport`]
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | `PipelineConfig` built from a flat map of named values |
//! | [`domain`] | Symbol, raw payload and price record types |
//! | [`error`] | Error taxonomy and validation errors |
//! | [`fetcher`] | Alpha Vantage daily series fetcher |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`normalizer`] | Payload to record conversion |
//! | [`retry`] | Backoff schedule and retry budgets |
//! | [`runner`] | Per-symbol orchestration and reporting |
//! | [`throttling`] | Request pacing |
//! | [`writer`] | Storage seam |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use quotepipe_core::{PipelineConfig, ReqwestHttpClient, Runner, Warehouse};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::from_env()?;
//!     let warehouse = Warehouse::open(config.warehouse.clone())?;
//!
//!     let runner = Runner::from_config(
//!         &config,
//!         Arc::new(ReqwestHttpClient::new()),
//!         Arc::new(warehouse),
//!     );
//!     let report = runner.run(&config.symbols).await;
//!
//!     for outcome in report.failed() {
//!         eprintln!("{} failed: {:?}", outcome.symbol(), outcome.error());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Failures are reported per symbol and carry an [`ErrorKind`]:
//!
//! ```rust
//! use quotepipe_core::{ErrorKind, FetchOutcome};
//!
//! fn should_alert(outcome: &FetchOutcome) -> bool {
//!     match outcome.error_kind() {
//!         Some(ErrorKind::RateLimited) => false,
//!         Some(_) => true,
//!         None => false,
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - The API key is only placed in the request query string; logged URLs
//!   and `Debug` output redact it
//! - Symbols are validated before they reach a request or a SQL parameter

pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod http_client;
pub mod normalizer;
pub mod retry;
pub mod runner;
pub mod throttling;
pub mod writer;

// Configuration
pub use config::{
    warehouse_from_env, warehouse_from_map, FetchConfig, OutputSize, PipelineConfig,
    RateLimitSignals,
};

// Domain models
pub use domain::{PriceRecord, RawQuote, Symbol};

// Error types
pub use error::{ConfigError, ErrorKind, PipelineError, ValidationError};

// Pipeline stages
pub use fetcher::{Fetcher, SOURCE_ALPHAVANTAGE};
pub use normalizer::{normalize, Normalized, Rejection};
pub use runner::{FetchOutcome, InvalidTransition, RunReport, RunStatus, Runner, SymbolState};
pub use writer::PriceSink;

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient, ScriptedHttpClient,
};

// Retry and pacing
pub use retry::{Backoff, RetryPolicy, RetryState};
pub use throttling::RequestPacer;

// Warehouse (re-exported from quotepipe-warehouse)
pub use quotepipe_warehouse::{StoredPrice, Warehouse, WarehouseConfig, WarehouseError};
