//! CLI argument definitions for quotepipe.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Fetch, validate and store every configured symbol once |
//! | `migrate` | Create or upgrade the warehouse schema |
//! | `show` | Print stored rows for one symbol |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--log-level` | `info` | Log filter when `QUOTEPIPE_LOG` is unset |
//! | `--log-format` | `text` | `text` or `json` log lines on stderr |
//! | `--db-path` | from config | Warehouse file override |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! # Daily run for the configured symbols
//! ALPHA_VANTAGE_API_KEY=... quotepipe run
//!
//! # One-off run for two symbols, failing the job on any error
//! quotepipe run --symbols AAPL,MSFT --strict
//!
//! # Inspect what was stored
//! quotepipe show AAPL --limit 5 --pretty
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Daily stock-quote ingestion into a local DuckDB warehouse.
#[derive(Debug, Parser)]
#[command(
    name = "quotepipe",
    author,
    version,
    about = "Daily stock-quote ingestion into DuckDB",
    long_about = "quotepipe fetches daily OHLCV series from Alpha Vantage, validates them and \
upserts them into a local DuckDB warehouse.\n\
\n\
Provider and pipeline settings are read from environment variables \
(ALPHA_VANTAGE_API_KEY, STOCK_SYMBOLS, REQUEST_INTERVAL_SEC, ...)."
)]
pub struct Cli {
    /// Log filter used when QUOTEPIPE_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log line format written to stderr.
    #[arg(
        long,
        global = true,
        env = "QUOTEPIPE_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text
    )]
    pub log_format: LogFormat,

    /// Warehouse database file, overriding QUOTEPIPE_DB_PATH.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the pipeline once and print the run report.
    Run(RunArgs),
    /// Apply pending warehouse migrations.
    Migrate,
    /// Print stored rows for a symbol, newest first.
    Show(ShowArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Comma-separated symbols, overriding STOCK_SYMBOLS.
    #[arg(long)]
    pub symbols: Option<String>,

    /// Symbols processed at once, overriding MAX_CONCURRENCY.
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub concurrency: Option<u16>,

    /// Exit with code 5 when any symbol fails.
    #[arg(long, default_value_t = false)]
    pub strict: bool,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Ticker symbol to display.
    pub symbol: String,

    /// Maximum rows to print.
    #[arg(long, default_value_t = 30)]
    pub limit: usize,
}
