//! Drives every configured symbol through fetch, normalize and write.
//!
//! Symbols are independent: each one runs as its own task and ends in a
//! [`FetchOutcome`], so one failing symbol never stops the others. Outcomes
//! are reported in the order the symbols were given.

use std::sync::Arc;

use serde::{Serialize, Serializer};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::http_client::HttpClient;
use crate::normalizer::normalize;
use crate::writer::PriceSink;
use crate::{ErrorKind, Fetcher, PipelineError, Symbol};

/// Per-symbol progress through one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolState {
    Pending,
    Fetching,
    FetchFailed,
    Fetched,
    Normalizing,
    NormalizeFailed,
    Normalized,
    Writing,
    WriteFailed,
    Written,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid symbol state transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: SymbolState,
    pub to: SymbolState,
}

impl SymbolState {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::FetchFailed | Self::NormalizeFailed | Self::WriteFailed | Self::Written
        )
    }

    /// Move to `next`, rejecting anything outside the linear pipeline.
    pub fn advance(self, next: Self) -> Result<Self, InvalidTransition> {
        let allowed = matches!(
            (self, next),
            (Self::Pending, Self::Fetching)
                | (Self::Fetching, Self::FetchFailed | Self::Fetched)
                | (Self::Fetched, Self::Normalizing)
                | (Self::Normalizing, Self::NormalizeFailed | Self::Normalized)
                | (Self::Normalized, Self::Writing)
                | (Self::Writing, Self::WriteFailed | Self::Written)
        );
        if allowed {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

/// Result of one symbol's pass through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    Success {
        symbol: Symbol,
        records_written: usize,
        records_rejected: usize,
    },
    Failure {
        symbol: Symbol,
        state: SymbolState,
        error: PipelineError,
    },
}

impl FetchOutcome {
    pub fn symbol(&self) -> &Symbol {
        match self {
            Self::Success { symbol, .. } | Self::Failure { symbol, .. } => symbol,
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub const fn state(&self) -> SymbolState {
        match self {
            Self::Success { .. } => SymbolState::Written,
            Self::Failure { state, .. } => *state,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(PipelineError::kind)
    }
}

/// Overall verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

/// Aggregate returned by [`Runner::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    #[serde(serialize_with = "rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(serialize_with = "rfc3339")]
    pub finished_at: OffsetDateTime,
    pub status: RunStatus,
    pub outcomes: Vec<FetchOutcome>,
}

impl RunReport {
    fn new(run_id: Uuid, started_at: OffsetDateTime, outcomes: Vec<FetchOutcome>) -> Self {
        let failed = outcomes.iter().filter(|outcome| !outcome.is_success()).count();
        let status = if failed == 0 {
            RunStatus::Success
        } else if failed == outcomes.len() {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        };

        Self {
            run_id,
            started_at,
            finished_at: OffsetDateTime::now_utc(),
            status,
            outcomes,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &FetchOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &FetchOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_success())
    }

    pub fn outcome_for(&self, symbol: &str) -> Option<&FetchOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.symbol().as_str() == symbol)
    }

    pub fn records_written(&self) -> usize {
        self.outcomes
            .iter()
            .map(|outcome| match outcome {
                FetchOutcome::Success {
                    records_written, ..
                } => *records_written,
                FetchOutcome::Failure { .. } => 0,
            })
            .sum()
    }
}

fn rfc3339<S: Serializer>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    let formatted = value.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&formatted)
}

/// Runs the fetch, normalize and write stages for a set of symbols.
#[derive(Clone)]
pub struct Runner {
    fetcher: Fetcher,
    sink: Arc<dyn PriceSink>,
    max_concurrency: usize,
}

impl Runner {
    pub fn new(fetcher: Fetcher, sink: Arc<dyn PriceSink>) -> Self {
        Self {
            fetcher,
            sink,
            max_concurrency: 1,
        }
    }

    pub fn from_config(
        config: &PipelineConfig,
        http_client: Arc<dyn HttpClient>,
        sink: Arc<dyn PriceSink>,
    ) -> Self {
        Self::new(Fetcher::new(config.fetch.clone(), http_client), sink)
            .with_max_concurrency(config.max_concurrency)
    }

    /// Bound on symbols in flight at once; values below one are raised to one.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Process every symbol once and report each outcome.
    ///
    /// Dropping the returned future aborts symbols still in flight; rows
    /// already committed stay valid because each symbol writes in its own
    /// transaction.
    pub async fn run(&self, symbols: &[Symbol]) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = OffsetDateTime::now_utc();
        let span = tracing::info_span!(
            "pipeline.run",
            run_id = %run_id,
            symbols = symbols.len(),
            max_concurrency = self.max_concurrency
        );

        async move {
            tracing::info!("pipeline run started");
            let outcomes = self.run_all(symbols).await;
            let report = RunReport::new(run_id, started_at, outcomes);
            tracing::info!(
                status = ?report.status,
                succeeded = report.succeeded().count(),
                failed = report.failed().count(),
                records_written = report.records_written(),
                "pipeline run finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn run_all(&self, symbols: &[Symbol]) -> Vec<FetchOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for (index, symbol) in symbols.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let fetcher = self.fetcher.clone();
            let sink = Arc::clone(&self.sink);
            let span = tracing::info_span!("pipeline.symbol", symbol = %symbol);

            tasks.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    (index, process_symbol(&fetcher, sink, symbol).await)
                }
                .instrument(span),
            );
        }

        let mut slots: Vec<Option<FetchOutcome>> = vec![None; symbols.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
                Err(error) => tracing::error!(error = %error, "symbol task was cancelled"),
            }
        }

        settle_slots(symbols, slots)
    }
}

/// One outcome per input symbol, in input order. A slot left empty by a
/// cancelled task becomes a retryable failure.
fn settle_slots(symbols: &[Symbol], slots: Vec<Option<FetchOutcome>>) -> Vec<FetchOutcome> {
    symbols
        .iter()
        .zip(slots)
        .map(|(symbol, slot)| {
            slot.unwrap_or_else(|| FetchOutcome::Failure {
                symbol: symbol.clone(),
                state: SymbolState::FetchFailed,
                error: PipelineError::unreachable(format!(
                    "{symbol}: task was cancelled before it finished"
                )),
            })
        })
        .collect()
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("fetcher", &self.fetcher)
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

/// Tracks one symbol's state and logs every transition.
struct Progress {
    symbol: Symbol,
    state: SymbolState,
}

impl Progress {
    fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            state: SymbolState::Pending,
        }
    }

    fn enter(&mut self, next: SymbolState) {
        match self.state.advance(next) {
            Ok(state) => {
                tracing::debug!(from = ?self.state, to = ?state, "symbol state changed");
                self.state = state;
            }
            Err(error) => {
                tracing::error!(error = %error, "ignoring invalid symbol state transition");
            }
        }
    }

    fn fail(mut self, state: SymbolState, error: PipelineError) -> FetchOutcome {
        self.enter(state);
        tracing::warn!(
            state = ?self.state,
            code = error.code(),
            error = error.message(),
            "symbol failed"
        );
        FetchOutcome::Failure {
            symbol: self.symbol,
            state: self.state,
            error,
        }
    }
}

async fn process_symbol(fetcher: &Fetcher, sink: Arc<dyn PriceSink>, symbol: Symbol) -> FetchOutcome {
    let mut progress = Progress::new(symbol.clone());

    progress.enter(SymbolState::Fetching);
    let raw = match fetcher.fetch(&symbol).await {
        Ok(raw) => raw,
        Err(error) => return progress.fail(SymbolState::FetchFailed, error),
    };
    progress.enter(SymbolState::Fetched);

    progress.enter(SymbolState::Normalizing);
    let normalized = match normalize(&raw) {
        Ok(normalized) => normalized,
        Err(error) => return progress.fail(SymbolState::NormalizeFailed, error),
    };
    progress.enter(SymbolState::Normalized);

    progress.enter(SymbolState::Writing);
    let records_rejected = normalized.rejected_count();
    let records = normalized.records;
    let source = fetcher.source();
    let written = tokio::task::spawn_blocking(move || sink.upsert(source, &records)).await;
    let records_written = match written {
        Ok(Ok(count)) => count,
        Ok(Err(error)) => return progress.fail(SymbolState::WriteFailed, error),
        Err(error) => {
            return progress.fail(
                SymbolState::WriteFailed,
                PipelineError::storage_unavailable(format!("writer task failed: {error}")),
            )
        }
    };
    progress.enter(SymbolState::Written);

    tracing::info!(records_written, records_rejected, "symbol written");
    FetchOutcome::Success {
        symbol,
        records_written,
        records_rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        let path = [
            SymbolState::Fetching,
            SymbolState::Fetched,
            SymbolState::Normalizing,
            SymbolState::Normalized,
            SymbolState::Writing,
            SymbolState::Written,
        ];

        let mut state = SymbolState::Pending;
        for next in path {
            assert!(!state.is_terminal());
            state = state.advance(next).expect("transition should be allowed");
        }
        assert!(state.is_terminal());
    }

    #[test]
    fn failures_are_terminal_and_skipping_is_rejected() {
        assert_eq!(
            SymbolState::Fetching.advance(SymbolState::FetchFailed),
            Ok(SymbolState::FetchFailed)
        );
        assert!(SymbolState::FetchFailed.is_terminal());
        assert_eq!(
            SymbolState::FetchFailed.advance(SymbolState::Normalizing),
            Err(InvalidTransition {
                from: SymbolState::FetchFailed,
                to: SymbolState::Normalizing,
            })
        );
        assert!(SymbolState::Pending.advance(SymbolState::Writing).is_err());
        assert!(SymbolState::Written.advance(SymbolState::Fetching).is_err());
    }

    fn success(symbol: &str) -> FetchOutcome {
        FetchOutcome::Success {
            symbol: Symbol::parse(symbol).expect("symbol"),
            records_written: 2,
            records_rejected: 0,
        }
    }

    fn failure(symbol: &str, error: PipelineError) -> FetchOutcome {
        FetchOutcome::Failure {
            symbol: Symbol::parse(symbol).expect("symbol"),
            state: SymbolState::FetchFailed,
            error,
        }
    }

    #[test]
    fn report_status_reflects_outcomes() {
        let now = OffsetDateTime::now_utc();
        let ok = RunReport::new(Uuid::new_v4(), now, vec![success("AAPL")]);
        assert_eq!(ok.status, RunStatus::Success);
        assert!(ok.all_succeeded());
        assert_eq!(ok.records_written(), 2);

        let partial = RunReport::new(
            Uuid::new_v4(),
            now,
            vec![success("AAPL"), failure("MSFT", PipelineError::rate_limited("slow"))],
        );
        assert_eq!(partial.status, RunStatus::Partial);
        assert_eq!(partial.failed().count(), 1);
        assert_eq!(
            partial.outcome_for("MSFT").and_then(FetchOutcome::error_kind),
            Some(ErrorKind::RateLimited)
        );

        let failed = RunReport::new(
            Uuid::new_v4(),
            now,
            vec![failure("MSFT", PipelineError::unreachable("down"))],
        );
        assert_eq!(failed.status, RunStatus::Failed);

        let empty = RunReport::new(Uuid::new_v4(), now, Vec::new());
        assert_eq!(empty.status, RunStatus::Success);
    }

    #[test]
    fn report_serializes_outcomes_with_status_tags() {
        let report = RunReport::new(
            Uuid::new_v4(),
            OffsetDateTime::now_utc(),
            vec![
                success("AAPL"),
                failure("MSFT", PipelineError::rate_limited("slow down")),
            ],
        );

        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["status"], "partial");
        assert_eq!(value["outcomes"][0]["status"], "success");
        assert_eq!(value["outcomes"][0]["symbol"], "AAPL");
        assert_eq!(value["outcomes"][1]["status"], "failure");
        assert_eq!(value["outcomes"][1]["state"], "fetch_failed");
        assert_eq!(value["outcomes"][1]["error"]["kind"], "rate_limited");
        assert!(value["started_at"].as_str().is_some_and(|ts| ts.ends_with('Z')));
    }

    #[test]
    fn cancelled_slots_become_failures_in_input_order() {
        let symbols = ["AAPL", "MSFT", "IBM"]
            .iter()
            .map(|name| Symbol::parse(name).expect("symbol"))
            .collect::<Vec<_>>();
        let slots = vec![Some(success("AAPL")), None, Some(success("IBM"))];

        let outcomes = settle_slots(&symbols, slots);
        let report = RunReport::new(Uuid::new_v4(), OffsetDateTime::now_utc(), outcomes);

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.status, RunStatus::Partial);
        let msft = report.outcome_for("MSFT").expect("MSFT keeps its slot");
        assert!(!msft.is_success());
        assert_eq!(msft.error_kind(), Some(ErrorKind::Unreachable));
        assert_eq!(report.outcomes[2].symbol().as_str(), "IBM");
    }
}
