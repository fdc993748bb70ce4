use std::sync::Arc;

use serde_json::Value;

use crate::config::FetchConfig;
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::retry::RetryState;
use crate::throttling::RequestPacer;
use crate::{PipelineError, RawQuote, Symbol};

/// Provider id stored alongside every row this fetcher produces.
pub const SOURCE_ALPHAVANTAGE: &str = "alphavantage";

const DAILY_FUNCTION: &str = "TIME_SERIES_DAILY";
const ERROR_MESSAGE_KEY: &str = "Error Message";

/// Retrieves the daily series for one symbol from Alpha Vantage.
///
/// Requests share one pacer, so concurrent callers still respect the
/// configured interval. Rate-limit and transport failures are retried inside
/// [`Fetcher::fetch`] according to the configured [`crate::RetryPolicy`].
#[derive(Clone)]
pub struct Fetcher {
    config: FetchConfig,
    http_client: Arc<dyn HttpClient>,
    pacer: RequestPacer,
}

impl Fetcher {
    pub fn new(config: FetchConfig, http_client: Arc<dyn HttpClient>) -> Self {
        let pacer = RequestPacer::new(config.request_interval);
        Self {
            config,
            http_client,
            pacer,
        }
    }

    pub const fn source(&self) -> &'static str {
        SOURCE_ALPHAVANTAGE
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch the raw daily series for `symbol`.
    ///
    /// Fails with `RateLimited` once the attempt budget is spent, `Unreachable`
    /// after the transport retries, and immediately with `InvalidSymbol` or
    /// `MalformedResponse`.
    pub async fn fetch(&self, symbol: &Symbol) -> Result<RawQuote, PipelineError> {
        let mut state = RetryState::default();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.pacer.ready().await;

            let error = match self.attempt(symbol).await {
                Ok(raw) => {
                    tracing::debug!(symbol = %symbol, attempt, "fetched daily series");
                    return Ok(raw);
                }
                Err(error) => error,
            };

            match state.next_delay(&self.config.retry, error.kind()) {
                Some(delay) => {
                    tracing::warn!(
                        symbol = %symbol,
                        attempt,
                        code = error.code(),
                        delay_ms = delay.as_millis() as u64,
                        "retrying provider request"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::warn!(
                        symbol = %symbol,
                        attempt,
                        code = error.code(),
                        error = error.message(),
                        "giving up on provider request"
                    );
                    return Err(error);
                }
            }
        }
    }

    fn request_for(&self, symbol: &Symbol) -> HttpRequest {
        HttpRequest::get(format!("{}/query", self.config.base_url.trim_end_matches('/')))
            .with_query("function", DAILY_FUNCTION)
            .with_query("symbol", symbol.as_str())
            .with_query("outputsize", self.config.output_size.as_str())
            .with_query("apikey", self.config.api_key.as_str())
            .with_timeout(self.config.request_timeout)
    }

    async fn attempt(&self, symbol: &Symbol) -> Result<RawQuote, PipelineError> {
        let request = self.request_for(symbol);
        tracing::debug!(url = %request.redacted_url(), "sending provider request");

        let response = self.http_client.execute(request).await.map_err(|error| {
            if error.timed_out() {
                PipelineError::unreachable(format!(
                    "alphavantage request timed out after {:?}",
                    self.config.request_timeout
                ))
            } else {
                PipelineError::unreachable(format!("alphavantage transport error: {}", error.message()))
            }
        })?;

        self.classify(symbol, response)
    }

    fn classify(&self, symbol: &Symbol, response: HttpResponse) -> Result<RawQuote, PipelineError> {
        if self.config.rate_limit.matches_status(response.status) {
            return Err(PipelineError::rate_limited(format!(
                "alphavantage returned status {} for {symbol}",
                response.status
            )));
        }
        if response.is_server_error() {
            return Err(PipelineError::unreachable(format!(
                "alphavantage upstream returned status {}",
                response.status
            )));
        }
        if !response.is_success() {
            return Err(PipelineError::malformed(format!(
                "alphavantage returned unexpected status {}",
                response.status
            )));
        }

        let document = serde_json::from_str::<Value>(&response.body).map_err(|error| {
            PipelineError::malformed(format!("alphavantage body is not JSON: {error}"))
        })?;
        if !document.is_object() {
            return Err(PipelineError::malformed(
                "alphavantage payload is not a JSON object",
            ));
        }

        if let Some(message) = document.get(ERROR_MESSAGE_KEY) {
            return Err(PipelineError::invalid_symbol(format!(
                "alphavantage rejected {symbol}: {}",
                describe(message)
            )));
        }

        if let Some((key, note)) = self.config.rate_limit.matching_key(&document) {
            return Err(PipelineError::rate_limited(format!(
                "alphavantage {key}: {}",
                describe(note)
            )));
        }

        Ok(RawQuote::new(symbol.clone(), document))
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("config", &self.config)
            .field("pacer", &self.pacer)
            .finish_non_exhaustive()
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
