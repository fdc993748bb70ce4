//! Behavior-driven tests for provider retries and pacing
//!
//! These tests verify HOW the fetcher reacts to throttling and outages:
//! how long it waits, how often it retries, and when it gives up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use quotepipe_core::{
    Backoff, ErrorKind, FetchConfig, Fetcher, HttpError, HttpResponse, PipelineError, PriceRecord,
    PriceSink, RateLimitSignals, RetryPolicy, RetryState, Runner, ScriptedHttpClient, Symbol,
};

const DAILY: &str = r#"{
    "Meta Data": {"2. Symbol": "IBM"},
    "Time Series (Daily)": {
        "2024-01-02": {"1. open": "160.0", "2. high": "162.0", "3. low": "159.0", "4. close": "161.0", "5. volume": "1000"}
    }
}"#;

const NOTE: &str = r#"{"Note": "Our standard API call frequency is 5 calls per minute."}"#;

fn ibm() -> Symbol {
    Symbol::parse("IBM").expect("valid symbol")
}

fn config_with(retry: RetryPolicy) -> FetchConfig {
    FetchConfig::new("test-key")
        .with_base_url("https://av.test")
        .with_request_interval(Duration::ZERO)
        .with_retry(retry)
}

fn rate_limit_policy(max_attempts: u32, base_ms: u64, ceiling_ms: u64) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        rate_limit_backoff: Backoff::doubling(
            Duration::from_millis(base_ms),
            Duration::from_millis(ceiling_ms),
        ),
        unreachable_retries: 1,
        unreachable_backoff: Backoff::Fixed {
            delay: Duration::from_millis(1),
        },
    }
}

/// Discards everything; the fetch stage is what these tests observe.
struct NullSink;

impl PriceSink for NullSink {
    fn upsert(&self, _source: &str, records: &[PriceRecord]) -> Result<usize, PipelineError> {
        Ok(records.len())
    }
}

// =============================================================================
// Fetcher: Rate Limit Backoff
// =============================================================================

#[test]
fn when_rate_limits_repeat_waits_grow_but_never_pass_the_ceiling() {
    // Given: The production schedule (15s base, 60s ceiling, 5 attempts)
    let policy = RetryPolicy::from_interval(Duration::from_secs(15), Duration::from_secs(60));
    let mut state = RetryState::default();

    // When: Every attempt is rate limited
    let mut waits = Vec::new();
    while let Some(delay) = state.next_delay(&policy, ErrorKind::RateLimited) {
        waits.push(delay.as_secs());
    }

    // Then: Waits double, cap at the ceiling and stop after the budget
    assert_eq!(waits, vec![15, 30, 60, 60]);
}

#[tokio::test]
async fn when_provider_keeps_throttling_fetch_gives_up_after_budget() {
    // Given: A provider that always returns the rate-limit note
    let client = Arc::new(ScriptedHttpClient::new().respond("IBM", HttpResponse::ok_json(NOTE)));
    let fetcher = Fetcher::new(config_with(rate_limit_policy(4, 10, 20)), client.clone());

    // When: The symbol is fetched
    let started = Instant::now();
    let error = fetcher.fetch(&ibm()).await.expect_err("should exhaust retries");
    let elapsed = started.elapsed();

    // Then: Exactly four attempts were made, separated by 10 + 20 + 20 ms
    assert_eq!(error.kind(), ErrorKind::RateLimited);
    assert_eq!(client.request_count("IBM"), 4);
    assert!(elapsed >= Duration::from_millis(50), "waited only {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "waited {elapsed:?}");
}

#[tokio::test]
async fn when_throttling_clears_fetch_returns_the_series() {
    // Given: Two throttled responses followed by data
    let client = Arc::new(
        ScriptedHttpClient::new()
            .respond("IBM", HttpResponse::new(429, "Too Many Requests"))
            .respond("IBM", HttpResponse::ok_json(NOTE))
            .respond("IBM", HttpResponse::ok_json(DAILY)),
    );
    let fetcher = Fetcher::new(config_with(rate_limit_policy(5, 1, 2)), client.clone());

    // When: The symbol is fetched
    let raw = fetcher.fetch(&ibm()).await.expect("third attempt succeeds");

    // Then: The payload from the successful attempt is returned
    assert_eq!(client.request_count("IBM"), 3);
    assert!(raw.document.get("Time Series (Daily)").is_some());
}

#[tokio::test]
async fn when_rate_limit_signals_are_customized_they_are_honored() {
    // Given: A deployment that treats 503 and a "Throttle" key as rate limits
    let signals = RateLimitSignals {
        statuses: vec![503],
        payload_keys: vec!["Throttle".to_string()],
    };
    let client = Arc::new(
        ScriptedHttpClient::new()
            .respond("IBM", HttpResponse::new(503, "busy"))
            .respond("IBM", HttpResponse::ok_json(r#"{"Throttle": "wait"}"#)),
    );
    let config = config_with(rate_limit_policy(3, 1, 2)).with_rate_limit(signals);
    let fetcher = Fetcher::new(config, client.clone());

    // When: The symbol is fetched
    let error = fetcher.fetch(&ibm()).await.expect_err("still throttled");

    // Then: Both signals counted against the rate-limit budget
    assert_eq!(error.kind(), ErrorKind::RateLimited);
    assert_eq!(client.request_count("IBM"), 3);
}

// =============================================================================
// Fetcher: Outages and Permanent Errors
// =============================================================================

#[tokio::test]
async fn when_provider_is_unreachable_fetch_retries_once_then_fails() {
    // Given: Connection failures on every attempt
    let client = Arc::new(
        ScriptedHttpClient::new().fail("IBM", HttpError::new("connection failed: refused")),
    );
    let fetcher = Fetcher::new(config_with(rate_limit_policy(5, 1, 2)), client.clone());

    // When: The symbol is fetched
    let error = fetcher.fetch(&ibm()).await.expect_err("unreachable");

    // Then: One retry, then Unreachable
    assert_eq!(error.kind(), ErrorKind::Unreachable);
    assert_eq!(client.request_count("IBM"), 2);
}

#[tokio::test]
async fn when_outage_is_brief_the_retry_recovers() {
    // Given: A timeout followed by data
    let client = Arc::new(
        ScriptedHttpClient::new()
            .fail("IBM", HttpError::timeout("request timeout"))
            .respond("IBM", HttpResponse::ok_json(DAILY)),
    );
    let fetcher = Fetcher::new(config_with(rate_limit_policy(5, 1, 2)), client.clone());

    // When/Then: The second attempt succeeds
    assert!(fetcher.fetch(&ibm()).await.is_ok());
    assert_eq!(client.request_count("IBM"), 2);
}

#[tokio::test]
async fn when_retries_are_disabled_nothing_is_retried() {
    // Given: A throttled provider and a no-retry policy
    let client = Arc::new(ScriptedHttpClient::new().respond("IBM", HttpResponse::new(429, "")));
    let fetcher = Fetcher::new(config_with(RetryPolicy::no_retry()), client.clone());

    // When/Then: The first failure is final
    let error = fetcher.fetch(&ibm()).await.expect_err("no retry");
    assert_eq!(error.kind(), ErrorKind::RateLimited);
    assert_eq!(client.request_count("IBM"), 1);
}

// =============================================================================
// Fetcher: Pacing and Secrets
// =============================================================================

#[tokio::test]
async fn when_workers_run_in_parallel_requests_stay_paced() {
    // Given: Three symbols, three workers and a 30ms request interval
    let client = Arc::new(ScriptedHttpClient::new().with_fallback(HttpResponse::ok_json(DAILY)));
    let config = config_with(rate_limit_policy(5, 1, 2))
        .with_request_interval(Duration::from_millis(30));
    let runner = Runner::new(Fetcher::new(config, client.clone()), Arc::new(NullSink))
        .with_max_concurrency(3);
    let symbols = ["IBM", "AAPL", "MSFT"]
        .iter()
        .map(|name| Symbol::parse(name).expect("symbol"))
        .collect::<Vec<_>>();

    // When: The run completes
    let started = Instant::now();
    let report = runner.run(&symbols).await;

    // Then: The shared pacer kept at least two intervals between three requests
    assert!(report.all_succeeded());
    assert_eq!(client.requests().len(), 3);
    assert!(started.elapsed() >= Duration::from_millis(55));
}

#[tokio::test]
async fn when_requests_are_logged_the_api_key_is_redacted() {
    // Given: A fetcher configured with a secret key
    let client = Arc::new(ScriptedHttpClient::new().respond("IBM", HttpResponse::ok_json(DAILY)));
    let config = config_with(RetryPolicy::no_retry());
    let fetcher = Fetcher::new(
        FetchConfig {
            api_key: "very-secret".to_string(),
            ..config
        },
        client.clone(),
    );

    // When: A request is made
    fetcher.fetch(&ibm()).await.expect("fetch");

    // Then: The wire request carries the key, its loggable form does not
    let request = &client.requests()[0];
    assert_eq!(request.query_value("apikey"), Some("very-secret"));
    assert!(!request.redacted_url().contains("very-secret"));
    assert!(!format!("{fetcher:?}").contains("very-secret"));
}
