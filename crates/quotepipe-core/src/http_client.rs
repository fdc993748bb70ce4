use std::collections::{HashMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Query parameter names whose values never appear in logs.
const REDACTED_PARAMS: &[&str] = &["apikey"];

/// GET request envelope used by the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Value of the first query parameter called `name`.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Full URL with percent-encoded query string.
    pub fn full_url(&self) -> String {
        self.render(false)
    }

    /// Full URL with credentials replaced, safe to log.
    pub fn redacted_url(&self) -> String {
        self.render(true)
    }

    fn render(&self, redact: bool) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }

        let query = self
            .query
            .iter()
            .map(|(name, value)| {
                let value = if redact && REDACTED_PARAMS.contains(&name.as_str()) {
                    "***".into()
                } else {
                    urlencoding::encode(value)
                };
                format!("{}={value}", urlencoding::encode(name))
            })
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.url)
    }
}

/// HTTP response envelope returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    pub const fn is_server_error(&self) -> bool {
        self.status >= 500 && self.status < 600
    }
}

/// Transport-level failure: nothing usable came back from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    message: String,
    timed_out: bool,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn timed_out(&self) -> bool {
        self.timed_out
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

/// Transport contract the fetcher is written against.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;
}

/// Production HTTP client backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(concat!("quotepipe/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&request.url)
                .query(&request.query)
                .timeout(request.timeout)
                .send()
                .await
                .map_err(|e| {
                    // reqwest embeds the URL in its errors; drop it so the key stays out of logs.
                    let e = e.without_url();
                    if e.is_timeout() {
                        HttpError::timeout(format!("request timeout: {e}"))
                    } else if e.is_connect() {
                        HttpError::new(format!("connection failed: {e}"))
                    } else {
                        HttpError::new(format!("request failed: {e}"))
                    }
                })?;

            let status = response.status().as_u16();
            let body = response.text().await.map_err(|e| {
                HttpError::new(format!("failed to read response body: {}", e.without_url()))
            })?;

            Ok(HttpResponse { status, body })
        })
    }
}

type Scripted = Result<HttpResponse, HttpError>;

/// Offline transport that replays canned responses keyed by the `symbol`
/// query parameter.
///
/// Each symbol owns a queue; the last queued entry repeats once the others
/// are consumed. Symbols with no queue get the fallback response. Every
/// request is recorded for later inspection.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    fallback: Option<Scripted>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, symbol: &str, response: HttpResponse) -> Self {
        self.push(symbol, Ok(response))
    }

    pub fn fail(self, symbol: &str, error: HttpError) -> Self {
        self.push(symbol, Err(error))
    }

    pub fn with_fallback(mut self, response: HttpResponse) -> Self {
        self.fallback = Some(Ok(response));
        self
    }

    fn push(self, symbol: &str, entry: Scripted) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(symbol.to_ascii_uppercase())
            .or_default()
            .push_back(entry);
        self
    }

    /// Requests seen so far, in arrival order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests issued for `symbol`.
    pub fn request_count(&self, symbol: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.query_value("symbol") == Some(symbol))
            .count()
    }

    fn next_entry(&self, symbol: &str) -> Scripted {
        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        let scripted = match scripts.get_mut(symbol) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        scripted
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| Err(HttpError::new(format!("no scripted response for {symbol}"))))
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        let symbol = request
            .query_value("symbol")
            .unwrap_or_default()
            .to_ascii_uppercase();
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let entry = self.next_entry(&symbol);
        Box::pin(async move { entry })
    }
}
