use std::time::Duration;

use thiserror::Error;

use crate::feed::parser::{parse_items, RawItem};
use crate::storage::Source;

/// Hard wall-clock deadline on a single HTTP attempt.
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Attempts per invocation, including the first.
const MAX_ATTEMPTS: u32 = 3;

/// Initial inter-attempt delay; multiplied by 1.5 after each failure.
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const BACKOFF_FACTOR: f64 = 1.5;

const USER_AGENT: &str = "distill/0.1 (+https://github.com/dhofheinz/distill)";
const ACCEPT: &str = "application/rss+xml, application/xml, text/xml, */*";

/// Errors that can occur while fetching and parsing one source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL rejected before any network I/O
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),
    /// Request exceeded the 15-second deadline
    #[error("Request timed out")]
    Timeout,
    /// DNS resolution failed
    #[error("DNS failure: {0}")]
    Dns(String),
    /// TCP connection refused or reset
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),
    /// Other transport-level error
    #[error("Request failed: {0}")]
    Network(String),
    /// HTTP 4xx, permanent, never retried
    #[error("HTTP client error: status {0}")]
    HttpClient(u16),
    /// HTTP 5xx, retried then counted against the breaker
    #[error("HTTP server error: status {0}")]
    HttpServer(u16),
    /// Body could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
}

impl FetchError {
    /// Transient failures are retried within an invocation; everything else
    /// fails immediately.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout
                | FetchError::Dns(_)
                | FetchError::ConnectionRefused(_)
                | FetchError::Network(_)
                | FetchError::HttpServer(_)
        )
    }
}

fn classify_transport(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout;
    }
    let msg = err.to_string();
    let lowered = msg.to_lowercase();
    if lowered.contains("dns") || lowered.contains("name resolution") {
        return FetchError::Dns(msg);
    }
    if err.is_connect() || lowered.contains("connection refused") {
        return FetchError::ConnectionRefused(msg);
    }
    FetchError::Network(msg)
}

/// Fetch and parse one source.
///
/// Performs a GET with a 15 s deadline and up to three attempts; the
/// inter-attempt delay starts at 2 s and grows by 1.5× per failure. Backoff
/// state is local to the invocation, so concurrent fetches never share a
/// schedule. 4xx responses, invalid URLs, and parse failures are terminal on
/// the first occurrence.
pub async fn fetch(client: &reqwest::Client, source: &Source) -> Result<Vec<RawItem>, FetchError> {
    // Reject malformed URLs before any network I/O
    let parsed = url::Url::parse(&source.url)
        .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", source.url, e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(FetchError::InvalidUrl(format!(
            "{}: unsupported scheme '{}'",
            source.url,
            parsed.scheme()
        )));
    }

    let mut delay = INITIAL_BACKOFF;
    let mut attempt = 1u32;

    loop {
        match fetch_once(client, &source.url).await {
            Ok(items) => return Ok(items),
            Err(e) if e.is_retriable() && attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    source = %source.id,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Fetch attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = Duration::from_secs_f64(delay.as_secs_f64() * BACKOFF_FACTOR);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn fetch_once(client: &reqwest::Client, url: &str) -> Result<Vec<RawItem>, FetchError> {
    let response = tokio::time::timeout(
        FETCH_TIMEOUT,
        client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .send(),
    )
    .await
    .map_err(|_| FetchError::Timeout)?
    .map_err(classify_transport)?;

    let status = response.status();
    // 2xx/3xx parse; 4xx permanent; 5xx retriable
    if status.is_client_error() {
        return Err(FetchError::HttpClient(status.as_u16()));
    }
    if status.is_server_error() {
        return Err(FetchError::HttpServer(status.as_u16()));
    }

    let bytes = tokio::time::timeout(FETCH_TIMEOUT, response.bytes())
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(classify_transport)?;

    parse_items(&bytes).map_err(|e| FetchError::Parse(e.to_string()))
}
