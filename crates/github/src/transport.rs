//! `reqwest`-backed [`HttpTransport`] for the GitHub REST API.
//!
//! Responsibilities that stay out of the engine:
//!
//! - default headers (`Accept`, bearer token, `User-Agent`), overridden per
//!   stream by [`PageRequest::headers`];
//! - `Link: <…>; rel="next"` parsing, the next URL being the page token;
//! - retry with exponential back-off on 5xx, 429, and rate-limited 403
//!   responses, honouring `Retry-After` and `x-ratelimit-reset`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, LINK, RETRY_AFTER, USER_AGENT};
use serde_json::Value;

use tap::{HttpResponse, HttpTransport, PageRequest, RetryPolicy, TransportError};

use crate::errors::GithubError;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_ACCEPT: &str = "application/vnd.github.v3+json";
pub const DEFAULT_USER_AGENT: &str = concat!("tap-github/", env!("CARGO_PKG_VERSION"));

const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Connection and retry settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL that request paths are appended to.
    pub api_url: String,
    /// Token sent as `Authorization: Bearer …`; anonymous when `None`.
    pub auth_token: Option<String>,
    pub user_agent: String,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles with every further attempt.
    pub initial_backoff: Duration,
    /// Upper bound of any single wait, including server-requested ones.
    pub max_backoff: Duration,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            auth_token: None,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(15 * 60),
            timeout: Duration::from_secs(60),
        }
    }
}

/// GitHub REST transport.
#[derive(Debug, Clone)]
pub struct GithubTransport {
    client: reqwest::Client,
    api_url: String,
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl GithubTransport {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`GithubError::InvalidHeader`] if the token or user agent
    /// cannot be sent as a header, or [`GithubError::Client`] if the client
    /// cannot be built.
    pub fn new(config: TransportConfig) -> Result<Self, GithubError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).map_err(|_| GithubError::InvalidHeader("User-Agent"))?,
        );
        if let Some(token) = &config.auth_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| GithubError::InvalidHeader("Authorization"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    async fn send_once(&self, request: &PageRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match &request.page_token {
            Some(next) => self.client.get(next),
            None => self
                .client
                .get(format!("{}{}", self.api_url, request.path))
                .query(&request.query),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            let message = format!("request to {} failed: {e}", request.path);
            if e.is_timeout() || e.is_connect() || e.is_request() {
                TransportError::retryable(message, None, None)
            } else {
                TransportError::fatal(message, None)
            }
        })?;

        let status = response.status().as_u16();
        if let Some(RetryPolicy::Retryable { after }) =
            classify(status, response.headers(), chrono::Utc::now().timestamp())
        {
            return Err(TransportError::retryable(
                format!("GitHub answered {status} for {}", request.path),
                Some(status),
                after,
            ));
        }

        let next_page = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_link);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::retryable(format!("reading body failed: {e}"), Some(status), None))?;
        let body = decode_body(&bytes, status)?;

        Ok(HttpResponse { status, body, next_page })
    }
}

#[async_trait]
impl HttpTransport for GithubTransport {
    async fn get(&self, request: &PageRequest) -> Result<HttpResponse, TransportError> {
        let mut attempt = 0_u32;
        loop {
            match self.send_once(request).await {
                Ok(response) => return Ok(response),
                Err(error) if error.retry.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let wait = match error.retry {
                        RetryPolicy::Retryable { after: Some(after) } => after.min(self.max_backoff),
                        _ => self.backoff(attempt),
                    };
                    tracing::warn!(
                        path = %request.path,
                        status = error.status,
                        attempt,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        error = %error.message,
                        "Retrying GitHub request"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Decides whether a response status should be retried.
///
/// `None` means the response is final (success or an error the engine judges).
/// `now` is the current Unix time, used to turn `x-ratelimit-reset` into a
/// delay.
pub fn classify(status: u16, headers: &HeaderMap, now: i64) -> Option<RetryPolicy> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
    let retry_after = header(RETRY_AFTER.as_str())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let reset_in = header(RATE_LIMIT_RESET)
        .and_then(|v| v.parse::<i64>().ok())
        .map(|reset| Duration::from_secs(u64::try_from(reset - now).unwrap_or(0)));
    let exhausted = header(RATE_LIMIT_REMAINING) == Some("0");

    match status {
        500..=599 => Some(RetryPolicy::Retryable { after: retry_after }),
        429 => Some(RetryPolicy::Retryable {
            after: retry_after.or(reset_in),
        }),
        403 if exhausted || retry_after.is_some() => Some(RetryPolicy::Retryable {
            after: retry_after.or(reset_in),
        }),
        _ => None,
    }
}

/// Extracts the `rel="next"` target of an RFC 5988 `Link` header.
pub fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let (target, params) = entry.trim().split_once(';')?;
        let url = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        let is_next = params.split(';').any(|param| {
            param
                .trim()
                .strip_prefix("rel=")
                .is_some_and(|rel| rel.trim_matches('"').split_whitespace().any(|r| r == "next"))
        });
        is_next.then(|| url.to_owned())
    })
}

fn decode_body(bytes: &[u8], status: u16) -> Result<Value, TransportError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    match serde_json::from_slice(bytes) {
        Ok(body) => Ok(body),
        // Error bodies are informational only.
        Err(_) if !(200..300).contains(&status) => Ok(Value::Null),
        Err(e) => Err(TransportError::fatal(format!("response is not JSON: {e}"), Some(status))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn next_link_is_found_among_other_relations() {
        let header = r#"<https://api.github.com/repositories/1/issues?page=2>; rel="next", <https://api.github.com/repositories/1/issues?page=5>; rel="last""#;
        assert_eq!(
            next_link(header).as_deref(),
            Some("https://api.github.com/repositories/1/issues?page=2")
        );
    }

    #[test]
    fn last_page_has_no_next_link() {
        let header = r#"<https://api.github.com/x?page=1>; rel="first", <https://api.github.com/x?page=4>; rel="prev""#;
        assert_eq!(next_link(header), None);
        assert_eq!(next_link("garbage"), None);
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert_eq!(
            classify(502, &HeaderMap::new(), 0),
            Some(RetryPolicy::Retryable { after: None })
        );
        assert_eq!(
            classify(429, &headers(&[("retry-after", "7")]), 0),
            Some(RetryPolicy::Retryable {
                after: Some(Duration::from_secs(7))
            })
        );
    }

    #[test]
    fn exhausted_rate_limit_waits_until_reset() {
        let h = headers(&[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", "1000")]);
        assert_eq!(
            classify(403, &h, 940),
            Some(RetryPolicy::Retryable {
                after: Some(Duration::from_secs(60))
            })
        );
        assert_eq!(
            classify(403, &h, 2000),
            Some(RetryPolicy::Retryable {
                after: Some(Duration::ZERO)
            })
        );
    }

    #[test]
    fn plain_client_errors_are_final() {
        assert_eq!(classify(403, &headers(&[("x-ratelimit-remaining", "12")]), 0), None);
        assert_eq!(classify(404, &HeaderMap::new(), 0), None);
        assert_eq!(classify(200, &HeaderMap::new(), 0), None);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let transport = GithubTransport::new(TransportConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            ..TransportConfig::default()
        })
        .unwrap();
        assert_eq!(transport.backoff(1), Duration::from_millis(100));
        assert_eq!(transport.backoff(2), Duration::from_millis(200));
        assert_eq!(transport.backoff(3), Duration::from_millis(350));
    }

    #[test]
    fn empty_and_error_bodies_decode_leniently() {
        assert_eq!(decode_body(b"", 200).unwrap(), Value::Null);
        assert_eq!(decode_body(b"<html>", 404).unwrap(), Value::Null);
        assert!(decode_body(b"<html>", 200).is_err());
    }

    #[test]
    fn invalid_token_is_rejected() {
        let err = GithubTransport::new(TransportConfig {
            auth_token: Some("bad\ntoken".into()),
            ..TransportConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, GithubError::InvalidHeader("Authorization")));
    }
}
