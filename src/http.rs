//! Outbound HTTP with bounded retries.
//!
//! Shared by the geocoder and the API-backed collectors. Rate limits (429),
//! 5xx responses, timeouts and connection failures are retried with
//! exponential backoff; a `Retry-After` hint from the server replaces the
//! computed delay when present.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("upstream returned {status}")]
    Status { status: u16 },
}

impl HttpError {
    /// Whether the failure came from the remote side being unavailable or busy,
    /// as opposed to a request the remote side rejected.
    pub fn is_transient(&self) -> bool {
        match self {
            HttpError::Request(e) => e.is_timeout() || e.is_connect(),
            HttpError::RateLimited { .. } => true,
            HttpError::Status { status } => *status >= 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^attempt`, capped at `max_delay`, with ±20% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let capped = exp.min(self.max_delay);
        let jitter: f64 = rand::rng().random_range(0.8..=1.2);
        capped.mul_f64(jitter).min(self.max_delay)
    }

    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        match hint {
            Some(hint) => hint.min(self.max_delay),
            None => self.backoff(attempt),
        }
    }
}

/// Parse a `Retry-After` header given either as delta-seconds or as an HTTP date.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let wait = at.signed_duration_since(Utc::now());
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Send the request built by `build`, retrying transient failures.
///
/// `build` is called once per attempt because a `RequestBuilder` is consumed
/// by `send`. Only successful (2xx) responses are returned as `Ok`.
pub async fn send_with_retry<F>(policy: &RetryPolicy, mut build: F) -> Result<Response, HttpError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0u32;
    loop {
        match build().send().await {
            Ok(resp) if resp.status().is_success() => return Ok(resp),
            Ok(resp) => {
                let status = resp.status();
                if !is_retryable_status(status) || attempt >= policy.max_retries {
                    return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                        HttpError::RateLimited {
                            attempts: attempt + 1,
                        }
                    } else {
                        HttpError::Status {
                            status: status.as_u16(),
                        }
                    });
                }
                let delay = policy.delay_for(attempt, retry_after(resp.headers()));
                tracing::warn!(
                    status = status.as_u16(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying upstream request"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                let transient = e.is_timeout() || e.is_connect();
                if !transient || attempt >= policy.max_retries {
                    return Err(HttpError::Request(e));
                }
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after transport error: {e}"
                );
                tokio::time::sleep(delay).await;
            }
        }
        attempt += 1;
    }
}
