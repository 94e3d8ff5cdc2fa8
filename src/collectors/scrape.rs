//! Shared plumbing for the HTML-scraped sources.

use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use scraper::{ElementRef, Selector};

use crate::collectors::SourceError;
use crate::http::{HttpError, RetryPolicy, retry_after};

const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) ",
    "AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
);

/// Substrings of interstitial anti-bot pages (Cloudflare and friends).
const CHALLENGE_MARKERS: &[&str] = &[
    "just a moment...",
    "cf-chl",
    "challenge-platform",
    "verify you are human",
    "g-recaptcha",
    "h-captcha",
    "hcaptcha.com",
    "captcha-delivery",
];

pub fn is_challenge(html: &str) -> bool {
    let head: String = html.chars().take(20_000).collect::<String>().to_lowercase();
    CHALLENGE_MARKERS.iter().any(|m| head.contains(m))
}

#[derive(Clone)]
pub struct ScrapeClient {
    http: reqwest::Client,
    min_delay: Duration,
    max_delay: Duration,
    challenge_timeout: Duration,
    challenge_poll: Duration,
    retry: RetryPolicy,
}

impl ScrapeClient {
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("none"));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(2),
            challenge_timeout: Duration::from_secs(20),
            challenge_poll: Duration::from_secs(3),
            retry: RetryPolicy::default(),
        })
    }

    /// No polite delay and short backoff, for tests against local servers.
    #[cfg(test)]
    pub fn without_delays(timeout: Duration) -> Result<Self, SourceError> {
        Ok(Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            challenge_timeout: Duration::from_millis(200),
            challenge_poll: Duration::from_millis(20),
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(50),
            },
            ..Self::new(timeout)?
        })
    }

    /// Randomized pause between page requests.
    pub async fn polite_delay(&self) {
        let millis = rand::rng()
            .random_range(self.min_delay.as_millis()..=self.max_delay.as_millis());
        tokio::time::sleep(Duration::from_millis(millis as u64)).await;
    }

    /// Fetch a page as text after the polite delay, waiting out anti-bot
    /// interstitials and retrying rate limits, 5xx responses, timeouts and
    /// connection failures.
    pub async fn get_html(&self, url: &str) -> Result<String, SourceError> {
        self.polite_delay().await;
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            let resp = match self.http.get(url).send().await {
                Ok(resp) => resp,
                Err(e)
                    if (e.is_timeout() || e.is_connect()) && attempt < self.retry.max_retries =>
                {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(url, attempt, "Retrying page fetch after transport error: {e}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(HttpError::from(e).into()),
            };
            let status = resp.status();
            let hint = retry_after(resp.headers());
            let body = resp.text().await.map_err(HttpError::from)?;

            if is_challenge(&body) {
                if started.elapsed() >= self.challenge_timeout {
                    return Err(SourceError::Challenge {
                        url: url.to_string(),
                    });
                }
                tracing::info!(
                    url,
                    status = status.as_u16(),
                    "Waiting for anti-bot challenge to clear"
                );
                tokio::time::sleep(self.challenge_poll).await;
                continue;
            }
            if status.is_success() {
                return Ok(body);
            }

            let retryable = status.as_u16() == 429 || status.is_server_error();
            if !retryable || attempt >= self.retry.max_retries {
                return Err(if status.as_u16() == 429 {
                    HttpError::RateLimited {
                        attempts: attempt + 1,
                    }
                } else {
                    HttpError::Status {
                        status: status.as_u16(),
                    }
                }
                .into());
            }
            let delay = self.retry.delay_for(attempt, hint);
            tracing::warn!(url, status = status.as_u16(), attempt, "Retrying page fetch");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Alternative selectors for one field, tried in order.
///
/// Sites reshuffle their markup regularly; keeping old and new variants side
/// by side lets one listing layout change degrade a field instead of the
/// whole source.
pub struct SelectorList {
    selectors: Vec<Selector>,
}

impl SelectorList {
    pub fn new(sources: &[&str]) -> Self {
        let selectors = sources
            .iter()
            .filter_map(|s| match Selector::parse(s) {
                Ok(sel) => Some(sel),
                Err(e) => {
                    tracing::error!(selector = s, "Invalid selector: {e}");
                    None
                }
            })
            .collect();
        Self { selectors }
    }

    /// Elements matched by the first selector that matches anything.
    pub fn all<'a>(&self, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        for sel in &self.selectors {
            let found: Vec<ElementRef<'a>> = scope.select(sel).collect();
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }

    /// Whitespace-collapsed text of the first non-empty match.
    pub fn text(&self, scope: ElementRef<'_>) -> Option<String> {
        self.selectors
            .iter()
            .flat_map(|sel| scope.select(sel))
            .map(element_text)
            .find(|t| !t.is_empty())
    }

    /// `name` attribute of the first match carrying it.
    pub fn attr(&self, scope: ElementRef<'_>, name: &str) -> Option<String> {
        self.selectors
            .iter()
            .flat_map(|sel| scope.select(sel))
            .find_map(|el| el.value().attr(name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

pub fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
