// Source adapters.
// Each collector maps one external source into `JobDraft`s; the runner feeds
// drafts through the normalizer and upsert engine.

pub mod adzuna;
pub mod craigslist;
pub mod indeed;
pub mod runner;
pub mod scrape;
pub mod usajobs;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::geocode::{Address, Coordinate};
use crate::http::HttpError;
use crate::models::job::JobSource;

/// A posting as one source described it, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDraft {
    pub source: JobSource,
    pub source_id: String,
    pub title: String,
    pub company: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub location_text: Option<String>,
    pub salary_text: Option<String>,
    pub salary_currency: Option<String>,
    pub employment_type_text: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    /// Coordinate asserted by the source, if any.
    pub coordinate: Option<Coordinate>,
    /// Structured address asserted by the source, if any.
    pub address: Option<Address>,
}

impl JobDraft {
    pub fn new(source: JobSource, source_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source,
            source_id: source_id.into(),
            title: title.into(),
            company: None,
            description: None,
            url: None,
            location_text: None,
            salary_text: None,
            salary_currency: None,
            employment_type_text: None,
            posted_at: None,
            coordinate: None,
            address: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("anti-bot challenge at {url} was not resolved")]
    Challenge { url: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Trait that all job sources implement.
#[async_trait]
pub trait JobCollector: Send + Sync {
    fn source(&self) -> JobSource;

    fn name(&self) -> &'static str {
        self.source().as_str()
    }

    /// Fetch every listing for `location` (and `keyword`, when given).
    ///
    /// Partial failures (one detail page, a later search page) are logged
    /// and skipped; `Err` means nothing could be collected at all.
    async fn fetch(
        &self,
        location: &str,
        keyword: Option<&str>,
    ) -> Result<Vec<JobDraft>, SourceError>;
}

/// Credentials, endpoints and limits the collectors are built from.
#[derive(Debug, Clone, Default)]
pub struct CollectorSettings {
    pub adzuna_app_id: Option<String>,
    pub adzuna_app_key: Option<String>,
    pub adzuna_country: String,
    pub adzuna_base_url: String,
    pub usajobs_api_key: Option<String>,
    pub usajobs_user_agent: Option<String>,
    pub usajobs_base_url: String,
    pub indeed_base_url: String,
    pub max_pages: u32,
    pub http_timeout: Duration,
}

fn required(value: &Option<String>, name: &str) -> Result<String, SourceError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| SourceError::Configuration(format!("{name} is not set")))
}

pub(crate) fn api_client(timeout: Duration) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("jobmap/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SourceError::Configuration(format!("Failed to build HTTP client: {e}")))
}

/// Build the requested collectors, failing on the first unknown source or
/// missing credential.
pub fn build_collectors(
    settings: &CollectorSettings,
    names: &[String],
) -> Result<Vec<Arc<dyn JobCollector>>, SourceError> {
    let mut collectors: Vec<Arc<dyn JobCollector>> = Vec::with_capacity(names.len());
    for name in names {
        let source: JobSource = name.parse().map_err(SourceError::Configuration)?;
        let collector: Arc<dyn JobCollector> = match source {
            JobSource::Adzuna => Arc::new(adzuna::Adzuna::new(
                required(&settings.adzuna_app_id, "ADZUNA_APP_ID")?,
                required(&settings.adzuna_app_key, "ADZUNA_APP_KEY")?,
                &settings.adzuna_country,
                &settings.adzuna_base_url,
                settings.max_pages,
                settings.http_timeout,
            )?),
            JobSource::Usajobs => Arc::new(usajobs::UsaJobs::new(
                required(&settings.usajobs_api_key, "USAJOBS_API_KEY")?,
                required(&settings.usajobs_user_agent, "USAJOBS_USER_AGENT")?,
                &settings.usajobs_base_url,
                settings.max_pages,
                settings.http_timeout,
            )?),
            JobSource::Indeed => Arc::new(indeed::Indeed::new(
                scrape::ScrapeClient::new(settings.http_timeout)?,
                &settings.indeed_base_url,
                settings.max_pages,
            )),
            JobSource::Craigslist => Arc::new(craigslist::Craigslist::new(
                scrape::ScrapeClient::new(settings.http_timeout)?,
            )),
            JobSource::Manual => {
                return Err(SourceError::Configuration(
                    "manual postings arrive through submissions, not ingestion".to_string(),
                ));
            }
        };
        collectors.push(collector);
    }
    Ok(collectors)
}
