use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::Html;
use serde::Deserialize;

use crate::collectors::scrape::element_text;
use crate::collectors::{JobCollector, JobDraft, SourceError, api_client};
use crate::geocode::Coordinate;
use crate::http::{RetryPolicy, send_with_retry};
use crate::models::job::JobSource;

pub const BASE_URL: &str = "https://api.adzuna.com";
const PER_PAGE: u32 = 50;

pub struct Adzuna {
    http: reqwest::Client,
    app_id: String,
    app_key: String,
    country: String,
    max_pages: u32,
    base_url: String,
    retry: RetryPolicy,
}

impl Adzuna {
    pub fn new(
        app_id: String,
        app_key: String,
        country: &str,
        base_url: &str,
        max_pages: u32,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            http: api_client(timeout)?,
            app_id,
            app_key,
            country: country.trim().to_lowercase(),
            max_pages: max_pages.max(1),
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    async fn page(
        &self,
        page: u32,
        location: &str,
        keyword: Option<&str>,
    ) -> Result<SearchResponse, SourceError> {
        let url = format!("{}/v1/api/jobs/{}/search/{page}", self.base_url, self.country);
        let per_page = PER_PAGE.to_string();
        let resp = send_with_retry(&self.retry, || {
            let mut req = self.http.get(&url).query(&[
                ("app_id", self.app_id.as_str()),
                ("app_key", self.app_key.as_str()),
                ("where", location),
                ("results_per_page", per_page.as_str()),
                ("content-type", "application/json"),
            ]);
            if let Some(what) = keyword {
                req = req.query(&[("what", what)]);
            }
            req
        })
        .await?;
        resp.json()
            .await
            .map_err(|e| SourceError::Decode(format!("Adzuna page {page}: {e}")))
    }
}

#[async_trait]
impl JobCollector for Adzuna {
    fn source(&self) -> JobSource {
        JobSource::Adzuna
    }

    async fn fetch(
        &self,
        location: &str,
        keyword: Option<&str>,
    ) -> Result<Vec<JobDraft>, SourceError> {
        let mut drafts = Vec::new();
        for page in 1..=self.max_pages {
            let body = match self.page(page, location, keyword).await {
                Ok(body) => body,
                Err(e) if drafts.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!(page, "Adzuna pagination stopped: {e}");
                    break;
                }
            };
            let received = body.results.len();
            drafts.extend(body.results.into_iter().map(AdzunaJob::into_draft));
            tracing::debug!(page, received, total = body.count, "Adzuna page fetched");

            if received == 0 || u64::from(page * PER_PAGE) >= body.count {
                break;
            }
        }
        Ok(drafts)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    results: Vec<AdzunaJob>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Id {
    Text(String),
    Number(u64),
}

#[derive(Debug, Deserialize)]
struct AdzunaJob {
    id: Id,
    #[serde(default)]
    title: String,
    description: Option<String>,
    redirect_url: Option<String>,
    created: Option<DateTime<Utc>>,
    company: Option<DisplayName>,
    location: Option<AdzunaLocation>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    salary_min: Option<f64>,
    salary_max: Option<f64>,
    contract_time: Option<String>,
    contract_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DisplayName {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdzunaLocation {
    display_name: Option<String>,
    #[serde(default)]
    area: Vec<String>,
}

impl AdzunaLocation {
    /// `area` runs country → state → county → city; prefer "city, state".
    fn text(&self) -> Option<String> {
        match self.area.as_slice() {
            [_, state, .., city] => Some(format!("{city}, {state}")),
            _ => self.display_name.clone(),
        }
    }
}

fn salary_text(min: Option<f64>, max: Option<f64>) -> Option<String> {
    match (min, max) {
        (Some(a), Some(b)) => Some(format!("{a:.0} - {b:.0}")),
        (Some(v), None) | (None, Some(v)) => Some(format!("{v:.0}")),
        (None, None) => None,
    }
}

impl AdzunaJob {
    fn into_draft(self) -> JobDraft {
        let source_id = match self.id {
            Id::Text(id) => id,
            Id::Number(id) => id.to_string(),
        };
        let employment = [self.contract_time, self.contract_type]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");

        let mut draft = JobDraft::new(JobSource::Adzuna, source_id, strip_markup(&self.title));
        draft.company = self.company.and_then(|c| c.display_name);
        draft.description = self.description.map(|d| strip_markup(&d));
        draft.url = self.redirect_url;
        draft.location_text = self.location.as_ref().and_then(AdzunaLocation::text);
        draft.salary_text = salary_text(self.salary_min, self.salary_max);
        draft.employment_type_text = (!employment.is_empty()).then_some(employment);
        draft.posted_at = self.created;
        draft.coordinate = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
            _ => None,
        };
        draft
    }
}

/// Adzuna highlights search terms with `<strong>` tags and escapes entities.
fn strip_markup(text: &str) -> String {
    element_text(Html::parse_fragment(text).root_element())
}
