use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::collectors::{JobCollector, JobDraft, SourceError, api_client};
use crate::geocode::Coordinate;
use crate::http::{RetryPolicy, send_with_retry};
use crate::models::job::JobSource;

pub const BASE_URL: &str = "https://data.usajobs.gov";
const PER_PAGE: u32 = 250;

pub struct UsaJobs {
    http: reqwest::Client,
    api_key: String,
    /// The email address registered with the API key.
    user_agent: String,
    max_pages: u32,
    base_url: String,
    retry: RetryPolicy,
}

impl UsaJobs {
    pub fn new(
        api_key: String,
        user_agent: String,
        base_url: &str,
        max_pages: u32,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            http: api_client(timeout)?,
            api_key,
            user_agent,
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
    ) -> Result<SearchResult, SourceError> {
        let url = format!("{}/api/search", self.base_url);
        let page_param = page.to_string();
        let per_page = PER_PAGE.to_string();
        let resp = send_with_retry(&self.retry, || {
            let mut req = self
                .http
                .get(&url)
                .header("User-Agent", &self.user_agent)
                .header("Authorization-Key", &self.api_key)
                .query(&[
                    ("LocationName", location),
                    ("ResultsPerPage", per_page.as_str()),
                    ("Page", page_param.as_str()),
                ]);
            if let Some(keyword) = keyword {
                req = req.query(&[("Keyword", keyword)]);
            }
            req
        })
        .await?;
        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::Decode(format!("USAJobs page {page}: {e}")))?;
        Ok(body.search_result)
    }
}

#[async_trait]
impl JobCollector for UsaJobs {
    fn source(&self) -> JobSource {
        JobSource::Usajobs
    }

    async fn fetch(
        &self,
        location: &str,
        keyword: Option<&str>,
    ) -> Result<Vec<JobDraft>, SourceError> {
        let mut drafts = Vec::new();
        for page in 1..=self.max_pages {
            let result = match self.page(page, location, keyword).await {
                Ok(result) => result,
                Err(e) if drafts.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!(page, "USAJobs pagination stopped: {e}");
                    break;
                }
            };
            let received = result.items.len();
            let pages = result.user_area.number_of_pages();
            drafts.extend(result.items.into_iter().filter_map(Item::into_draft));
            tracing::debug!(page, received, pages, "USAJobs page fetched");

            if received == 0 || page >= pages {
                break;
            }
        }
        Ok(drafts)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "SearchResult")]
    search_result: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(rename = "SearchResultItems", default)]
    items: Vec<Item>,
    #[serde(rename = "UserArea", default)]
    user_area: ResultUserArea,
}

#[derive(Debug, Default, Deserialize)]
struct ResultUserArea {
    #[serde(rename = "NumberOfPages")]
    number_of_pages: Option<String>,
}

impl ResultUserArea {
    fn number_of_pages(&self) -> u32 {
        self.number_of_pages
            .as_deref()
            .and_then(|n| n.trim().parse().ok())
            .unwrap_or(1)
    }
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(rename = "MatchedObjectId")]
    id: String,
    #[serde(rename = "MatchedObjectDescriptor")]
    descriptor: Descriptor,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Descriptor {
    #[serde(default)]
    position_title: String,
    #[serde(rename = "PositionURI")]
    position_uri: Option<String>,
    organization_name: Option<String>,
    #[serde(default)]
    position_location: Vec<PositionLocation>,
    #[serde(default)]
    position_schedule: Vec<CodeName>,
    #[serde(default)]
    position_remuneration: Vec<Remuneration>,
    publication_start_date: Option<String>,
    user_area: Option<DescriptorUserArea>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PositionLocation {
    location_name: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CodeName {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Remuneration {
    minimum_range: Option<String>,
    maximum_range: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescriptorUserArea {
    details: Option<Details>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Details {
    job_summary: Option<String>,
}

/// USAJobs timestamps carry no offset; they are UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

impl Item {
    fn into_draft(self) -> Option<JobDraft> {
        let d = self.descriptor;
        // A posting without any duty location cannot be placed on the map.
        let location = d.position_location.into_iter().next()?;

        let mut draft = JobDraft::new(JobSource::Usajobs, self.id, d.position_title);
        draft.company = d.organization_name;
        draft.url = d.position_uri;
        draft.description = d.user_area.and_then(|u| u.details).and_then(|x| x.job_summary);
        draft.location_text = location.location_name;
        draft.coordinate = match (location.latitude, location.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
            _ => None,
        };
        draft.employment_type_text = d.position_schedule.into_iter().find_map(|s| s.name);
        draft.salary_text = d.position_remuneration.into_iter().next().and_then(|r| {
            match (r.minimum_range, r.maximum_range) {
                (Some(min), Some(max)) => Some(format!("{min} - {max}")),
                (Some(v), None) | (None, Some(v)) => Some(v),
                (None, None) => None,
            }
        });
        draft.salary_currency = draft.salary_text.as_ref().map(|_| "USD".to_string());
        draft.posted_at = d.publication_start_date.as_deref().and_then(parse_timestamp);
        Some(draft)
    }
}
