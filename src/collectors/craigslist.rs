use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use scraper::Html;

use crate::collectors::scrape::{ScrapeClient, SelectorList, element_text};
use crate::collectors::{JobCollector, JobDraft, SourceError};
use crate::geocode::{Address, Coordinate};
use crate::models::job::JobSource;

/// Cities whose Craigslist subdomain is not just the squashed city name.
const SITE_OVERRIDES: &[(&str, &str)] = &[
    ("san francisco", "sfbay"),
    ("oakland", "sfbay"),
    ("san jose", "sfbay"),
    ("washington", "washingtondc"),
    ("new york", "newyork"),
    ("new york city", "newyork"),
    ("minneapolis", "minneapolis"),
    ("st paul", "minneapolis"),
    ("saint paul", "minneapolis"),
    ("fort lauderdale", "miami"),
    ("tempe", "phoenix"),
    ("mesa", "phoenix"),
    ("scottsdale", "phoenix"),
    ("chandler", "phoenix"),
    ("glendale", "phoenix"),
];

static RESULTS: LazyLock<SelectorList> = LazyLock::new(|| {
    SelectorList::new(&["li.cl-static-search-result", "li.cl-search-result", "li.result-row"])
});
static RESULT_LINK: LazyLock<SelectorList> =
    LazyLock::new(|| SelectorList::new(&["a.posting-title", "a.result-title", "a[href]"]));
static RESULT_TITLE: LazyLock<SelectorList> =
    LazyLock::new(|| SelectorList::new(&["div.title", "a.result-title", ".posting-title .label"]));

static MAP: LazyLock<SelectorList> =
    LazyLock::new(|| SelectorList::new(&["#map", "div.viewposting"]));
static MAP_ADDRESS: LazyLock<SelectorList> =
    LazyLock::new(|| SelectorList::new(&["div.mapaddress", ".mapaddress"]));
static BODY: LazyLock<SelectorList> =
    LazyLock::new(|| SelectorList::new(&["#postingbody", "section.userbody"]));
static QR_NOTICE: LazyLock<SelectorList> =
    LazyLock::new(|| SelectorList::new(&[".print-qrcode-container"]));
static TITLE: LazyLock<SelectorList> =
    LazyLock::new(|| SelectorList::new(&["#titletextonly", "span.postingtitletext"]));
static POSTED: LazyLock<SelectorList> = LazyLock::new(|| {
    SelectorList::new(&["#display-date time", "time.date.timeago", "time[datetime]"])
});
static ATTRIBUTES: LazyLock<SelectorList> =
    LazyLock::new(|| SelectorList::new(&[".attrgroup .attr", ".attrgroup span"]));

/// Craigslist subdomain for a `"City, ST"` location.
pub fn site_for(location: &str) -> Option<String> {
    let city = location.split(',').next()?.trim().to_lowercase();
    let city = city.replace('.', "");
    if city.is_empty() {
        return None;
    }
    if let Some((_, site)) = SITE_OVERRIDES.iter().find(|(name, _)| *name == city) {
        return Some((*site).to_string());
    }
    Some(city.chars().filter(char::is_ascii_alphanumeric).collect())
}

/// Posting id from `.../d/some-slug/7812345678.html`.
fn post_id(url: &str) -> Option<String> {
    let file = url.rsplit('/').next()?;
    let id = file.strip_suffix(".html").unwrap_or(file);
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then(|| id.to_string())
}

#[derive(Debug, Clone, PartialEq)]
struct ResultRow {
    id: String,
    url: String,
    title: String,
}

#[derive(Debug, Default, PartialEq)]
struct Posting {
    title: Option<String>,
    description: Option<String>,
    coordinate: Option<Coordinate>,
    street: Option<String>,
    compensation: Option<String>,
    employment_type: Option<String>,
    posted_at: Option<DateTime<Utc>>,
}

fn parse_results(html: &str) -> Vec<ResultRow> {
    let doc = Html::parse_document(html);
    RESULTS
        .all(doc.root_element())
        .into_iter()
        .filter_map(|row| {
            let url = RESULT_LINK.attr(row, "href")?;
            let id = row
                .value()
                .attr("data-pid")
                .map(String::from)
                .or_else(|| post_id(&url))?;
            Some(ResultRow {
                id,
                title: RESULT_TITLE.text(row)?,
                url,
            })
        })
        .collect()
}

fn parse_posting(html: &str) -> Posting {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let coordinate = match (MAP.attr(root, "data-latitude"), MAP.attr(root, "data-longitude")) {
        (Some(lat), Some(lon)) => match (lat.parse(), lon.parse()) {
            (Ok(lat), Ok(lon)) => Some(Coordinate::new(lat, lon)).filter(Coordinate::is_valid),
            _ => None,
        },
        _ => None,
    };

    let description = BODY.all(root).into_iter().next().map(|body| {
        let full = element_text(body);
        match QR_NOTICE.all(body).into_iter().next() {
            Some(notice) => full.replacen(&element_text(notice), "", 1).trim().to_string(),
            None => full,
        }
    });

    let mut compensation = None;
    let mut employment_type = None;
    for attr in ATTRIBUTES.all(root) {
        let text = element_text(attr);
        let Some((label, value)) = text.split_once(':') else {
            continue;
        };
        match label.trim().to_lowercase().as_str() {
            "compensation" => compensation = Some(value.trim().to_string()),
            "employment type" => employment_type = Some(value.trim().to_string()),
            _ => {}
        }
    }

    Posting {
        title: TITLE.text(root),
        description: description.filter(|d| !d.is_empty()),
        coordinate,
        street: MAP_ADDRESS.text(root),
        compensation,
        employment_type,
        posted_at: POSTED
            .attr(root, "datetime")
            .and_then(|raw| DateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%z").ok())
            .map(|t| t.with_timezone(&Utc)),
    }
}

pub struct Craigslist {
    client: ScrapeClient,
}

impl Craigslist {
    pub fn new(client: ScrapeClient) -> Self {
        Self { client }
    }

    fn draft(row: ResultRow, posting: Posting, location: &str) -> JobDraft {
        let mut draft = JobDraft::new(
            JobSource::Craigslist,
            row.id,
            posting.title.unwrap_or(row.title),
        );
        draft.url = Some(row.url);
        draft.description = posting.description;
        draft.location_text = Some(location.to_string());
        draft.salary_text = posting.compensation;
        draft.employment_type_text = posting.employment_type;
        draft.posted_at = posting.posted_at;
        draft.coordinate = posting.coordinate;
        draft.address = posting.street.map(|street| Address {
            street: Some(street),
            ..Address::default()
        });
        draft
    }
}

#[async_trait]
impl JobCollector for Craigslist {
    fn source(&self) -> JobSource {
        JobSource::Craigslist
    }

    async fn fetch(
        &self,
        location: &str,
        keyword: Option<&str>,
    ) -> Result<Vec<JobDraft>, SourceError> {
        let site = site_for(location).ok_or_else(|| {
            SourceError::Configuration(format!("No Craigslist site for '{location}'"))
        })?;
        let query = utf8_percent_encode(keyword.unwrap_or(""), NON_ALPHANUMERIC);
        let url = format!("https://{site}.craigslist.org/search/jjj?query={query}");

        let rows = parse_results(&self.client.get_html(&url).await?);
        tracing::debug!(site = %site, rows = rows.len(), "Craigslist results parsed");

        let mut drafts = Vec::with_capacity(rows.len());
        for row in rows {
            match self.client.get_html(&row.url).await {
                Ok(html) => drafts.push(Self::draft(row, parse_posting(&html), location)),
                Err(e) => tracing::warn!(id = %row.id, "Skipping Craigslist posting: {e}"),
            }
        }
        Ok(drafts)
    }
}
