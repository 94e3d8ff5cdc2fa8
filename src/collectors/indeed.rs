use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use scraper::Html;

use crate::collectors::scrape::{ScrapeClient, SelectorList};
use crate::collectors::{JobCollector, JobDraft, SourceError};
use crate::models::job::JobSource;

pub const BASE_URL: &str = "https://www.indeed.com";
const PAGE_SIZE: u32 = 10;

static CARDS: LazyLock<SelectorList> = LazyLock::new(|| {
    SelectorList::new(&["div.job_seen_beacon", "div.cardOutline", "a.tapItem", "td.resultContent"])
});
static JOB_KEY: LazyLock<SelectorList> =
    LazyLock::new(|| SelectorList::new(&["a[data-jk]", "[data-jk]", "a.jcs-JobTitle"]));
static TITLE: LazyLock<SelectorList> = LazyLock::new(|| {
    SelectorList::new(&["h2.jobTitle span[title]", "a.jcs-JobTitle span", "h2.jobTitle"])
});
static COMPANY: LazyLock<SelectorList> = LazyLock::new(|| {
    SelectorList::new(&[
        "[data-testid=company-name]",
        "span.companyName",
        ".company_location .companyName",
    ])
});
static LOCATION: LazyLock<SelectorList> = LazyLock::new(|| {
    SelectorList::new(&[
        "[data-testid=text-location]",
        "div.companyLocation",
        ".company_location div",
    ])
});
static SALARY: LazyLock<SelectorList> = LazyLock::new(|| {
    SelectorList::new(&[
        ".salary-snippet-container",
        "[data-testid=attribute_snippet_testid]",
        ".estimated-salary",
    ])
});

static DETAIL_DESCRIPTION: LazyLock<SelectorList> = LazyLock::new(|| {
    SelectorList::new(&["#jobDescriptionText", ".jobsearch-jobDescriptionText"])
});
static DETAIL_LOCATION: LazyLock<SelectorList> = LazyLock::new(|| {
    SelectorList::new(&[
        "[data-testid=job-location]",
        "[data-testid=inlineHeader-companyLocation]",
        "#jobLocationText",
        ".jobsearch-JobInfoHeader-subtitle > div:last-child",
    ])
});
static DETAIL_JOB_TYPE: LazyLock<SelectorList> = LazyLock::new(|| {
    SelectorList::new(&[
        "[data-testid='Full-time-tile'], [data-testid$='-tile']",
        "#salaryInfoAndJobType",
        ".jobsearch-JobMetadataHeader-item",
    ])
});
static DETAIL_SALARY: LazyLock<SelectorList> = LazyLock::new(|| {
    SelectorList::new(&[
        "#salaryInfoAndJobType span:first-child",
        "[data-testid=jobsearch-OtherJobDetailsContainer] span",
    ])
});

/// One search-result card.
#[derive(Debug, Clone, PartialEq)]
struct Card {
    key: String,
    title: String,
    company: Option<String>,
    location: Option<String>,
    salary: Option<String>,
}

#[derive(Debug, Default, PartialEq)]
struct Detail {
    description: Option<String>,
    location: Option<String>,
    job_type: Option<String>,
    salary: Option<String>,
}

fn parse_cards(html: &str) -> Vec<Card> {
    let doc = Html::parse_document(html);
    CARDS
        .all(doc.root_element())
        .into_iter()
        .filter_map(|card| {
            let key = card
                .value()
                .attr("data-jk")
                .map(String::from)
                .or_else(|| JOB_KEY.attr(card, "data-jk"))?;
            let title = TITLE.text(card)?;
            Some(Card {
                key,
                title,
                company: COMPANY.text(card),
                location: LOCATION.text(card),
                salary: SALARY.text(card).filter(|s| s.contains('$')),
            })
        })
        .collect()
}

fn parse_detail(html: &str) -> Detail {
    let doc = Html::parse_document(html);
    let root = doc.root_element();
    Detail {
        description: DETAIL_DESCRIPTION.text(root),
        location: DETAIL_LOCATION.text(root),
        job_type: DETAIL_JOB_TYPE.text(root),
        salary: DETAIL_SALARY.text(root).filter(|s| s.contains('$')),
    }
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

pub struct Indeed {
    client: ScrapeClient,
    max_pages: u32,
    base_url: String,
}

impl Indeed {
    pub fn new(client: ScrapeClient, base_url: &str, max_pages: u32) -> Self {
        Self {
            client,
            max_pages: max_pages.max(1),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn detail_url(&self, key: &str) -> String {
        format!("{}/viewjob?jk={}", self.base_url, encode(key))
    }

    fn search_url(&self, location: &str, keyword: Option<&str>, page: u32) -> String {
        format!(
            "{}/jobs?q={}&l={}&start={}",
            self.base_url,
            encode(keyword.unwrap_or("")),
            encode(location),
            page * PAGE_SIZE
        )
    }

    fn draft(&self, card: Card, detail: Detail) -> JobDraft {
        let mut draft = JobDraft::new(JobSource::Indeed, card.key.clone(), card.title);
        draft.url = Some(self.detail_url(&card.key));
        draft.company = card.company;
        draft.description = detail.description;
        // The detail header often carries the full street address.
        draft.location_text = detail.location.or(card.location);
        draft.salary_text = detail.salary.or(card.salary);
        draft.employment_type_text = detail.job_type;
        draft
    }
}

#[async_trait]
impl JobCollector for Indeed {
    fn source(&self) -> JobSource {
        JobSource::Indeed
    }

    async fn fetch(
        &self,
        location: &str,
        keyword: Option<&str>,
    ) -> Result<Vec<JobDraft>, SourceError> {
        let mut seen = HashSet::new();
        let mut drafts = Vec::new();

        for page in 0..self.max_pages {
            let url = self.search_url(location, keyword, page);
            let cards = match self.client.get_html(&url).await {
                Ok(html) => parse_cards(&html),
                Err(e) if page == 0 => return Err(e),
                Err(e) => {
                    tracing::warn!(page, "Indeed pagination stopped: {e}");
                    break;
                }
            };
            let fresh: Vec<Card> = cards
                .into_iter()
                .filter(|c| seen.insert(c.key.clone()))
                .collect();
            if fresh.is_empty() {
                break;
            }
            tracing::debug!(page, cards = fresh.len(), "Indeed page parsed");

            for card in fresh {
                match self.client.get_html(&self.detail_url(&card.key)).await {
                    Ok(html) => drafts.push(self.draft(card, parse_detail(&html))),
                    Err(e) => tracing::warn!(jk = %card.key, "Skipping Indeed listing: {e}"),
                }
            }
        }
        Ok(drafts)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::response::{Html as HtmlBody, IntoResponse, Response};
    use axum::{Router, routing::get};

    use super::*;
    use crate::testing::serve;

    fn indeed(base_url: &str) -> Indeed {
        Indeed::new(ScrapeClient::without_delays(Duration::from_secs(5)).unwrap(), base_url, 5)
    }

    const LISTING: &str = r#"
        <html><body><ul class="jobsearch-ResultsList">
          <li><div class="cardOutline"><div class="job_seen_beacon">
            <h2 class="jobTitle"><a class="jcs-JobTitle" data-jk="a1b2c3d4e5f60718"><span title="Forklift Operator">Forklift Operator</span></a></h2>
            <span data-testid="company-name">Acme Logistics</span>
            <div data-testid="text-location">Phoenix, AZ 85043</div>
            <div class="salary-snippet-container">$19 - $23 an hour</div>
          </div></div></li>
          <li><div class="cardOutline"><div class="job_seen_beacon">
            <h2 class="jobTitle"><a class="jcs-JobTitle" data-jk="ffee00112233aabb"><span title="Barista">Barista</span></a></h2>
            <span data-testid="company-name">Daily Grind</span>
            <div data-testid="text-location">Tempe, AZ</div>
            <div data-testid="attribute_snippet_testid">Part-time</div>
          </div></div></li>
          <li><div class="job_seen_beacon"><h2 class="jobTitle">Sponsored without key</h2></div></li>
        </ul></body></html>
    "#;

    const DETAIL: &str = r#"
        <html><body>
          <div data-testid="inlineHeader-companyLocation"><div>4020 W Lower Buckeye Rd, Phoenix, AZ 85009</div></div>
          <div id="salaryInfoAndJobType"><span>$19 - $23 an hour</span><span> - Full-time</span></div>
          <div id="jobDescriptionText"><p>Operate sit-down forklifts.</p><p>Day shift.</p></div>
        </body></html>
    "#;

    #[test]
    fn parses_listing_cards() {
        let cards = parse_cards(LISTING);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].key, "a1b2c3d4e5f60718");
        assert_eq!(cards[0].title, "Forklift Operator");
        assert_eq!(cards[0].company.as_deref(), Some("Acme Logistics"));
        assert_eq!(cards[0].location.as_deref(), Some("Phoenix, AZ 85043"));
        assert_eq!(cards[0].salary.as_deref(), Some("$19 - $23 an hour"));
        // Non-salary attribute snippets are not salaries.
        assert_eq!(cards[1].salary, None);
    }

    #[test]
    fn detail_fills_description_street_and_type() {
        let card = parse_cards(LISTING).remove(0);
        let detail = parse_detail(DETAIL);
        assert_eq!(
            detail.location.as_deref(),
            Some("4020 W Lower Buckeye Rd, Phoenix, AZ 85009")
        );
        assert_eq!(detail.job_type.as_deref(), Some("$19 - $23 an hour - Full-time"));

        let draft = indeed(BASE_URL).draft(card, detail);
        assert_eq!(draft.source, JobSource::Indeed);
        assert_eq!(draft.source_id, "a1b2c3d4e5f60718");
        assert_eq!(
            draft.url.as_deref(),
            Some("https://www.indeed.com/viewjob?jk=a1b2c3d4e5f60718")
        );
        assert_eq!(draft.description.as_deref(), Some("Operate sit-down forklifts. Day shift."));
        assert_eq!(
            draft.location_text.as_deref(),
            Some("4020 W Lower Buckeye Rd, Phoenix, AZ 85009")
        );
        assert_eq!(draft.salary_text.as_deref(), Some("$19 - $23 an hour"));
    }

    #[test]
    fn search_url_encodes_terms() {
        assert_eq!(
            indeed(BASE_URL).search_url("Phoenix, AZ", Some("forklift driver"), 2),
            "https://www.indeed.com/jobs?q=forklift%20driver&l=Phoenix%2C%20AZ&start=20"
        );
    }

    #[derive(Clone, Default)]
    struct FakeSite {
        searches: Arc<Mutex<Vec<String>>>,
        failing_detail: Option<&'static str>,
    }

    async fn search_page(
        State(site): State<FakeSite>,
        Query(params): Query<HashMap<String, String>>,
    ) -> HtmlBody<&'static str> {
        let start = params.get("start").cloned().unwrap_or_default();
        site.searches.lock().unwrap().push(start);
        // Indeed repeats the last page once the results run out.
        HtmlBody(LISTING)
    }

    async fn detail_page(
        State(site): State<FakeSite>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        if params.get("jk").map(String::as_str) == site.failing_detail {
            return StatusCode::NOT_FOUND.into_response();
        }
        HtmlBody(DETAIL).into_response()
    }

    async fn site(failing_detail: Option<&'static str>) -> (String, FakeSite) {
        let site = FakeSite {
            failing_detail,
            ..FakeSite::default()
        };
        let router = Router::new()
            .route("/jobs", get(search_page))
            .route("/viewjob", get(detail_page))
            .with_state(site.clone());
        (serve(router).await, site)
    }

    #[tokio::test]
    async fn repeated_page_ends_pagination() {
        let (base, site) = site(None).await;
        let drafts = indeed(&base).fetch("Phoenix, AZ", None).await.unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(*site.searches.lock().unwrap(), vec!["0", "10"]);
        assert_eq!(
            drafts[0].url.as_deref(),
            Some(format!("{base}/viewjob?jk=a1b2c3d4e5f60718").as_str())
        );
        assert_eq!(
            drafts[0].description.as_deref(),
            Some("Operate sit-down forklifts. Day shift.")
        );
    }

    #[tokio::test]
    async fn failed_detail_page_skips_one_listing() {
        let (base, _) = site(Some("ffee00112233aabb")).await;
        let drafts = indeed(&base).fetch("Phoenix, AZ", None).await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].source_id, "a1b2c3d4e5f60718");
    }
}
