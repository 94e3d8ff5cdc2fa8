//! Bounding-box search with optional filters.

pub mod predicate;

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};

use crate::models::job::{EmploymentType, JobPin, PIN_COLUMNS};
use crate::store::{JobStore, StoreError};

pub use predicate::{BoundingBox, Predicate};

pub const DEFAULT_LIMIT: i64 = 200;
pub const MAX_LIMIT: i64 = 500;

/// Raw query-string parameters. Everything is a string so that malformed
/// input surfaces as a specific validation message.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub bbox: Option<String>,
    pub q: Option<String>,
    pub company: Option<String>,
    #[serde(rename = "minPay", alias = "min_pay")]
    pub min_pay: Option<String>,
    #[serde(rename = "maxAgeDays", alias = "max_age_days")]
    pub max_age_days: Option<String>,
    pub types: Option<String>,
    pub limit: Option<String>,
}

/// Validated search request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilters {
    pub bbox: BoundingBox,
    pub keyword: Option<String>,
    pub company: Option<String>,
    pub min_pay: Option<i32>,
    pub max_age_days: Option<i64>,
    pub types: Vec<EmploymentType>,
    pub limit: i64,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

pub fn parse_bbox(raw: &str) -> Result<BoundingBox, String> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| "bbox must be four numbers: min_lon,min_lat,max_lon,max_lat".to_string())?;
    let [min_lon, min_lat, max_lon, max_lat] = parts[..] else {
        return Err("bbox must be four numbers: min_lon,min_lat,max_lon,max_lat".to_string());
    };
    if ![min_lon, min_lat, max_lon, max_lat].iter().all(|v| v.is_finite()) {
        return Err("bbox values must be finite".to_string());
    }
    if !(-180.0..=180.0).contains(&min_lon) || !(-180.0..=180.0).contains(&max_lon) {
        return Err("bbox longitude must be within [-180, 180]".to_string());
    }
    if !(-90.0..=90.0).contains(&min_lat) || !(-90.0..=90.0).contains(&max_lat) {
        return Err("bbox latitude must be within [-90, 90]".to_string());
    }
    if min_lon > max_lon || min_lat > max_lat {
        return Err("bbox minimum must not exceed maximum".to_string());
    }
    Ok(BoundingBox {
        min_lon,
        min_lat,
        max_lon,
        max_lat,
    })
}

pub fn parse_types(raw: &str) -> Result<Vec<EmploymentType>, String> {
    let mut types = raw
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::parse::<EmploymentType>)
        .collect::<Result<Vec<_>, _>>()?;
    types.sort();
    types.dedup();
    Ok(types)
}

impl SearchParams {
    pub fn validate(&self) -> Result<SearchFilters, String> {
        let bbox = self
            .bbox
            .as_deref()
            .ok_or_else(|| "bbox is required".to_string())
            .and_then(parse_bbox)?;

        let min_pay = match non_blank(&self.min_pay) {
            Some(raw) => {
                let value: i32 = raw
                    .parse()
                    .map_err(|_| "minPay must be a whole number".to_string())?;
                if value < 0 {
                    return Err("minPay must not be negative".to_string());
                }
                Some(value)
            }
            None => None,
        };

        let max_age_days = match non_blank(&self.max_age_days) {
            Some(raw) => {
                let value: i64 = raw
                    .parse()
                    .map_err(|_| "maxAgeDays must be a whole number".to_string())?;
                if !(1..=3650).contains(&value) {
                    return Err("maxAgeDays must be between 1 and 3650".to_string());
                }
                Some(value)
            }
            None => None,
        };

        let types = match non_blank(&self.types) {
            Some(raw) => parse_types(&raw)?,
            None => Vec::new(),
        };

        let limit = match non_blank(&self.limit) {
            Some(raw) => {
                let value: i64 = raw
                    .parse()
                    .map_err(|_| "limit must be a whole number".to_string())?;
                if value < 1 {
                    return Err("limit must be at least 1".to_string());
                }
                value.min(MAX_LIMIT)
            }
            None => DEFAULT_LIMIT,
        };

        Ok(SearchFilters {
            bbox,
            keyword: non_blank(&self.q),
            company: non_blank(&self.company),
            min_pay,
            max_age_days,
            types,
            limit,
        })
    }
}

impl SearchFilters {
    pub fn has_optional_filters(&self) -> bool {
        self.keyword.is_some()
            || self.company.is_some()
            || self.min_pay.is_some()
            || self.max_age_days.is_some()
            || !self.types.is_empty()
    }

    /// Stable cache key: parameter names sorted, text lower-cased, types sorted.
    pub fn cache_key(&self) -> String {
        let mut params: BTreeMap<&str, String> = BTreeMap::new();
        let b = &self.bbox;
        params.insert(
            "bbox",
            format!("{},{},{},{}", b.min_lon, b.min_lat, b.max_lon, b.max_lat),
        );
        if let Some(q) = &self.keyword {
            params.insert("q", q.to_lowercase());
        }
        if let Some(company) = &self.company {
            params.insert("company", company.to_lowercase());
        }
        if let Some(min_pay) = self.min_pay {
            params.insert("minPay", min_pay.to_string());
        }
        if let Some(days) = self.max_age_days {
            params.insert("maxAgeDays", days.to_string());
        }
        if !self.types.is_empty() {
            let labels: Vec<&str> = self.types.iter().map(|t| t.as_str()).collect();
            params.insert("types", labels.join(","));
        }
        params.insert("limit", self.limit.to_string());

        let joined = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("search:{joined}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub predicates: Vec<Predicate>,
    pub limit: i64,
}

impl SearchQuery {
    pub fn from_filters(filters: &SearchFilters, now: DateTime<Utc>) -> SearchQuery {
        let mut predicates = vec![Predicate::WithinBounds(filters.bbox)];
        if let Some(keyword) = &filters.keyword {
            predicates.push(Predicate::Keyword(keyword.clone()));
        }
        if let Some(company) = &filters.company {
            predicates.push(Predicate::Company(company.clone()));
        }
        if let Some(min_pay) = filters.min_pay {
            predicates.push(Predicate::MinPay(min_pay));
        }
        if let Some(days) = filters.max_age_days {
            predicates.push(Predicate::PostedSince(now - Duration::days(days)));
        }
        if !filters.types.is_empty() {
            predicates.push(Predicate::EmploymentTypes(filters.types.clone()));
        }
        predicates.push(Predicate::Approved);
        predicates.push(Predicate::HasStreet);
        SearchQuery {
            predicates,
            limit: filters.limit,
        }
    }

    /// Parameterized SQL: pins plus a window count of all matching rows.
    pub fn to_sql(&self) -> QueryBuilder<'_, Postgres> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {PIN_COLUMNS}, COUNT(*) OVER() AS total_count FROM job_postings WHERE "
        ));
        for (i, predicate) in self.predicates.iter().enumerate() {
            if i > 0 {
                qb.push(" AND ");
            }
            predicate.push_sql(&mut qb);
        }
        qb.push(" ORDER BY posted_at DESC NULLS LAST, id ASC LIMIT ");
        qb.push_bind(self.limit);
        qb
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub jobs: Vec<JobPin>,
    /// Total matching rows, independent of the limit.
    pub count: i64,
}

pub async fn search(
    store: &dyn JobStore,
    filters: &SearchFilters,
) -> Result<SearchPage, StoreError> {
    let query = SearchQuery::from_filters(filters, Utc::now());
    store.search(&query).await
}
