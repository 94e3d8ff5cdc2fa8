use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};

use crate::models::job::EmploymentType;
#[cfg(test)]
use crate::models::job::JobPosting;

/// Inclusive rectangle in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    #[cfg(test)]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lon..=self.max_lon).contains(&lon) && (self.min_lat..=self.max_lat).contains(&lat)
    }
}

/// One conjunct of a search query. Each variant knows how to render itself
/// as parameterized SQL and how to evaluate itself against a loaded row.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    WithinBounds(BoundingBox),
    /// Case-insensitive substring of title or description.
    Keyword(String),
    /// Case-insensitive substring of company.
    Company(String),
    /// `pay_max >= n OR pay_min >= n`.
    MinPay(i32),
    PostedSince(DateTime<Utc>),
    EmploymentTypes(Vec<EmploymentType>),
    Approved,
    HasStreet,
}

/// Escape LIKE metacharacters so user text only ever matches literally.
pub fn like_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(&needle.to_lowercase()))
}

impl Predicate {
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Predicate::WithinBounds(b) => {
                qb.push("geom && ST_MakeEnvelope(");
                qb.push_bind(b.min_lon);
                qb.push(", ");
                qb.push_bind(b.min_lat);
                qb.push(", ");
                qb.push_bind(b.max_lon);
                qb.push(", ");
                qb.push_bind(b.max_lat);
                qb.push(", 4326)");
            }
            Predicate::Keyword(text) => {
                let pattern = like_pattern(text);
                qb.push("(title ILIKE ");
                qb.push_bind(pattern.clone());
                qb.push(" OR description ILIKE ");
                qb.push_bind(pattern);
                qb.push(")");
            }
            Predicate::Company(text) => {
                qb.push("company ILIKE ");
                qb.push_bind(like_pattern(text));
            }
            Predicate::MinPay(min) => {
                qb.push("(pay_max >= ");
                qb.push_bind(*min);
                qb.push(" OR pay_min >= ");
                qb.push_bind(*min);
                qb.push(")");
            }
            Predicate::PostedSince(since) => {
                qb.push("posted_at >= ");
                qb.push_bind(*since);
            }
            Predicate::EmploymentTypes(types) => {
                let labels: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();
                qb.push("employment_type::text = ANY(");
                qb.push_bind(labels);
                qb.push(")");
            }
            Predicate::Approved => {
                qb.push("status = 'approved'");
            }
            Predicate::HasStreet => {
                qb.push("street IS NOT NULL AND btrim(street) <> ''");
            }
        }
    }

    /// In-memory evaluation mirroring [`push_sql`](Self::push_sql), for the test store.
    #[cfg(test)]
    pub fn matches(&self, job: &JobPosting) -> bool {
        match self {
            Predicate::WithinBounds(b) => b.contains(job.latitude, job.longitude),
            Predicate::Keyword(text) => {
                contains_ci(Some(&job.title), text) || contains_ci(job.description.as_deref(), text)
            }
            Predicate::Company(text) => contains_ci(Some(&job.company), text),
            Predicate::MinPay(min) => {
                job.pay_max.is_some_and(|p| p >= *min) || job.pay_min.is_some_and(|p| p >= *min)
            }
            Predicate::PostedSince(since) => job.posted_at.is_some_and(|p| p >= *since),
            Predicate::EmploymentTypes(types) => job
                .employment_type
                .is_some_and(|t| types.contains(&t)),
            Predicate::Approved => job.status == crate::models::job::JobStatus::Approved,
            Predicate::HasStreet => job
                .street
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty()),
        }
    }
}
