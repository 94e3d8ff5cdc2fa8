use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::geocode::{Address, Coordinate};
use crate::store::SuggestionKind;

/// Column list shared by every query that materializes a [`JobPosting`].
/// `geom` is derived by the database and never read back.
pub const JOB_COLUMNS: &str = "id, source, source_id, title, company, description, application_url, \
     street, city, state, postal_code, country, latitude, longitude, employment_type, \
     pay_min, pay_max, pay_currency, posted_at, status, created_at, updated_at";

/// Column list for the lightweight map pin projection.
pub const PIN_COLUMNS: &str = "id, title, company, application_url, latitude, longitude, \
     pay_min, pay_max, posted_at, street, city, state, employment_type, source";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "employment_type", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmploymentType {
    FullTime,
    PartTime,
    Contract,
    Temp,
    Intern,
}

impl EmploymentType {
    pub const ALL: [EmploymentType; 5] = [
        EmploymentType::FullTime,
        EmploymentType::PartTime,
        EmploymentType::Contract,
        EmploymentType::Temp,
        EmploymentType::Intern,
    ];

    /// Database label, as stored in the `employment_type` enum.
    pub fn as_str(&self) -> &'static str {
        match self {
            EmploymentType::FullTime => "full_time",
            EmploymentType::PartTime => "part_time",
            EmploymentType::Contract => "contract",
            EmploymentType::Temp => "temp",
            EmploymentType::Intern => "intern",
        }
    }
}

impl fmt::Display for EmploymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmploymentType {
    type Err = String;

    /// Accepts `full_time`, `FULL_TIME` and `full-time` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        EmploymentType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("Unknown employment type '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Approved,
    Pending,
    Rejected,
}

/// Where a posting came from. Stored as plain text in `job_postings.source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    Adzuna,
    Usajobs,
    Indeed,
    Craigslist,
    Manual,
}

impl JobSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobSource::Adzuna => "adzuna",
            JobSource::Usajobs => "usajobs",
            JobSource::Indeed => "indeed",
            JobSource::Craigslist => "craigslist",
            JobSource::Manual => "manual",
        }
    }

    /// Employer submissions wait for moderation; everything else is live on insert.
    pub fn default_status(&self) -> JobStatus {
        match self {
            JobSource::Manual => JobStatus::Pending,
            _ => JobStatus::Approved,
        }
    }
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adzuna" => Ok(JobSource::Adzuna),
            "usajobs" => Ok(JobSource::Usajobs),
            "indeed" => Ok(JobSource::Indeed),
            "craigslist" => Ok(JobSource::Craigslist),
            "manual" => Ok(JobSource::Manual),
            other => Err(format!("Unknown source '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct JobPosting {
    pub id: Uuid,
    pub source: String,
    pub source_id: String,
    pub title: String,
    pub company: String,
    pub description: Option<String>,
    pub application_url: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub employment_type: Option<EmploymentType>,
    pub pay_min: Option<i32>,
    pub pay_max: Option<i32>,
    pub pay_currency: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobPosting {
    /// Search and detail visibility: approved and carrying a street.
    #[cfg(test)]
    pub fn is_visible(&self) -> bool {
        self.status == JobStatus::Approved
            && self.street.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    #[cfg(test)]
    pub fn to_pin(&self) -> JobPin {
        JobPin {
            id: self.id,
            title: self.title.clone(),
            company: self.company.clone(),
            application_url: self.application_url.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            pay_min: self.pay_min,
            pay_max: self.pay_max,
            posted_at: self.posted_at,
            street: self.street.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            employment_type: self.employment_type,
            source: self.source.clone(),
        }
    }
}

/// Canonical record produced by the normalizer and consumed by the upsert engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJobPosting {
    pub source: JobSource,
    pub source_id: String,
    pub title: String,
    pub company: String,
    pub description: Option<String>,
    pub application_url: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub employment_type: Option<EmploymentType>,
    pub pay_min: Option<i32>,
    pub pay_max: Option<i32>,
    pub pay_currency: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    /// Only set when the caller wants to override moderation state.
    pub status: Option<JobStatus>,
}

impl NewJobPosting {
    /// Status to use when the row does not exist yet.
    pub fn insert_status(&self) -> JobStatus {
        self.status.unwrap_or_else(|| self.source.default_status())
    }
}

/// Lightweight projection returned by map search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobPin {
    pub id: Uuid,
    pub title: String,
    pub company: String,
    #[serde(rename = "url")]
    pub application_url: Option<String>,
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    pub pay_min: Option<i32>,
    pub pay_max: Option<i32>,
    pub posted_at: Option<DateTime<Utc>>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub employment_type: Option<EmploymentType>,
    pub source: String,
}

/// What an upsert did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(sqlx::FromRow)]
struct UpsertRow {
    #[sqlx(flatten)]
    job: JobPosting,
    inserted: bool,
}

impl JobPosting {
    /// Single-statement insert-or-update on `(source, source_id)`.
    ///
    /// The update branch only fires when a mutable field actually differs,
    /// so re-ingesting unchanged input leaves the row (and `updated_at`)
    /// untouched. `status` is only overwritten when explicitly supplied.
    pub async fn upsert(
        pool: &PgPool,
        input: &NewJobPosting,
    ) -> Result<(JobPosting, UpsertOutcome), sqlx::Error> {
        let sql = format!(
            "INSERT INTO job_postings (id, source, source_id, title, company, description, application_url, street, city, state, postal_code, country, latitude, longitude, employment_type, pay_min, pay_max, pay_currency, posted_at, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20) \
             ON CONFLICT (source, source_id) DO UPDATE SET \
                 title = EXCLUDED.title, company = EXCLUDED.company, description = EXCLUDED.description, \
                 application_url = EXCLUDED.application_url, street = EXCLUDED.street, city = EXCLUDED.city, \
                 state = EXCLUDED.state, postal_code = EXCLUDED.postal_code, country = EXCLUDED.country, \
                 latitude = EXCLUDED.latitude, longitude = EXCLUDED.longitude, \
                 employment_type = EXCLUDED.employment_type, pay_min = EXCLUDED.pay_min, pay_max = EXCLUDED.pay_max, \
                 pay_currency = EXCLUDED.pay_currency, posted_at = EXCLUDED.posted_at, \
                 status = COALESCE($21, job_postings.status), updated_at = NOW() \
             WHERE (job_postings.title, job_postings.company, job_postings.description, job_postings.application_url, \
                    job_postings.street, job_postings.city, job_postings.state, job_postings.postal_code, job_postings.country, \
                    job_postings.latitude, job_postings.longitude, job_postings.employment_type, job_postings.pay_min, \
                    job_postings.pay_max, job_postings.pay_currency, job_postings.posted_at, job_postings.status) \
                 IS DISTINCT FROM \
                   (EXCLUDED.title, EXCLUDED.company, EXCLUDED.description, EXCLUDED.application_url, \
                    EXCLUDED.street, EXCLUDED.city, EXCLUDED.state, EXCLUDED.postal_code, EXCLUDED.country, \
                    EXCLUDED.latitude, EXCLUDED.longitude, EXCLUDED.employment_type, EXCLUDED.pay_min, \
                    EXCLUDED.pay_max, EXCLUDED.pay_currency, EXCLUDED.posted_at, COALESCE($21, job_postings.status)) \
             RETURNING {JOB_COLUMNS}, (xmax = 0) AS inserted"
        );
        let row = sqlx::query_as::<_, UpsertRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(input.source.as_str())
            .bind(&input.source_id)
            .bind(&input.title)
            .bind(&input.company)
            .bind(&input.description)
            .bind(&input.application_url)
            .bind(&input.street)
            .bind(&input.city)
            .bind(&input.state)
            .bind(&input.postal_code)
            .bind(&input.country)
            .bind(input.latitude)
            .bind(input.longitude)
            .bind(input.employment_type)
            .bind(input.pay_min)
            .bind(input.pay_max)
            .bind(&input.pay_currency)
            .bind(input.posted_at)
            .bind(input.insert_status())
            .bind(input.status)
            .fetch_optional(pool)
            .await?;

        match row {
            Some(row) if row.inserted => Ok((row.job, UpsertOutcome::Created)),
            Some(row) => Ok((row.job, UpsertOutcome::Updated)),
            // Conflict with nothing to change: the row exists as-is.
            None => {
                let existing = Self::by_identity(pool, input.source.as_str(), &input.source_id)
                    .await?
                    .ok_or(sqlx::Error::RowNotFound)?;
                Ok((existing, UpsertOutcome::Unchanged))
            }
        }
    }

    pub async fn by_identity(
        pool: &PgPool,
        source: &str,
        source_id: &str,
    ) -> Result<Option<JobPosting>, sqlx::Error> {
        sqlx::query_as::<_, JobPosting>(&format!(
            "SELECT {JOB_COLUMNS} FROM job_postings WHERE source = $1 AND source_id = $2"
        ))
        .bind(source)
        .bind(source_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn get_visible(pool: &PgPool, id: Uuid) -> Result<Option<JobPosting>, sqlx::Error> {
        sqlx::query_as::<_, JobPosting>(&format!(
            "SELECT {JOB_COLUMNS} FROM job_postings WHERE id = $1 AND status = 'approved' AND street IS NOT NULL AND btrim(street) <> ''"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn set_status(
        pool: &PgPool,
        source: &str,
        source_id: &str,
        status: JobStatus,
    ) -> Result<Option<JobPosting>, sqlx::Error> {
        sqlx::query_as::<_, JobPosting>(&format!(
            "UPDATE job_postings SET status = $3, updated_at = NOW() WHERE source = $1 AND source_id = $2 RETURNING {JOB_COLUMNS}"
        ))
        .bind(source)
        .bind(source_id)
        .bind(status)
        .fetch_optional(pool)
        .await
    }

    pub async fn set_status_by_id(
        pool: &PgPool,
        id: Uuid,
        status: JobStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE job_postings SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// `geom` follows the new coordinate automatically (generated column).
    pub async fn relocate(
        pool: &PgPool,
        id: Uuid,
        at: Coordinate,
        address: &Address,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE job_postings SET latitude = $2, longitude = $3, street = $4, city = COALESCE($5, city), state = COALESCE($6, state), postal_code = COALESCE($7, postal_code), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(at.lat)
        .bind(at.lon)
        .bind(&address.street)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.postal_code)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Distinct titles or companies of visible postings containing `text`.
    pub async fn suggest(
        pool: &PgPool,
        kind: SuggestionKind,
        text: &str,
        limit: i64,
    ) -> Result<Vec<String>, sqlx::Error> {
        let column = match kind {
            SuggestionKind::Title => "title",
            SuggestionKind::Company => "company",
        };
        let rows: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT DISTINCT {column} FROM job_postings WHERE status = 'approved' AND street IS NOT NULL AND btrim(street) <> '' AND {column} ILIKE $1 ORDER BY {column} LIMIT $2"
        ))
        .bind(crate::search::predicate::like_pattern(text))
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Approved postings sharing a coordinate (rounded to `decimals`).
    pub async fn coordinate_clusters(
        pool: &PgPool,
        decimals: i32,
        min_size: i64,
    ) -> Result<Vec<Vec<JobPosting>>, sqlx::Error> {
        let groups: Vec<(Vec<Uuid>,)> = sqlx::query_as(
            "SELECT array_agg(id ORDER BY id) FROM job_postings WHERE status = 'approved' GROUP BY round(latitude::numeric, $1), round(longitude::numeric, $1) HAVING COUNT(*) >= $2 ORDER BY COUNT(*) DESC",
        )
        .bind(decimals)
        .bind(min_size)
        .fetch_all(pool)
        .await?;

        let mut clusters = Vec::with_capacity(groups.len());
        for (ids,) in groups {
            let members = sqlx::query_as::<_, JobPosting>(&format!(
                "SELECT {JOB_COLUMNS} FROM job_postings WHERE id = ANY($1) ORDER BY id"
            ))
            .bind(&ids)
            .fetch_all(pool)
            .await?;
            clusters.push(members);
        }
        Ok(clusters)
    }
}
