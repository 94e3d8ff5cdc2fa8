//! Storage port for canonical postings and run audit rows.

#[cfg(test)]
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::geocode::{Address, Coordinate};
use crate::models::ingest_run::{IngestRun, RunCounts};
use crate::models::job::{JobPosting, JobStatus, NewJobPosting, UpsertOutcome};
use crate::search::{SearchPage, SearchQuery};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Title,
    Company,
}

impl SuggestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionKind::Title => "title",
            SuggestionKind::Company => "company",
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    /// Atomic insert-or-update keyed by `(source, source_id)`.
    /// Returns the stored row and whether it was created, changed or left as-is.
    async fn upsert(
        &self,
        posting: &NewJobPosting,
    ) -> Result<(JobPosting, UpsertOutcome), StoreError>;

    /// Fetch a posting only if it is approved and has a street.
    async fn get_visible(&self, id: Uuid) -> Result<Option<JobPosting>, StoreError>;

    async fn set_status(
        &self,
        source: &str,
        source_id: &str,
        status: JobStatus,
    ) -> Result<Option<JobPosting>, StoreError>;

    async fn set_status_by_id(&self, id: Uuid, status: JobStatus) -> Result<(), StoreError>;

    /// Move a posting to a new coordinate and address.
    async fn relocate(
        &self,
        id: Uuid,
        coordinate: Coordinate,
        address: &Address,
    ) -> Result<(), StoreError>;

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, StoreError>;

    async fn suggest(
        &self,
        kind: SuggestionKind,
        text: &str,
        limit: i64,
    ) -> Result<Vec<String>, StoreError>;

    /// Approved postings grouped by coordinate rounded to `decimals` places,
    /// only groups with at least `min_size` members.
    async fn coordinate_clusters(
        &self,
        decimals: i32,
        min_size: i64,
    ) -> Result<Vec<Vec<JobPosting>>, StoreError>;

    async fn start_run(
        &self,
        source: &str,
        location: &str,
        keyword: Option<&str>,
    ) -> Result<i32, StoreError>;

    async fn finish_run(
        &self,
        id: i32,
        counts: &RunCounts,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn recover_stale_runs(&self, source: &str) -> Result<u64, StoreError>;

    async fn recent_runs(
        &self,
        source: Option<&str>,
        limit: i64,
    ) -> Result<Vec<IngestRun>, StoreError>;
}
