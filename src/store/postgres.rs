use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{JobStore, StoreError, SuggestionKind};
use crate::geocode::{Address, Coordinate, GeocodeCache};
use crate::models::geocode_cache::GeocodeCacheEntry;
use crate::models::ingest_run::{IngestRun, RunCounts};
use crate::models::job::{JobPin, JobPosting, JobStatus, NewJobPosting, UpsertOutcome};
use crate::search::{SearchPage, SearchQuery};

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PinRow {
    #[sqlx(flatten)]
    pin: JobPin,
    total_count: i64,
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn upsert(
        &self,
        posting: &NewJobPosting,
    ) -> Result<(JobPosting, UpsertOutcome), StoreError> {
        Ok(JobPosting::upsert(&self.pool, posting).await?)
    }

    async fn get_visible(&self, id: Uuid) -> Result<Option<JobPosting>, StoreError> {
        Ok(JobPosting::get_visible(&self.pool, id).await?)
    }

    async fn set_status(
        &self,
        source: &str,
        source_id: &str,
        status: JobStatus,
    ) -> Result<Option<JobPosting>, StoreError> {
        Ok(JobPosting::set_status(&self.pool, source, source_id, status).await?)
    }

    async fn set_status_by_id(&self, id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        Ok(JobPosting::set_status_by_id(&self.pool, id, status).await?)
    }

    async fn relocate(
        &self,
        id: Uuid,
        coordinate: Coordinate,
        address: &Address,
    ) -> Result<(), StoreError> {
        Ok(JobPosting::relocate(&self.pool, id, coordinate, address).await?)
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, StoreError> {
        let mut qb = query.to_sql();
        let rows: Vec<PinRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        let count = rows.first().map(|r| r.total_count).unwrap_or(0);
        Ok(SearchPage {
            jobs: rows.into_iter().map(|r| r.pin).collect(),
            count,
        })
    }

    async fn suggest(
        &self,
        kind: SuggestionKind,
        text: &str,
        limit: i64,
    ) -> Result<Vec<String>, StoreError> {
        Ok(JobPosting::suggest(&self.pool, kind, text, limit).await?)
    }

    async fn coordinate_clusters(
        &self,
        decimals: i32,
        min_size: i64,
    ) -> Result<Vec<Vec<JobPosting>>, StoreError> {
        Ok(JobPosting::coordinate_clusters(&self.pool, decimals, min_size).await?)
    }

    async fn start_run(
        &self,
        source: &str,
        location: &str,
        keyword: Option<&str>,
    ) -> Result<i32, StoreError> {
        let run = IngestRun::start(&self.pool, source, location, keyword).await?;
        Ok(run.id)
    }

    async fn finish_run(
        &self,
        id: i32,
        counts: &RunCounts,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        Ok(IngestRun::finish(&self.pool, id, counts, error).await?)
    }

    async fn recover_stale_runs(&self, source: &str) -> Result<u64, StoreError> {
        Ok(IngestRun::recover_stale(&self.pool, source).await?)
    }

    async fn recent_runs(
        &self,
        source: Option<&str>,
        limit: i64,
    ) -> Result<Vec<IngestRun>, StoreError> {
        Ok(IngestRun::recent(&self.pool, source, limit).await?)
    }
}

/// Geocode results persisted in the `geocode_cache` table.
#[derive(Clone)]
pub struct PgGeocodeCache {
    pool: PgPool,
}

impl PgGeocodeCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GeocodeCache for PgGeocodeCache {
    async fn get(&self, key: &str) -> Result<Option<Coordinate>, StoreError> {
        let entry = GeocodeCacheEntry::get(&self.pool, key).await?;
        Ok(entry.map(|e| Coordinate::new(e.latitude, e.longitude)))
    }

    async fn put(&self, key: &str, coordinate: Coordinate) -> Result<(), StoreError> {
        Ok(GeocodeCacheEntry::put(&self.pool, key, coordinate.lat, coordinate.lon).await?)
    }
}
