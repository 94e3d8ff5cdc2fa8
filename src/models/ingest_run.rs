use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

/// Per-source tallies for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub fetched: i32,
    pub normalized: i32,
    pub discarded: i32,
    pub created: i32,
    pub updated: i32,
    pub failed: i32,
}

impl RunCounts {
    pub fn changed(&self) -> bool {
        self.created > 0 || self.updated > 0
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct IngestRun {
    pub id: i32,
    pub source: String,
    pub location: String,
    pub keyword: Option<String>,
    pub status: String,
    pub fetched: i32,
    pub normalized: i32,
    pub discarded: i32,
    pub created: i32,
    pub updated: i32,
    pub failed: i32,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl IngestRun {
    /// Open a run in the `running` state.
    pub async fn start(
        pool: &PgPool,
        source: &str,
        location: &str,
        keyword: Option<&str>,
    ) -> Result<IngestRun, sqlx::Error> {
        sqlx::query_as::<_, IngestRun>(
            "INSERT INTO ingest_runs (source, location, keyword) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(source)
        .bind(location)
        .bind(keyword)
        .fetch_one(pool)
        .await
    }

    /// Close a run with its counts. A run with an error is recorded as failed.
    pub async fn finish(
        pool: &PgPool,
        id: i32,
        counts: &RunCounts,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let status = if error.is_some() { "failed" } else { "succeeded" };
        sqlx::query(
            "UPDATE ingest_runs SET status = $2, fetched = $3, normalized = $4, discarded = $5, created = $6, updated = $7, failed = $8, error = $9, finished_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(counts.fetched)
        .bind(counts.normalized)
        .bind(counts.discarded)
        .bind(counts.created)
        .bind(counts.updated)
        .bind(counts.failed)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Fail any run a crashed process left in `running`.
    pub async fn recover_stale(pool: &PgPool, source: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE ingest_runs SET status = 'failed', error = 'abandoned by a previous process', finished_at = NOW() WHERE source = $1 AND status = 'running'",
        )
        .bind(source)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn recent(
        pool: &PgPool,
        source: Option<&str>,
        limit: i64,
    ) -> Result<Vec<IngestRun>, sqlx::Error> {
        sqlx::query_as::<_, IngestRun>(
            "SELECT * FROM ingest_runs WHERE ($1::text IS NULL OR source = $1) ORDER BY started_at DESC LIMIT $2",
        )
        .bind(source)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
