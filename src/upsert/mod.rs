//! Reconciles canonical postings against storage by `(source, source_id)`.

pub mod collisions;

use std::sync::Arc;

use crate::models::job::{JobPosting, JobSource, JobStatus, NewJobPosting, UpsertOutcome};
use crate::store::{JobStore, StoreError};

pub struct UpsertEngine {
    store: Arc<dyn JobStore>,
}

impl UpsertEngine {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Insert or update a posting. An existing row keeps its moderation
    /// status unless `posting.status` is set.
    pub async fn upsert(
        &self,
        posting: &NewJobPosting,
    ) -> Result<(JobPosting, UpsertOutcome), StoreError> {
        let (stored, outcome) = self.store.upsert(posting).await?;
        tracing::debug!(
            source = %posting.source,
            source_id = %posting.source_id,
            id = %stored.id,
            ?outcome,
            "Upserted posting"
        );
        Ok((stored, outcome))
    }

    /// Moderation by source identity. `None` when no such posting exists.
    pub async fn set_status(
        &self,
        source: JobSource,
        source_id: &str,
        status: JobStatus,
    ) -> Result<Option<JobPosting>, StoreError> {
        let updated = self.store.set_status(source.as_str(), source_id, status).await?;
        match &updated {
            Some(job) => tracing::info!(
                source = %source,
                source_id,
                id = %job.id,
                ?status,
                "Moderation status changed"
            ),
            None => tracing::debug!(source = %source, source_id, "Moderation target not found"),
        }
        Ok(updated)
    }
}
