//! In-process [`JobStore`] mirroring the Postgres semantics, for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{JobStore, StoreError, SuggestionKind};
use crate::geocode::{Address, Coordinate};
use crate::models::ingest_run::{IngestRun, RunCounts};
use crate::models::job::{JobPosting, JobStatus, NewJobPosting, UpsertOutcome};
use crate::search::{SearchPage, SearchQuery};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<JobPosting>>,
    runs: Mutex<Vec<IngestRun>>,
}

impl MemoryJobStore {
    pub fn all(&self) -> Vec<JobPosting> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn find(&self, source: &str, source_id: &str) -> Option<JobPosting> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.source == source && j.source_id == source_id)
            .cloned()
    }
}

fn apply(existing: &mut JobPosting, p: &NewJobPosting) -> bool {
    let before = existing.clone();
    existing.title = p.title.clone();
    existing.company = p.company.clone();
    existing.description = p.description.clone();
    existing.application_url = p.application_url.clone();
    existing.street = p.street.clone();
    existing.city = p.city.clone();
    existing.state = p.state.clone();
    existing.postal_code = p.postal_code.clone();
    existing.country = p.country.clone();
    existing.latitude = p.latitude;
    existing.longitude = p.longitude;
    existing.employment_type = p.employment_type;
    existing.pay_min = p.pay_min;
    existing.pay_max = p.pay_max;
    existing.pay_currency = p.pay_currency.clone();
    existing.posted_at = p.posted_at;
    if let Some(status) = p.status {
        existing.status = status;
    }
    *existing != before
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert(&self, p: &NewJobPosting) -> Result<(JobPosting, UpsertOutcome), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(existing) = jobs
            .iter_mut()
            .find(|j| j.source == p.source.as_str() && j.source_id == p.source_id)
        {
            let outcome = if apply(existing, p) {
                existing.updated_at = Utc::now();
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Unchanged
            };
            return Ok((existing.clone(), outcome));
        }
        let now = Utc::now();
        let job = JobPosting {
            id: Uuid::new_v4(),
            source: p.source.as_str().to_string(),
            source_id: p.source_id.clone(),
            title: p.title.clone(),
            company: p.company.clone(),
            description: p.description.clone(),
            application_url: p.application_url.clone(),
            street: p.street.clone(),
            city: p.city.clone(),
            state: p.state.clone(),
            postal_code: p.postal_code.clone(),
            country: p.country.clone(),
            latitude: p.latitude,
            longitude: p.longitude,
            employment_type: p.employment_type,
            pay_min: p.pay_min,
            pay_max: p.pay_max,
            pay_currency: p.pay_currency.clone(),
            posted_at: p.posted_at,
            status: p.insert_status(),
            created_at: now,
            updated_at: now,
        };
        jobs.push(job.clone());
        Ok((job, UpsertOutcome::Created))
    }

    async fn get_visible(&self, id: Uuid) -> Result<Option<JobPosting>, StoreError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == id && j.is_visible())
            .cloned())
    }

    async fn set_status(
        &self,
        source: &str,
        source_id: &str,
        status: JobStatus,
    ) -> Result<Option<JobPosting>, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter_mut()
            .find(|j| j.source == source && j.source_id == source_id)
            .map(|j| {
                j.status = status;
                j.updated_at = Utc::now();
                j.clone()
            }))
    }

    async fn set_status_by_id(&self, id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        if let Some(j) = self.jobs.lock().unwrap().iter_mut().find(|j| j.id == id) {
            j.status = status;
            j.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn relocate(
        &self,
        id: Uuid,
        coordinate: Coordinate,
        address: &Address,
    ) -> Result<(), StoreError> {
        if let Some(j) = self.jobs.lock().unwrap().iter_mut().find(|j| j.id == id) {
            j.latitude = coordinate.lat;
            j.longitude = coordinate.lon;
            j.street = address.street.clone();
            if address.city.is_some() {
                j.city = address.city.clone();
            }
            if address.state.is_some() {
                j.state = address.state.clone();
            }
            if address.postal_code.is_some() {
                j.postal_code = address.postal_code.clone();
            }
            j.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, StoreError> {
        let mut matching: Vec<JobPosting> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| query.predicates.iter().all(|p| p.matches(j)))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            let by_date = match (a.posted_at, b.posted_at) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            };
            by_date.then(a.id.cmp(&b.id))
        });
        let count = matching.len() as i64;
        let jobs = matching
            .iter()
            .take(query.limit.max(0) as usize)
            .map(JobPosting::to_pin)
            .collect();
        Ok(SearchPage { jobs, count })
    }

    async fn suggest(
        &self,
        kind: SuggestionKind,
        text: &str,
        limit: i64,
    ) -> Result<Vec<String>, StoreError> {
        let needle = text.to_lowercase();
        let mut values: Vec<String> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.is_visible())
            .map(|j| match kind {
                SuggestionKind::Title => j.title.clone(),
                SuggestionKind::Company => j.company.clone(),
            })
            .filter(|v| v.to_lowercase().contains(&needle))
            .collect();
        values.sort();
        values.dedup();
        values.truncate(limit.max(0) as usize);
        Ok(values)
    }

    async fn coordinate_clusters(
        &self,
        decimals: i32,
        min_size: i64,
    ) -> Result<Vec<Vec<JobPosting>>, StoreError> {
        let factor = 10f64.powi(decimals);
        let mut groups: HashMap<(i64, i64), Vec<JobPosting>> = HashMap::new();
        for job in self.jobs.lock().unwrap().iter() {
            if job.status != JobStatus::Approved {
                continue;
            }
            let key = (
                (job.latitude * factor).round() as i64,
                (job.longitude * factor).round() as i64,
            );
            groups.entry(key).or_default().push(job.clone());
        }
        let mut clusters: Vec<Vec<JobPosting>> = groups
            .into_values()
            .filter(|g| g.len() as i64 >= min_size)
            .map(|mut g| {
                g.sort_by_key(|j| j.id);
                g
            })
            .collect();
        clusters.sort_by_key(|g| std::cmp::Reverse(g.len()));
        Ok(clusters)
    }

    async fn start_run(
        &self,
        source: &str,
        location: &str,
        keyword: Option<&str>,
    ) -> Result<i32, StoreError> {
        let mut runs = self.runs.lock().unwrap();
        let id = runs.len() as i32 + 1;
        runs.push(IngestRun {
            id,
            source: source.to_string(),
            location: location.to_string(),
            keyword: keyword.map(String::from),
            status: "running".to_string(),
            fetched: 0,
            normalized: 0,
            discarded: 0,
            created: 0,
            updated: 0,
            failed: 0,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        });
        Ok(id)
    }

    async fn finish_run(
        &self,
        id: i32,
        counts: &RunCounts,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        if let Some(run) = self.runs.lock().unwrap().iter_mut().find(|r| r.id == id) {
            run.status = if error.is_some() { "failed" } else { "succeeded" }.to_string();
            run.fetched = counts.fetched;
            run.normalized = counts.normalized;
            run.discarded = counts.discarded;
            run.created = counts.created;
            run.updated = counts.updated;
            run.failed = counts.failed;
            run.error = error.map(String::from);
            run.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn recover_stale_runs(&self, source: &str) -> Result<u64, StoreError> {
        let mut recovered = 0;
        for run in self.runs.lock().unwrap().iter_mut() {
            if run.source == source && run.status == "running" {
                run.status = "failed".to_string();
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn recent_runs(
        &self,
        source: Option<&str>,
        limit: i64,
    ) -> Result<Vec<IngestRun>, StoreError> {
        let runs = self.runs.lock().unwrap();
        Ok(runs
            .iter()
            .rev()
            .filter(|r| source.is_none_or(|s| r.source == s))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
