use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::cache::ReadThroughCache;
use crate::collectors::{JobCollector, JobDraft, SourceError};
use crate::models::ingest_run::RunCounts;
use crate::models::job::UpsertOutcome;
use crate::normalize::Normalizer;
use crate::store::JobStore;
use crate::upsert::UpsertEngine;

/// Everything a source run needs after fetching.
pub struct Pipeline {
    pub store: Arc<dyn JobStore>,
    pub normalizer: Normalizer,
    pub engine: UpsertEngine,
    pub cache: ReadThroughCache,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub location: String,
    pub keyword: Option<String>,
    /// Re-run every `interval`; `None` runs once.
    pub interval: Option<Duration>,
    pub source_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    pub source: &'static str,
    pub counts: RunCounts,
    pub error: Option<String>,
}

/// Worker loop: run every collector, optionally on an interval, until
/// interrupted. Recovers stale runs on startup. A single pass fails only
/// when every source failed.
pub async fn run(
    pipeline: Arc<Pipeline>,
    collectors: Vec<Arc<dyn JobCollector>>,
    options: IngestOptions,
) -> anyhow::Result<()> {
    for collector in &collectors {
        let stale = pipeline.store.recover_stale_runs(collector.name()).await?;
        if stale > 0 {
            tracing::warn!("Recovered {stale} stale 'running' runs for '{}'", collector.name());
        }
    }

    let Some(interval) = options.interval else {
        let reports = run_once(&pipeline, &collectors, &options).await;
        let failures: Vec<String> = reports
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {e}", r.source)))
            .collect();
        if !reports.is_empty() && failures.len() == reports.len() {
            anyhow::bail!("Every source failed: {}", failures.join("; "));
        }
        return Ok(());
    };

    tracing::info!(
        sources = collectors.len(),
        "Ingestion worker started, running every {}s",
        interval.as_secs()
    );
    loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received, exiting gracefully");
                break;
            }
            _ = async {
                run_once(&pipeline, &collectors, &options).await;
                tokio::time::sleep(interval).await;
            } => {}
        }
    }
    Ok(())
}

/// One pass over every collector, sources in parallel. Invalidates the
/// read cache when anything was created or changed.
pub async fn run_once(
    pipeline: &Arc<Pipeline>,
    collectors: &[Arc<dyn JobCollector>],
    options: &IngestOptions,
) -> Vec<SourceReport> {
    let mut tasks = JoinSet::new();
    for collector in collectors {
        let pipeline = Arc::clone(pipeline);
        let collector = Arc::clone(collector);
        let options = options.clone();
        tasks.spawn(async move { run_source(&pipeline, collector.as_ref(), &options).await });
    }

    let mut reports = Vec::with_capacity(collectors.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(e) => tracing::error!("Source task panicked: {e}"),
        }
    }

    if reports.iter().any(|r| r.counts.changed()) {
        pipeline.cache.invalidate_all().await;
    }
    reports
}

async fn run_source(
    pipeline: &Pipeline,
    collector: &dyn JobCollector,
    options: &IngestOptions,
) -> SourceReport {
    let source = collector.name();
    let keyword = options.keyword.as_deref();
    let run_id = match pipeline.store.start_run(source, &options.location, keyword).await {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::error!(source, "Failed to record run start: {e}");
            None
        }
    };

    let mut counts = RunCounts::default();
    let outcome = tokio::time::timeout(
        options.source_timeout,
        collect(pipeline, collector, options, &mut counts),
    )
    .await;
    let error = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("timed out after {}s", options.source_timeout.as_secs())),
    };

    match &error {
        None => tracing::info!(
            source,
            fetched = counts.fetched,
            normalized = counts.normalized,
            discarded = counts.discarded,
            created = counts.created,
            updated = counts.updated,
            failed = counts.failed,
            "Source run completed"
        ),
        Some(e) => tracing::error!(
            source,
            created = counts.created,
            updated = counts.updated,
            "Source run failed: {e}"
        ),
    }

    if let Some(id) = run_id
        && let Err(e) = pipeline.store.finish_run(id, &counts, error.as_deref()).await
    {
        tracing::error!(source, run_id = id, "Failed to record run result: {e}");
    }

    SourceReport {
        source,
        counts,
        error,
    }
}

async fn collect(
    pipeline: &Pipeline,
    collector: &dyn JobCollector,
    options: &IngestOptions,
    counts: &mut RunCounts,
) -> Result<(), SourceError> {
    let drafts = collector
        .fetch(&options.location, options.keyword.as_deref())
        .await?;
    counts.fetched = drafts.len() as i32;
    process(pipeline, drafts, counts).await;
    Ok(())
}

/// Drafts are handled one at a time; a failing draft is counted, not fatal.
async fn process(pipeline: &Pipeline, drafts: Vec<JobDraft>, counts: &mut RunCounts) {
    for draft in drafts {
        let posting = match pipeline.normalizer.normalize(&draft).await {
            Ok(Some(posting)) => posting,
            Ok(None) => {
                counts.discarded += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(
                    source = %draft.source,
                    source_id = %draft.source_id,
                    "Normalization failed: {e}"
                );
                counts.failed += 1;
                continue;
            }
        };
        counts.normalized += 1;

        match pipeline.engine.upsert(&posting).await {
            Ok((_, UpsertOutcome::Created)) => counts.created += 1,
            Ok((_, UpsertOutcome::Updated)) => counts.updated += 1,
            Ok((_, UpsertOutcome::Unchanged)) => {}
            Err(e) => {
                tracing::warn!(
                    source = %posting.source,
                    source_id = %posting.source_id,
                    "Failed to upsert posting: {e}"
                );
                counts.failed += 1;
            }
        }
    }
}
