//! Offline maintenance for postings stacked on one coordinate.
//!
//! Sources that only know a city (or geocoders that snap to a building
//! centroid) put many postings on the exact same point, which renders as a
//! single unclickable pin. Small stacks are fanned out over nearby offsets,
//! each with its own reverse-geocoded street; large or unresolvable stacks
//! are pulled from search for moderation.

use std::collections::HashSet;

use serde::Serialize;

use crate::geocode::{Coordinate, GeocodeError, GeocodeResolver};
use crate::models::job::{JobPosting, JobStatus};
use crate::store::{JobStore, StoreError};

const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

#[derive(Debug, Clone)]
pub struct CollisionPolicy {
    /// Coordinates are grouped after rounding to this many decimals (~1 m at 5).
    pub decimals: i32,
    pub min_cluster: usize,
    pub demote_above: usize,
    pub spacing_m: f64,
    pub dry_run: bool,
}

impl Default for CollisionPolicy {
    fn default() -> Self {
        Self {
            decimals: 5,
            min_cluster: 3,
            demote_above: 5,
            spacing_m: 75.0,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollisionReport {
    pub clusters: usize,
    pub relocated: usize,
    pub demoted: usize,
    pub dry_run: bool,
}

impl CollisionReport {
    pub fn changed(&self) -> bool {
        !self.dry_run && (self.relocated > 0 || self.demoted > 0)
    }
}

/// The shared point followed by its eight neighbours at `spacing_m`.
pub fn ring_offsets(center: Coordinate, spacing_m: f64) -> Vec<Coordinate> {
    let dlat = spacing_m / METERS_PER_DEGREE_LAT;
    let dlon = spacing_m / (METERS_PER_DEGREE_LAT * center.lat.to_radians().cos().max(0.01));
    [
        (0.0, 0.0),
        (1.0, 0.0),
        (0.0, 1.0),
        (-1.0, 0.0),
        (0.0, -1.0),
        (1.0, 1.0),
        (-1.0, 1.0),
        (-1.0, -1.0),
        (1.0, -1.0),
    ]
    .into_iter()
    .map(|(ns, ew)| Coordinate::new(center.lat + ns * dlat, center.lon + ew * dlon))
    .collect()
}

fn street_key(street: &str) -> String {
    street.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Spread or demote approved postings stacked on one rounded coordinate.
///
/// Relocation is not sticky: the next ingest of a spread posting writes the
/// source's coordinate and street back, so a small cluster reappears until
/// the following pass. Schedule `maintain` after each ingest.
pub async fn resolve_collisions(
    store: &dyn JobStore,
    resolver: &GeocodeResolver,
    policy: &CollisionPolicy,
) -> Result<CollisionReport, StoreError> {
    let clusters = store
        .coordinate_clusters(policy.decimals, policy.min_cluster as i64)
        .await?;
    let mut report = CollisionReport {
        clusters: clusters.len(),
        dry_run: policy.dry_run,
        ..CollisionReport::default()
    };

    for cluster in clusters {
        let Some(first) = cluster.first() else {
            continue;
        };
        let center = Coordinate::new(first.latitude, first.longitude);
        tracing::info!(
            lat = center.lat,
            lon = center.lon,
            size = cluster.len(),
            "Resolving coordinate collision"
        );

        if cluster.len() > policy.demote_above {
            for job in &cluster {
                demote(store, job, policy, "cluster too large").await?;
            }
            report.demoted += cluster.len();
            continue;
        }

        spread(store, resolver, policy, center, &cluster, &mut report).await?;
    }

    tracing::info!(
        clusters = report.clusters,
        relocated = report.relocated,
        demoted = report.demoted,
        dry_run = report.dry_run,
        "Collision maintenance finished"
    );
    Ok(report)
}

async fn spread(
    store: &dyn JobStore,
    resolver: &GeocodeResolver,
    policy: &CollisionPolicy,
    center: Coordinate,
    cluster: &[JobPosting],
    report: &mut CollisionReport,
) -> Result<(), StoreError> {
    let offsets = ring_offsets(center, policy.spacing_m);
    let mut next = 0;
    let mut streets = HashSet::new();

    for job in cluster {
        let mut placed = false;
        while next < offsets.len() && !placed {
            let at = offsets[next];
            next += 1;
            match resolver.reverse(at, false).await {
                Ok(resolved) => {
                    let Some(street) = resolved.address.street.as_deref() else {
                        continue;
                    };
                    if !streets.insert(street_key(street)) {
                        tracing::debug!(
                            id = %job.id,
                            street,
                            "Street already used in cluster, trying next offset"
                        );
                        continue;
                    }
                    if !policy.dry_run {
                        store.relocate(job.id, at, &resolved.address).await?;
                    }
                    tracing::debug!(
                        id = %job.id,
                        lat = at.lat,
                        lon = at.lon,
                        street,
                        "Relocated posting"
                    );
                    report.relocated += 1;
                    placed = true;
                }
                Err(GeocodeError::NotFound) => break,
                Err(e) => {
                    tracing::warn!(
                        id = %job.id,
                        "Reverse geocode failed during collision spread: {e}"
                    );
                    break;
                }
            }
        }
        if !placed {
            demote(store, job, policy, "no distinct street near cluster").await?;
            report.demoted += 1;
        }
    }
    Ok(())
}

async fn demote(
    store: &dyn JobStore,
    job: &JobPosting,
    policy: &CollisionPolicy,
    reason: &str,
) -> Result<(), StoreError> {
    tracing::info!(
        id = %job.id,
        source = %job.source,
        source_id = %job.source_id,
        reason,
        "Demoting posting to pending"
    );
    if !policy.dry_run {
        store.set_status_by_id(job.id, JobStatus::Pending).await?;
    }
    Ok(())
}
