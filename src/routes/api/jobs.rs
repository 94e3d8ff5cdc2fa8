use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use uuid::Uuid;

use crate::cache::search_ttl;
use crate::error::AppError;
use crate::models::job::{JobPin, JobPosting};
use crate::search::{self, SearchPage, SearchParams};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub jobs: Vec<JobPin>,
    pub count: i64,
    pub cached: bool,
}

/// GET /api/v1/jobs/search
///
/// Postings inside `bbox` (min_lon,min_lat,max_lon,max_lat) with optional
/// `q`, `company`, `minPay`, `maxAgeDays`, `types` and `limit`. Served
/// through the read cache; `X-Cache` says whether it was a hit.
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, AppError> {
    let filters = params.validate().map_err(AppError::BadRequest)?;
    let key = filters.cache_key();
    let (page, cached): (SearchPage, bool) = state
        .cache
        .get_or_compute(&key, search_ttl(&filters), || {
            search::search(state.store.as_ref(), &filters)
        })
        .await?;

    let header = if cached { "HIT" } else { "MISS" };
    let body = SearchResponse {
        jobs: page.jobs,
        count: page.count,
        cached,
    };
    Ok(([("x-cache", header)], Json(body)).into_response())
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobPosting>, AppError> {
    let job = state
        .store
        .get_visible(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {id} not found")))?;
    Ok(Json(job))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::cache::ReadThroughCache;
    use crate::cache::memory::MemoryCache;
    use crate::geocode::Coordinate;
    use crate::models::job::{JobSource, JobStatus};
    use crate::routes::api::router;
    use crate::store::JobStore;
    use crate::store::memory::MemoryJobStore;
    use crate::testing::{FakeGeocoder, app_state, new_posting, read_json};

    const PHOENIX: &str = "/api/v1/jobs/search?bbox=-112.2,33.3,-111.9,33.6";

    async fn seeded() -> (Arc<MemoryJobStore>, axum::Router) {
        let store = Arc::new(MemoryJobStore::default());
        let visible = new_posting(JobSource::Adzuna, "1", Coordinate::new(33.45, -112.07));
        store.upsert(&visible).await.unwrap();
        let mut pending = new_posting(JobSource::Manual, "2", Coordinate::new(33.46, -112.08));
        pending.status = Some(JobStatus::Pending);
        store.upsert(&pending).await.unwrap();
        let cache = ReadThroughCache::new(Arc::new(MemoryCache::default()));
        let provider = Arc::new(FakeGeocoder::default());
        let app = router(app_state(store.clone(), provider, cache, 5));
        (store, app)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn second_search_is_a_cache_hit() {
        let (_, app) = seeded().await;

        let resp = app.clone().oneshot(get(PHOENIX)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-cache"], "MISS");
        let body = read_json(resp).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["cached"], false);
        assert_eq!(body["jobs"][0]["source"], "adzuna");
        assert_eq!(body["jobs"][0]["lat"], 33.45);

        let resp = app.oneshot(get(PHOENIX)).await.unwrap();
        assert_eq!(resp.headers()["x-cache"], "HIT");
        let body = read_json(resp).await;
        assert_eq!(body["cached"], true);
        assert_eq!(body["count"], 1);
    }

    #[tokio::test]
    async fn malformed_bbox_is_rejected() {
        let (_, app) = seeded().await;
        let resp = app
            .oneshot(get("/api/v1/jobs/search?bbox=-112.2,33.3,-111.9"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = read_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("bbox"));
    }

    #[tokio::test]
    async fn detail_hides_pending_postings() {
        let (store, app) = seeded().await;
        let visible = store.find("adzuna", "1").unwrap();
        let pending = store.find("manual", "2").unwrap();

        let resp = app
            .clone()
            .oneshot(get(&format!("/api/v1/jobs/{}", visible.id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(read_json(resp).await["source_id"], "1");

        let resp = app
            .oneshot(get(&format!("/api/v1/jobs/{}", pending.id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
