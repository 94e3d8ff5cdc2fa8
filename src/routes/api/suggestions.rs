use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use crate::cache::{SUGGESTION_TTL, suggestion_key};
use crate::error::AppError;
use crate::state::AppState;
use crate::store::SuggestionKind;

const MIN_QUERY_CHARS: usize = 2;
const MAX_SUGGESTIONS: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct SuggestionParams {
    pub q: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<SuggestionKind>,
}

#[derive(Debug, Serialize)]
pub struct SuggestionResponse {
    pub values: Vec<String>,
    pub cached: bool,
}

/// GET /api/v1/suggestions?q=&type=title|company
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<SuggestionParams>,
) -> Result<Json<SuggestionResponse>, AppError> {
    let text = params.q.as_deref().map(str::trim).unwrap_or("");
    if text.chars().count() < MIN_QUERY_CHARS {
        return Err(AppError::BadRequest(format!(
            "q must be at least {MIN_QUERY_CHARS} characters"
        )));
    }
    let kind = params.kind.unwrap_or(SuggestionKind::Title);

    let (values, cached) = state
        .cache
        .get_or_compute(&suggestion_key(kind, text), SUGGESTION_TTL, || {
            state.store.suggest(kind, text, MAX_SUGGESTIONS)
        })
        .await?;
    Ok(Json(SuggestionResponse { values, cached }))
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
    use crate::models::job::JobSource;
    use crate::routes::api::router;
    use crate::store::JobStore;
    use crate::store::memory::MemoryJobStore;
    use crate::testing::{FakeGeocoder, app_state, new_posting, read_json};

    async fn app() -> axum::Router {
        let store = Arc::new(MemoryJobStore::default());
        let titles = [
            ("1", "Forklift Operator"),
            ("2", "Warehouse Lead"),
            ("3", "Forklift Operator"),
        ];
        for (id, title) in titles {
            let mut p = new_posting(JobSource::Adzuna, id, Coordinate::new(33.45, -112.07));
            p.title = title.into();
            store.upsert(&p).await.unwrap();
        }
        let cache = ReadThroughCache::new(Arc::new(MemoryCache::default()));
        router(app_state(store, Arc::new(FakeGeocoder::default()), cache, 5))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn distinct_titles_then_cached() {
        let app = app().await;
        let resp = app.clone().oneshot(get("/api/v1/suggestions?q=fork")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = read_json(resp).await;
        assert_eq!(body["values"], serde_json::json!(["Forklift Operator"]));
        assert_eq!(body["cached"], false);

        let body = read_json(app.oneshot(get("/api/v1/suggestions?q=FORK")).await.unwrap()).await;
        assert_eq!(body["cached"], true);
    }

    #[tokio::test]
    async fn company_suggestions() {
        let body = read_json(
            app()
                .await
                .oneshot(get("/api/v1/suggestions?q=company%202&type=company"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(body["values"], serde_json::json!(["Company 2"]));
    }

    #[tokio::test]
    async fn short_query_is_rejected() {
        let resp = app().await.oneshot(get("/api/v1/suggestions?q=f")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
