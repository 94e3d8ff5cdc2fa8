use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, State};
use axum::http::{Extensions, HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::geocode::Address;
use crate::models::job::{EmploymentType, JobSource, JobStatus, NewJobPosting};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmissionRequest {
    pub title: String,
    pub company: String,
    pub description: Option<String>,
    pub application_url: Option<String>,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub employment_type: Option<String>,
    pub pay_min: Option<i32>,
    pub pay_max: Option<i32>,
    pub pay_currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub id: Uuid,
    pub source_id: String,
    pub status: JobStatus,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: &str, name: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::BadRequest(format!("{name} is required")));
    }
    Ok(value.to_string())
}

/// Throttling key: the peer address, or the first `X-Forwarded-For` hop when
/// the proxy in front is trusted to set it.
fn client_key(headers: &HeaderMap, extensions: &Extensions, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for
        && let Some(ip) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    {
        return ip.to_string();
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// POST /api/v1/submissions
///
/// Employer-submitted posting. The address must geocode; the posting is
/// stored as `manual` and waits for moderation.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
    Json(input): Json<SubmissionRequest>,
) -> Result<(StatusCode, Json<SubmissionResponse>), AppError> {
    let client = client_key(&headers, &extensions, state.trust_forwarded_for);
    if !state.submissions.allow(&client).await {
        tracing::info!(client = %client, "Submission rate limited");
        return Err(AppError::TooManyRequests);
    }

    let title = required(&input.title, "title")?;
    let company = required(&input.company, "company")?;
    let employment_type = trimmed(input.employment_type)
        .map(|raw| raw.parse::<EmploymentType>())
        .transpose()
        .map_err(AppError::BadRequest)?;
    if let (Some(min), Some(max)) = (input.pay_min, input.pay_max)
        && min > max
    {
        return Err(AppError::BadRequest(
            "pay_min must not exceed pay_max".to_string(),
        ));
    }
    if input.pay_min.is_some_and(|p| p < 0) || input.pay_max.is_some_and(|p| p < 0) {
        return Err(AppError::BadRequest("pay must not be negative".to_string()));
    }

    let address = Address {
        street: Some(required(&input.street, "street")?),
        city: Some(required(&input.city, "city")?),
        state: Some(required(&input.state, "state")?),
        postal_code: trimmed(input.postal_code),
        country: trimmed(input.country),
    };
    let coordinate = match state.resolver.forward(&address).await {
        Ok(point) => point,
        Err(e) if e.is_not_found() => {
            return Err(AppError::Unprocessable(
                "Address could not be located".to_string(),
            ));
        }
        Err(e) => {
            tracing::warn!(address = %address.query_text(), "Submission geocode failed: {e}");
            return Err(AppError::Unprocessable(
                "Address could not be verified, try again later".to_string(),
            ));
        }
    };

    let has_pay = input.pay_min.is_some() || input.pay_max.is_some();
    let posting = NewJobPosting {
        source: JobSource::Manual,
        source_id: Uuid::new_v4().to_string(),
        title,
        company,
        description: trimmed(input.description),
        application_url: trimmed(input.application_url),
        country: Some(
            address
                .country
                .clone()
                .unwrap_or_else(|| state.resolver.default_country().to_string())
                .to_uppercase(),
        ),
        street: address.street,
        city: address.city,
        state: address.state,
        postal_code: address.postal_code,
        latitude: coordinate.lat,
        longitude: coordinate.lon,
        employment_type,
        pay_min: input.pay_min,
        pay_max: input.pay_max,
        pay_currency: has_pay.then(|| {
            trimmed(input.pay_currency)
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| "USD".to_string())
        }),
        posted_at: Some(chrono::Utc::now()),
        status: Some(JobStatus::Pending),
    };

    let (stored, _) = state.engine.upsert(&posting).await?;
    tracing::info!(id = %stored.id, client = %client, "Accepted employer submission");
    Ok((
        StatusCode::CREATED,
        Json(SubmissionResponse {
            id: stored.id,
            source_id: stored.source_id,
            status: stored.status,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::cache::ReadThroughCache;
    use crate::geocode::PlaceKind;
    use crate::models::job::JobStatus;
    use crate::routes::api::router;
    use crate::store::memory::MemoryJobStore;
    use crate::testing::{FakeGeocoder, app_state, candidate, read_json};

    const LOCATED: &str = "77 Oak Ave, Tempe, AZ, 85281, us";

    fn body(street: &str) -> serde_json::Value {
        json!({
            "title": "Line Cook",
            "company": "Desert Diner",
            "street": street,
            "city": "Tempe",
            "state": "AZ",
            "postal_code": "85281",
            "employment_type": "part-time",
            "pay_min": 30000,
            "pay_max": 38000
        })
    }

    fn post(payload: &serde_json::Value, client: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/submissions")
            .header("content-type", "application/json")
            .header("x-forwarded-for", client)
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    fn setup(per_hour: u32) -> (Arc<MemoryJobStore>, axum::Router) {
        setup_with(per_hour, true)
    }

    fn setup_with(per_hour: u32, trust_forwarded_for: bool) -> (Arc<MemoryJobStore>, axum::Router) {
        let provider = Arc::new(FakeGeocoder::default());
        provider.add_forward(
            LOCATED,
            vec![candidate(PlaceKind::Address, 33.41, -111.93, Some("77 Oak Ave"))],
        );
        let store = Arc::new(MemoryJobStore::default());
        let state = app_state(store.clone(), provider, ReadThroughCache::disabled(), per_hour)
            .trusting_forwarded_for(trust_forwarded_for);
        let app = router(state);
        (store, app)
    }

    #[tokio::test]
    async fn accepted_submission_waits_for_moderation() {
        let (store, app) = setup(5);
        let resp = app
            .oneshot(post(&body("77 Oak Ave"), "203.0.113.9"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(read_json(resp).await["status"], "pending");

        let stored = store.all();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].source, "manual");
        assert_eq!(stored[0].status, JobStatus::Pending);
        assert_eq!((stored[0].latitude, stored[0].longitude), (33.41, -111.93));
        assert_eq!(stored[0].country.as_deref(), Some("US"));
        assert_eq!(stored[0].pay_currency.as_deref(), Some("USD"));
    }

    #[tokio::test]
    async fn unlocatable_address_is_unprocessable() {
        let (store, app) = setup(5);
        let resp = app
            .oneshot(post(&body("1 Nowhere Rd"), "203.0.113.9"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(store.all().is_empty());
    }

    #[tokio::test]
    async fn missing_fields_are_bad_requests() {
        let (_, app) = setup(5);
        let mut payload = body("77 Oak Ave");
        payload["title"] = json!("  ");
        let resp = app.oneshot(post(&payload, "203.0.113.9")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn clients_are_throttled_independently() {
        let (_, app) = setup(2);
        for _ in 0..2 {
            let resp = app
                .clone()
                .oneshot(post(&body("77 Oak Ave"), "198.51.100.1"))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::CREATED);
        }
        let resp = app
            .clone()
            .oneshot(post(&body("77 Oak Ave"), "198.51.100.1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

        let resp = app
            .oneshot(post(&body("77 Oak Ave"), "198.51.100.2, 10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    fn from_peer(client: &str, peer: [u8; 4]) -> Request<Body> {
        let mut req = post(&body("77 Oak Ave"), client);
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 40000))));
        req
    }

    #[tokio::test]
    async fn rotating_forwarded_for_does_not_evade_the_limit() {
        let (_, app) = setup_with(1, false);
        let resp = app
            .clone()
            .oneshot(from_peer("198.51.100.1", [192, 0, 2, 7]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let resp = app
            .clone()
            .oneshot(from_peer("198.51.100.2", [192, 0, 2, 7]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

        let resp = app
            .oneshot(from_peer("198.51.100.2", [192, 0, 2, 8]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }
}
