//! Fakes shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{TimeZone, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::cache::ReadThroughCache;
use crate::geocode::{
    Address, Candidate, Coordinate, ForwardQuery, GeocodeCache, GeocodeError, GeocodeResolver,
    GeocodingProvider, PlaceKind,
};
use crate::models::job::{JobSource, NewJobPosting};
use crate::rate_limit::RateLimiter;
use crate::state::AppState;
use crate::store::StoreError;
use crate::store::memory::MemoryJobStore;

pub fn candidate(kind: PlaceKind, lat: f64, lon: f64, street: Option<&str>) -> Candidate {
    Candidate {
        kind,
        coordinate: Coordinate::new(lat, lon),
        address: Address {
            street: street.map(String::from),
            city: Some("Phoenix".into()),
            state: Some("AZ".into()),
            postal_code: Some("85004".into()),
            country: Some("US".into()),
        },
        relevance: 1.0,
    }
}

type ReverseFn = dyn Fn(Coordinate) -> Vec<Candidate> + Send + Sync;

/// Scripted provider that counts network calls.
#[derive(Default)]
pub struct FakeGeocoder {
    forward: Mutex<HashMap<String, Vec<Candidate>>>,
    failing: Mutex<HashSet<String>>,
    reverse: Mutex<Vec<(Coordinate, Vec<Candidate>)>>,
    reverse_fallback: Mutex<Option<Arc<ReverseFn>>>,
    forward_calls: AtomicUsize,
    reverse_calls: AtomicUsize,
    last_proximity: Mutex<Option<Coordinate>>,
}

impl FakeGeocoder {
    /// Script the candidates for a forward query's text.
    pub fn add_forward(&self, text: &str, candidates: Vec<Candidate>) {
        self.forward
            .lock()
            .unwrap()
            .insert(text.to_string(), candidates);
    }

    /// Make a forward query's text fail as a transient outage.
    pub fn fail_forward(&self, text: &str) {
        self.failing.lock().unwrap().insert(text.to_string());
    }

    pub fn add_reverse(&self, at: Coordinate, candidates: Vec<Candidate>) {
        self.reverse.lock().unwrap().push((at, candidates));
    }

    /// Answer every unscripted reverse lookup with `f`.
    pub fn reverse_with(&self, f: impl Fn(Coordinate) -> Vec<Candidate> + Send + Sync + 'static) {
        *self.reverse_fallback.lock().unwrap() = Some(Arc::new(f));
    }

    pub fn forward_calls(&self) -> usize {
        self.forward_calls.load(Ordering::SeqCst)
    }

    pub fn reverse_calls(&self) -> usize {
        self.reverse_calls.load(Ordering::SeqCst)
    }

    pub fn last_proximity(&self) -> Option<Coordinate> {
        *self.last_proximity.lock().unwrap()
    }
}

#[async_trait]
impl GeocodingProvider for FakeGeocoder {
    async fn forward(&self, query: &ForwardQuery) -> Result<Vec<Candidate>, GeocodeError> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_proximity.lock().unwrap() = query.proximity;
        if self.failing.lock().unwrap().contains(&query.text) {
            return Err(GeocodeError::Transient("scripted outage".into()));
        }
        Ok(self
            .forward
            .lock()
            .unwrap()
            .get(&query.text)
            .cloned()
            .unwrap_or_default())
    }

    async fn reverse(&self, at: Coordinate) -> Result<Vec<Candidate>, GeocodeError> {
        self.reverse_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .reverse
            .lock()
            .unwrap()
            .iter()
            .find(|(point, _)| {
                (point.lat - at.lat).abs() < 1e-9 && (point.lon - at.lon).abs() < 1e-9
            })
            .map(|(_, candidates)| candidates.clone());
        if let Some(candidates) = scripted {
            return Ok(candidates);
        }
        let fallback = self.reverse_fallback.lock().unwrap().clone();
        Ok(fallback.map(|f| f(at)).unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MemoryGeocodeCache {
    entries: Mutex<HashMap<String, Coordinate>>,
    broken: bool,
}

impl MemoryGeocodeCache {
    /// A cache whose every read and write fails.
    pub fn failing() -> Self {
        Self {
            entries: Mutex::default(),
            broken: true,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl GeocodeCache for MemoryGeocodeCache {
    async fn get(&self, key: &str) -> Result<Option<Coordinate>, StoreError> {
        if self.broken {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(self.entries.lock().unwrap().get(key).copied())
    }

    async fn put(&self, key: &str, coordinate: Coordinate) -> Result<(), StoreError> {
        if self.broken {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), coordinate);
        Ok(())
    }
}

pub fn resolver(provider: Arc<FakeGeocoder>) -> GeocodeResolver {
    GeocodeResolver::new(provider, Arc::new(MemoryGeocodeCache::default()), "us")
}

/// A visible posting in downtown Phoenix unless overridden.
pub fn new_posting(source: JobSource, source_id: &str, at: Coordinate) -> NewJobPosting {
    NewJobPosting {
        source,
        source_id: source_id.to_string(),
        title: format!("Title {source_id}"),
        company: format!("Company {source_id}"),
        description: Some("Stocking shelves and helping customers".into()),
        application_url: Some(format!("https://example.com/jobs/{source_id}")),
        street: Some("100 N 1st St".into()),
        city: Some("Phoenix".into()),
        state: Some("AZ".into()),
        postal_code: Some("85004".into()),
        country: Some("US".into()),
        latitude: at.lat,
        longitude: at.lon,
        employment_type: None,
        pay_min: None,
        pay_max: None,
        pay_currency: None,
        posted_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single(),
        status: None,
    }
}

pub fn app_state(
    store: Arc<MemoryJobStore>,
    provider: Arc<FakeGeocoder>,
    cache: ReadThroughCache,
    submissions_per_hour: u32,
) -> AppState {
    AppState::new(
        store,
        Arc::new(resolver(provider)),
        cache,
        Arc::new(RateLimiter::per_hour(submissions_per_hour)),
    )
}

pub async fn read_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Serve `router` on an ephemeral local port; returns its base URL.
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[derive(Clone)]
struct Script {
    replies: Arc<Vec<(StatusCode, Option<&'static str>)>>,
    hits: Arc<AtomicUsize>,
}

async fn scripted_reply(State(script): State<Script>) -> Response {
    let n = script.hits.fetch_add(1, Ordering::SeqCst);
    match script.replies.get(n) {
        Some(&(status, retry_after)) => {
            let mut resp = status.into_response();
            if let Some(value) = retry_after {
                resp.headers_mut().insert(
                    axum::http::header::RETRY_AFTER,
                    axum::http::HeaderValue::from_static(value),
                );
            }
            resp
        }
        None => "<html><body>ok</body></html>".into_response(),
    }
}

/// Server answering every path with `replies` in order (status plus optional
/// `Retry-After`), then `200 ok` once they run out. Returns the base URL and
/// a hit counter.
pub async fn scripted_server(
    replies: Vec<(StatusCode, Option<&'static str>)>,
) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let script = Script {
        replies: Arc::new(replies),
        hits: hits.clone(),
    };
    let router = Router::new().fallback(scripted_reply).with_state(script);
    (serve(router).await, hits)
}

/// Raw TCP server that accepts the first `stalled` connections and never
/// answers them, then answers `200` with `body`. Returns the base URL and a
/// connection counter.
pub async fn stalling_server(stalled: usize, body: &'static str) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                if n < stalled {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    return;
                }
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    concat!(
                        "HTTP/1.1 200 OK\r\n",
                        "content-type: text/html\r\n",
                        "content-length: {}\r\n",
                        "connection: close\r\n\r\n{}",
                    ),
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (format!("http://{addr}"), connections)
}
