mod cache;
mod collectors;
mod config;
mod db;
mod error;
mod geocode;
mod http;
mod models;
mod normalize;
mod rate_limit;
mod routes;
mod search;
mod state;
mod store;
#[cfg(test)]
mod testing;
mod upsert;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use clap::Parser;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::cache::ReadThroughCache;
use crate::cache::memory::MemoryCache;
use crate::cache::redis::RedisCache;
use crate::collectors::runner::{self, IngestOptions, Pipeline};
use crate::config::{Command, Config};
use crate::geocode::GeocodeResolver;
use crate::geocode::mapbox::MapboxGeocoder;
use crate::normalize::Normalizer;
use crate::rate_limit::RateLimiter;
use crate::state::AppState;
use crate::store::JobStore;
use crate::store::postgres::{PgGeocodeCache, PgJobStore};
use crate::upsert::UpsertEngine;
use crate::upsert::collisions::resolve_collisions;

const RATE_LIMIT_SWEEP: Duration = Duration::from_secs(300);

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!("Readiness check failed: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, "not ready")
        }
    }
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("jobmap=info,tower_http=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_cache(config: &Config) -> anyhow::Result<ReadThroughCache> {
    let url = config.cache_url.trim();
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        tracing::info!("Using Redis cache");
        return Ok(ReadThroughCache::new(Arc::new(RedisCache::new(
            url,
            &config.cache_prefix,
        )?)));
    }
    match url {
        "memory" => Ok(ReadThroughCache::new(Arc::new(MemoryCache::default()))),
        "" | "none" | "off" => {
            tracing::info!("Cache disabled");
            Ok(ReadThroughCache::disabled())
        }
        other => anyhow::bail!("Unsupported CACHE_URL '{other}'"),
    }
}

fn build_resolver(config: &Config, pool: &PgPool) -> anyhow::Result<Arc<GeocodeResolver>> {
    let provider = MapboxGeocoder::new(&config.mapbox_token, config.http_timeout())?;
    Ok(Arc::new(GeocodeResolver::new(
        Arc::new(provider),
        Arc::new(PgGeocodeCache::new(pool.clone())),
        config.geocode_country.trim().to_lowercase(),
    )))
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state.clone())
        .merge(routes::api::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(&config.log_format);

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;

    if config.run_migrations {
        tracing::info!("Running database migrations...");
        db::run_migrations(&pool).await?;
        tracing::info!("Migrations complete");
    }

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let resolver = build_resolver(&config, &pool)?;
    let cache = build_cache(&config)?;

    let command = config.resolved_command();
    match &command {
        Command::Serve {
            listen_addr,
            submissions_per_hour,
            trust_forwarded_for,
        } => {
            let submissions = Arc::new(RateLimiter::per_hour(*submissions_per_hour));
            submissions.clone().spawn_sweeper(RATE_LIMIT_SWEEP);
            let state = AppState::new(store, resolver, cache, submissions)
                .trusting_forwarded_for(*trust_forwarded_for);

            let listener = tokio::net::TcpListener::bind(listen_addr).await?;
            tracing::info!("Listening on {listen_addr}");
            axum::serve(
                listener,
                app(state).into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        }
        Command::Ingest {
            sources,
            location,
            keyword,
            max_pages,
            interval,
            source_timeout,
        } => {
            let collectors =
                collectors::build_collectors(&config.collector_settings(*max_pages), sources)?;
            let pipeline = Pipeline {
                normalizer: Normalizer::new(resolver),
                engine: UpsertEngine::new(store.clone()),
                store,
                cache,
            };
            let options = IngestOptions {
                location: location.clone(),
                keyword: keyword.clone(),
                interval: interval.map(Duration::from_secs),
                source_timeout: Duration::from_secs(*source_timeout),
            };
            runner::run(Arc::new(pipeline), collectors, options).await?;
        }
        Command::Maintain { .. } => {
            let policy = command.collision_policy().unwrap_or_default();
            let report = resolve_collisions(store.as_ref(), &resolver, &policy).await?;
            if report.changed() {
                cache.invalidate_all().await;
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
