pub mod admin;
pub mod jobs;
pub mod submissions;
pub mod suggestions;

use axum::Router;
use axum::routing::{get, post, put};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // Map search and detail
        .route("/jobs/search", get(jobs::search))
        .route("/jobs/{id}", get(jobs::get))
        .route("/suggestions", get(suggestions::list))
        // Employer submissions
        .route("/submissions", post(submissions::create))
        // Moderation and operations
        .route(
            "/admin/jobs/{source}/{source_id}/status",
            put(admin::set_status),
        )
        .route("/admin/cache/invalidate", post(admin::invalidate_cache))
        .route("/admin/runs", get(admin::runs))
        .with_state(state);

    Router::new().nest("/api/v1", api)
}
