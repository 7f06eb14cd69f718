pub mod handlers;

use axum::Router;
use axum::routing::{get, post};

use crate::api::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/repos/{owner}/{repo}/pulls",
            get(handlers::list_pull_requests),
        )
        // `compare` is `base...[owner:]head`; branch names may contain `/`.
        .route(
            "/repos/{owner}/{repo}/pulls/{*compare}",
            post(handlers::create_pull_request),
        )
}
