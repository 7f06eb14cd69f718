pub mod auth;
pub mod middleware;
pub mod pulls;
mod routes;

use std::sync::Arc;

use axum::Router;

use crate::pulls::creator::PullRequestCreator;
use crate::store::repository::MetadataStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetadataStore>,
    pub pull_creator: Arc<PullRequestCreator>,
}

pub fn create_app(state: AppState) -> Router {
    routes::build_router(state)
}
