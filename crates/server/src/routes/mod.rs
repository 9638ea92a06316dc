// crates/server/src/routes/mod.rs
//! API route modules.

pub mod health;
pub mod jobs;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Assemble all API routes under `/api`.
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest(
            "/api",
            Router::new().merge(health::router()).merge(jobs::router()),
        )
        .with_state(state)
}
