// crates/server/src/lib.rs
//! Syncview server library.
//!
//! Axum-based HTTP server supervising imapsync subprocesses: job creation,
//! cancellation, and a live SSE feed of each job's output and progress.

pub mod config;
pub mod error;
pub mod jobs;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ErrorResponse};
pub use jobs::JobRegistry;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// Returns the router and the shared state (the caller needs the registry
/// for shutdown).
pub fn create_app(config: Config) -> (Router, Arc<AppState>) {
    let state = AppState::new(config);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(api_routes(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    (app, state)
}

// ============================================================================
// Integration Tests
// ============================================================================
