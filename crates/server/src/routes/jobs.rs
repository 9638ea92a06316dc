// crates/server/src/routes/jobs.rs
//! Job endpoints (REST + SSE).
//!
//! - `POST /api/jobs/sync`          -- Start a full mailbox migration
//! - `POST /api/jobs/check`         -- Start a credential login-check
//! - `GET  /api/jobs`               -- List all jobs
//! - `GET  /api/jobs/{id}`          -- Get a single job snapshot
//! - `POST /api/jobs/{id}/cancel`   -- Request cancellation
//! - `GET  /api/jobs/{id}/stream`   -- SSE feed of the job's output

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};

use crate::error::ApiError;
use crate::jobs::{JobKind, JobSnapshot, SyncParams};
use crate::state::AppState;

/// Build the jobs sub-router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/sync", post(create_sync))
        .route("/jobs/check", post(create_check))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/stream", get(stream_job))
}

/// POST /api/jobs/sync -- Validate params and start a sync job.
///
/// Input errors are rejected here, before any subprocess is spawned.
async fn create_sync(
    State(state): State<Arc<AppState>>,
    Json(params): Json<SyncParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    create_job(&state, JobKind::Sync, params)
}

/// POST /api/jobs/check -- Start a login-check job (absolute 10s deadline).
async fn create_check(
    State(state): State<Arc<AppState>>,
    Json(params): Json<SyncParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    create_job(&state, JobKind::Check, params)
}

fn create_job(
    state: &AppState,
    kind: JobKind,
    params: SyncParams,
) -> Result<Json<serde_json::Value>, ApiError> {
    let validated = params.validate().map_err(ApiError::MissingField)?;
    let id = state.registry.create(kind, validated);
    Ok(Json(serde_json::json!({ "jobId": id })))
}

/// GET /api/jobs -- Snapshots of all jobs, newest first.
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobSnapshot>> {
    Json(state.registry.list())
}

/// GET /api/jobs/{id} -- Single job snapshot.
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    state
        .registry
        .snapshot(&id)
        .map(Json)
        .ok_or(ApiError::JobNotFound(id))
}

/// POST /api/jobs/{id}/cancel -- Request cancellation.
///
/// Never waits for the process to die; 200 means the termination sequence
/// was initiated.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.cancel(&id)?;
    Ok(Json(serde_json::json!({ "cancelled": true })))
}

/// GET /api/jobs/{id}/stream -- SSE feed of a job's output.
///
/// # Events
///
/// | Event name  | When emitted                                   |
/// |-------------|------------------------------------------------|
/// | `line`      | Raw subprocess output line                     |
/// | `progress`  | Normalized progress snapshot changed           |
/// | `keepalive` | Every 20 seconds while the job runs            |
/// | `done`      | Exactly once, then the stream closes           |
///
/// A late subscriber first receives the buffered replay, then the current
/// progress snapshot, then live events.
async fn stream_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let Some(rx) = state.registry.attach(&id) else {
        return ApiError::JobNotFound(id).into_response();
    };

    let stream = async_stream::stream! {
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            let finished = event.is_done();
            yield Ok::<_, Infallible>(Event::default().event(event.event_name()).data(data));
            if finished {
                break;
            }
        }
    };

    Sse::new(stream).into_response()
}
