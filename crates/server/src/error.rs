// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::jobs::JobError;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {0} is not running")]
    WrongState(String),
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::UnknownJob(id) => ApiError::JobNotFound(id),
            JobError::NotRunning(id) => ApiError::WrongState(id),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::MissingField(field) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_details("Missing required field", *field),
            ),
            ApiError::JobNotFound(_) => {
                (StatusCode::NOT_FOUND, ErrorResponse::new(self.to_string()))
            }
            ApiError::WrongState(_) => {
                (StatusCode::CONFLICT, ErrorResponse::new(self.to_string()))
            }
        };
        (status, Json(body)).into_response()
    }
}
