use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::engine::EngineError;
use crate::range::RangeError;
use crate::sampling::SamplingError;
use crate::workspace::WorkspaceError;

/// Failure of one job, as seen by the caller.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Sampling(#[from] SamplingError),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error("invalid query: {0}")]
    Query(String),

    #[error("missing multipart field `{0}`")]
    MissingField(&'static str),

    #[error("invalid upload: {0}")]
    Upload(String),

    #[error("upload exceeds the size limit")]
    TooLarge,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl JobError {
    /// Whether the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            JobError::Sampling(_)
                | JobError::Range(_)
                | JobError::Query(_)
                | JobError::MissingField(_)
                | JobError::Upload(_)
                | JobError::TooLarge
        )
    }
}

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        if matches!(self, JobError::TooLarge) {
            tracing::warn!("Rejected oversized upload");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }

        if self.is_client_error() {
            tracing::warn!("Rejected job request: {}", self);
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": self.to_string() })),
            )
                .into_response();
        }

        // Already logged at the job boundary.
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}
