use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use super::result::{RelayFailure, DOWNSTREAM_FAILURE_MESSAGE};
use super::staging::StagingError;

/// Gateway failures, translated to HTTP at the boundary
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("multipart field '{0}' is missing")]
    MissingField(String),

    #[error("malformed multipart request: {0}")]
    Multipart(String),

    #[error("payload exceeds the staging limit of {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("failed to stage upload: {0}")]
    Staging(std::io::Error),

    #[error("downstream responded with status {status}")]
    DownstreamRejected { status: u16 },

    #[error("downstream unreachable: {0}")]
    DownstreamUnreachable(String),

    #[error("downstream timed out")]
    DownstreamTimeout,
}

impl From<StagingError> for RelayError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::TooLarge { limit } => RelayError::PayloadTooLarge { limit },
            StagingError::Io(e) => RelayError::Staging(e),
        }
    }
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::MissingField(_) | RelayError::Multipart(_) => StatusCode::BAD_REQUEST,
            RelayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::Staging(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::DownstreamRejected { .. } | RelayError::DownstreamUnreachable(_) => {
                StatusCode::BAD_GATEWAY
            }
            RelayError::DownstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Client-visible body. Internal and downstream details stay in the logs.
    pub fn failure(&self) -> RelayFailure {
        match self {
            RelayError::MissingField(field) => RelayFailure::with_cause(
                "No file uploaded.",
                format!("missing multipart field '{}'", field),
            ),
            RelayError::Multipart(detail) => {
                RelayFailure::with_cause("Malformed upload request.", detail.clone())
            }
            RelayError::PayloadTooLarge { limit } => RelayFailure::with_cause(
                "Recording is too large.",
                format!("limit is {} bytes", limit),
            ),
            RelayError::Staging(_) => RelayFailure::new("Failed to store upload."),
            RelayError::DownstreamRejected { .. }
            | RelayError::DownstreamUnreachable(_)
            | RelayError::DownstreamTimeout => RelayFailure::new(DOWNSTREAM_FAILURE_MESSAGE),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.failure())).into_response()
    }
}
