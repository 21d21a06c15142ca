use serde::{Deserialize, Serialize};

/// Message returned to browsers whenever the processing service fails
pub const DOWNSTREAM_FAILURE_MESSAGE: &str = "Error communicating with AI service.";

/// Structured error body: `{message, cause}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayFailure {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl RelayFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(message: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }
}

/// Outcome of relaying a recording to the processing service
#[derive(Debug, Clone, PartialEq)]
pub enum RelayResult {
    /// Downstream JSON payload, verbatim
    Success(serde_json::Value),
    Failure(RelayFailure),
}

impl RelayResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RelayResult::Success(_))
    }
}
