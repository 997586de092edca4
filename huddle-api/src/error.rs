// Signaling error handling

use huddle_sfu::SfuError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

/// Result type for event handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Error reported to the requesting client in a failed ack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new("invalid_request", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<SfuError> for ApiError {
    fn from(err: SfuError) -> Self {
        match &err {
            // Engine details stay in the logs
            SfuError::EngineFailure(source) => {
                error!(error = %source, "Media engine request failed");
                Self::new(err.code(), "Media engine request failed")
            }
            _ => Self::new(err.code(), err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_request(format!("Malformed payload: {err}"))
    }
}
