//! Error types for the inferd service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

/// A specialized Result type for inferd operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for inferd operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Request shape or parameter validation failures
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Direct response streaming was requested; only lateral streaming is supported
    #[error("Streaming is not supported. Consider using lateral streaming instead.")]
    UnsupportedStreaming,

    /// The selected prompt template requires a message role that is absent
    #[error("Prompt template for '{model}' requires a {role} message")]
    MissingRequiredRole { model: String, role: &'static str },

    /// The generation backend returned a response that violates its contract
    #[error("Invalid response from backend: {0}")]
    BackendContract(String),

    /// Structured (function call) output could not be parsed as JSON
    #[error("Malformed structured output: {0}")]
    MalformedStructuredOutput(String),

    /// The bounded retry budget for self-healing generation ran out
    #[error("Generation failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// The key-value store could not be reached or rejected an operation
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The generation backend answered with a non-success status
    #[error("Backend error ({status}): {message}")]
    BackendRejected { status: u16, message: String },

    /// Transport-level failure talking to the generation backend
    #[error("Backend request failed: {0}")]
    Backend(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

impl Error {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Error::InvalidRequest(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) | Error::MissingRequiredRole { .. } => StatusCode::BAD_REQUEST,
            Error::UnsupportedStreaming => StatusCode::NOT_IMPLEMENTED,
            Error::BackendContract(_)
            | Error::MalformedStructuredOutput(_)
            | Error::RetriesExhausted { .. }
            | Error::BackendRejected { .. }
            | Error::Backend(_) => StatusCode::BAD_GATEWAY,
            Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Config(_) | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::UnsupportedStreaming => "streaming_not_supported",
            Error::MissingRequiredRole { .. } => "missing_required_role",
            Error::BackendContract(_) => "backend_contract_violation",
            Error::MalformedStructuredOutput(_) => "malformed_structured_output",
            Error::RetriesExhausted { .. } => "retries_exhausted",
            Error::StoreUnavailable(_) => "store_unavailable",
            Error::BackendRejected { .. } => "backend_error",
            Error::Backend(_) => "backend_error",
            Error::Config(_) => "config_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": status.as_u16(),
            }
        });
        (status, Json(body)).into_response()
    }
}
