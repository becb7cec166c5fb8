//! Application error model with HTTP response mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error handling,
//! and maps each variant to an HTTP status code plus a stable `code` string so
//! callers can tell client-class failures from backend-class failures.

use axum::http::StatusCode;
use thiserror::Error;

/// Application error type
///
/// Covers every failure the forwarding service may report. Each variant maps
/// to an HTTP status class and a stable `code` string.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid caller input (missing discriminating field, malformed value)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Missing or rejected bearer credential
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// No message matched the supplied criteria
    #[error("not found: {0}")]
    NotFound(String),
    /// The backend rejected or failed the candidate query
    #[error("search failed: {message}")]
    RemoteQuery {
        message: String,
        code: Option<String>,
    },
    /// Unclassified backend failure returned by the mail API client
    #[error("mail backend error: {message}")]
    Remote {
        code: Option<String>,
        message: String,
    },
    /// Failure in the fetch/draft/send/move sequence after resolution
    #[error("processing failed for message {message_id}: {message}")]
    Processing {
        message_id: String,
        code: Option<String>,
        message: String,
    },
    /// Backend call exceeded its configured timeout
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Stable machine-readable error code
    ///
    /// Backend-originated variants prefer the code reported by the backend.
    pub fn code(&self) -> String {
        match self {
            Self::InvalidInput(_) => "invalid_input".to_owned(),
            Self::Unauthorized(_) => "unauthorized".to_owned(),
            Self::NotFound(_) => "not_found".to_owned(),
            Self::RemoteQuery { code, .. } => {
                code.clone().unwrap_or_else(|| "search_failed".to_owned())
            }
            Self::Remote { code, .. } => code.clone().unwrap_or_else(|| "remote_error".to_owned()),
            Self::Processing { code, .. } => {
                code.clone().unwrap_or_else(|| "processing_failed".to_owned())
            }
            Self::Timeout(_) => "timeout".to_owned(),
            Self::Internal(_) => "internal".to_owned(),
        }
    }

    /// HTTP status for this error
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → 400
    /// - `Unauthorized` → 401
    /// - `NotFound` → 404
    /// - `RemoteQuery`, `Remote`, `Processing` → 502
    /// - `Timeout` → 504
    /// - `Internal` → 500
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RemoteQuery { .. } | Self::Remote { .. } | Self::Processing { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Resolved message id attached to a post-resolution failure, if any
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Processing { message_id, .. } => Some(message_id.as_str()),
            _ => None,
        }
    }

    /// Wrap a failure that happened after resolution with the message id
    ///
    /// Caller-class errors (credential rejection, timeouts) keep their own
    /// variant so they still map to the right status.
    pub fn into_processing(self, message_id: &str) -> Self {
        match self {
            Self::Unauthorized(_) | Self::Timeout(_) | Self::Processing { .. } => self,
            Self::Remote { code, message } | Self::RemoteQuery { code, message } => {
                Self::Processing {
                    message_id: message_id.to_owned(),
                    code,
                    message,
                }
            }
            other => Self::Processing {
                message_id: message_id.to_owned(),
                code: None,
                message: other.to_string(),
            },
        }
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;
