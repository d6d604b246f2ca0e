//! Error types for ferry-relay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ferry_core::DirectiveError;

/// Main error type for ferry-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Host key could not be loaded or generated.
    #[error("host key error: {0}")]
    HostKey(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tunnel registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The configured cap on active tunnels is reached.
    #[error("too many active tunnels (limit: {limit})")]
    AtCapacity {
        /// The configured cap.
        limit: usize,
    },

    /// No free link was found after repeated attempts.
    #[error("no free link after {attempts} attempts")]
    LinkSpaceExhausted {
        /// How many links were tried.
        attempts: usize,
    },
}

/// Errors that end an upload session before it is armed.
///
/// None of these are retried; the sender can reconnect for a new link.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The command string could not be parsed.
    #[error("invalid directives: {0}")]
    Directive(#[from] DirectiveError),

    /// No data arrived within the grace window.
    #[error("upload timed out after {grace_secs}s")]
    Timeout {
        /// The configured grace window.
        grace_secs: u64,
    },

    /// The upload outgrew the in-memory limit.
    #[error("upload too large (limit: {limit} bytes)")]
    TooLarge {
        /// The configured limit.
        limit: usize,
    },

    /// The stream ended without any data.
    #[error("no data received")]
    Empty,

    /// The SSH session failed while copying or writing.
    #[error("transport error: {0}")]
    Transport(String),

    /// The sender exceeded the upload rate limit.
    #[error("rate limited: {reason}")]
    RateLimited {
        /// Which limit was hit.
        reason: String,
    },

    /// No tunnel could be reserved.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors returned by the external account and usage collaborators.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    /// The backing service failed or is unreachable.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced to HTTP callers.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The link is expired, deleted, consumed, or never existed.
    ///
    /// Which one is deliberately not revealed.
    #[error("link not found or expired")]
    LinkNotFound,

    /// The payload could not be packaged for download.
    #[error("packaging failed: {0}")]
    Packaging(String),
}

#[derive(serde::Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self {
            HttpError::LinkNotFound => StatusCode::NOT_FOUND,
            HttpError::Packaging(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for upload sessions.
pub type UploadResult<T> = std::result::Result<T, UploadError>;
