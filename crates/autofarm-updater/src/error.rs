/*
[INPUT]:  Error sources (HTTP, release API, filesystem, serialization, verification)
[OUTPUT]: Structured update error type with retry and integrity hints
[POS]:    Error handling layer - unified error type for the updater crate
[UPDATE]: When adding new error sources or improving error messages
*/

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for the update transport
#[derive(Error, Debug)]
pub enum UpdateError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Release API returned an error response
    #[error("release API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Local filesystem operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// The release has no asset matching the configured pattern
    #[error("release {tag} has no downloadable asset matching {pattern:?}")]
    NoAsset { tag: String, pattern: Option<String> },

    /// A version string could not be parsed
    #[error("invalid version string: {0:?}")]
    InvalidVersion(String),

    /// Downloaded artifact failed size or digest verification
    #[error("artifact integrity check failed: {0}")]
    Integrity(String),
}

impl UpdateError {
    /// Network-side failures that a later periodic check may not hit again
    pub fn is_network(&self) -> bool {
        matches!(self, UpdateError::Http(_) | UpdateError::Api { .. })
    }

    /// Check if the error means the artifact on disk must not be installed
    pub fn is_integrity(&self) -> bool {
        matches!(self, UpdateError::Integrity(_))
    }

    /// Create an API error from status code and message
    pub fn api_error(status: StatusCode, message: impl Into<String>) -> Self {
        UpdateError::Api {
            status: status.as_u16(),
            message: message.into(),
        }
    }
}

/// Result type alias for update operations
pub type Result<T> = std::result::Result<T, UpdateError>;
