//! Error taxonomy shared by the file registry, the content service and the
//! HTTP layer.

use crate::llm::LlmError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for convtree operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Traversal attempt or otherwise malformed path.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Missing file, record or folder.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Wrong file type for the requested operation.
    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    /// Bad request payload.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Storage failure at {path:?}: {message}")]
    Storage {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// A stored JSON file could not be parsed or serialized.
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Result type alias for convtree operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl Error {
    /// Create a storage error with path context. A missing file maps to
    /// `NotFound` so callers see a client error instead of a 500.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            return Error::NotFound(path.display().to_string());
        }
        Error::Storage {
            message: err.to_string(),
            path: Some(path),
            source: Some(err),
        }
    }

    /// Stable machine-readable kind, used in HTTP error bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidPath(_) => "invalid_path",
            Error::NotFound(_) => "not_found",
            Error::UnsupportedMedia(_) => "unsupported_media",
            Error::MalformedInput(_) => "malformed_input",
            Error::Storage { .. } | Error::Database { .. } | Error::Json { .. } => {
                "storage_failure"
            }
            Error::Llm(e) => e.kind(),
        }
    }

    /// True for errors caused by the caller rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidPath(_)
                | Error::NotFound(_)
                | Error::UnsupportedMedia(_)
                | Error::MalformedInput(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_maps_to_not_found() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let mapped = Error::io_with_path(err, "/tmp/x.json");
        assert!(matches!(mapped, Error::NotFound(_)));
        assert!(mapped.is_client_error());
    }

    #[test]
    fn other_io_errors_are_storage_failures() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let mapped = Error::io_with_path(err, "/tmp/x.json");
        assert_eq!(mapped.kind(), "storage_failure");
        assert!(!mapped.is_client_error());
    }

    #[test]
    fn llm_errors_keep_their_kind() {
        let err: Error = LlmError::RateLimited("slow down".into()).into();
        assert_eq!(err.kind(), "llm_rate_limited");
    }
}
