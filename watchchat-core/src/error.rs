//! Error types for watchchat-core

use thiserror::Error;

/// Main error type for the watchchat-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Local database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage credentials could not be obtained
    #[error("credential error: {0}")]
    Credential(String),

    /// List/get/put/delete against the remote archive failed
    #[error("remote archive error: {0}")]
    RemoteArchive(String),

    /// Atomic or streaming model request failed
    #[error("model service error: {0}")]
    ModelService(String),

    /// Request rejected before any network call
    #[error("invalid request: {0}")]
    Validation(String),

    /// Another send/load flow is still in flight
    #[error("busy: {0}")]
    Busy(String),
}

impl Error {
    /// Whether this failure should be shown to the user as a transcript notice
    /// and the next action allowed to proceed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Credential(_)
                | Error::RemoteArchive(_)
                | Error::ModelService(_)
                | Error::Validation(_)
                | Error::Busy(_)
        )
    }
}

/// Result type alias for watchchat-core
pub type Result<T> = std::result::Result<T, Error>;
