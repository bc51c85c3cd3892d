//! Worker error types

use shared::SharedError;
use thiserror::Error;

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Worker error types
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The oracle ran but cannot score this candidate; reported back, not fatal
    #[error("Oracle cannot score candidate: {message}")]
    Unscorable { message: String },

    #[error("Undecodable build description: {message}")]
    BadDescription { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] SharedError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn unscorable(message: impl Into<String>) -> Self {
        Self::Unscorable { message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError { message: message.into() }
    }

    /// Errors answered with a `Failed` response instead of ending the worker
    pub fn is_per_candidate(&self) -> bool {
        matches!(self, Self::Unscorable { .. } | Self::BadDescription { .. })
    }
}
