//! Error types for raster engine operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while invoking the raster engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// An external tool exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    /// An external tool could not be started at all.
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A tool produced output that could not be interpreted.
    #[error("invalid engine output: {0}")]
    InvalidOutput(String),

    /// The requested operation or parameter combination is not supported.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The container has no subdataset at the requested index.
    #[error("{path:?} has no subdataset {index} ({available} available)")]
    MissingSubdataset {
        path: PathBuf,
        index: u32,
        available: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create an InvalidOutput error.
    pub fn invalid_output(msg: impl Into<String>) -> Self {
        Self::InvalidOutput(msg.into())
    }

    /// Create an Unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidOutput(err.to_string())
    }
}

/// Result type for raster engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
