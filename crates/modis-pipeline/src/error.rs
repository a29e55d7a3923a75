//! Error types for the MODIS pipeline.

use raster_engine::{EngineError, ParseError};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while planning or running a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A file name has too few `.`-separated tokens to derive a mosaic key.
    #[error("malformed file name '{0}': expected at least two '.'-separated tokens")]
    MalformedFileName(String),

    /// An engine call failed for one artifact.
    #[error("engine operation failed for {}: {source}", .path.display())]
    EngineOperationFailed {
        path: PathBuf,
        #[source]
        source: EngineError,
    },

    /// The mosaic stage found no raster to take the template from.
    #[error("no representative raster found in {}", .0.display())]
    MissingRepresentativeInput(PathBuf),

    /// A stage found nothing to process.
    #[error("stage '{stage}' has no inputs in {}", .dir.display())]
    EmptyStage { stage: String, dir: PathBuf },

    /// Preset name not in the product table.
    #[error("unknown preset '{0}'")]
    UnknownPreset(String),

    /// A product or projection parameter is missing or unparsable.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Pipeline configuration failed validation.
    #[error("configuration error: {0}")]
    InvalidConfig(String),

    /// A stage directory could not be listed.
    #[error("failed to list {}: {message}", .path.display())]
    Discovery { path: PathBuf, message: String },

    /// Filesystem error on a known path.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Wrap an engine failure with the artifact it was working on.
    pub fn engine(path: impl Into<PathBuf>, source: EngineError) -> Self {
        Self::EngineOperationFailed {
            path: path.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }
}

impl From<ParseError> for PipelineError {
    fn from(err: ParseError) -> Self {
        Self::InvalidParameter(err.to_string())
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_keeps_source() {
        let err = PipelineError::engine(
            "/ws/1_extract/a.tif",
            EngineError::unsupported("BLEND mosaic"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/ws/1_extract/a.tif"));
        assert!(msg.contains("BLEND"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_parse_error_becomes_invalid_parameter() {
        let parse = "12_BIT".parse::<raster_engine::PixelType>().unwrap_err();
        let err: PipelineError = parse.into();
        assert!(matches!(err, PipelineError::InvalidParameter(_)));
    }
}
