//! Raster engine capability for MODIS batch preprocessing.
//!
//! The pipeline never touches pixels itself. Every stage operation
//! (subdataset extraction, mosaicking, reprojection, clipping, masking and
//! scaling) is a single call through the [`RasterEngine`] trait defined here.
//!
//! # Adapters
//!
//! - [`GdalCliEngine`] drives the GDAL command-line utilities
//!   (`gdalinfo`, `gdal_translate`, `gdalwarp`, `gdal_calc.py`).
//! - [`SerializedEngine`] wraps any engine so that at most one call is in
//!   flight at a time, for engines that are not safe to call concurrently.
//!
//! Engine configuration is never global: every call receives an explicit
//! [`EngineContext`].

pub mod engine;
pub mod error;
pub mod gdal_cli;
pub mod serialized;
pub mod types;

// Re-exports
pub use engine::{EngineContext, MosaicRequest, ProjectionParams, RasterEngine};
pub use error::{EngineError, Result};
pub use gdal_cli::{GdalCliConfig, GdalCliEngine};
pub use serialized::SerializedEngine;
pub use types::{
    CellSize, ColormapMode, Comparison, MosaicMethod, NodataPredicate, ParseError, PixelType,
    RasterDescription, ResamplingMethod,
};
