//! Shared test utilities for the MODIS preprocessing workspace.
//!
//! This crate provides common testing infrastructure including:
//! - A recording fake [`RasterEngine`](raster_engine::RasterEngine)
//! - Script stand-ins for the GDAL programs (unix only)
//! - Scratch workspaces with MODIS-style input files
//! - Test data path helpers and a skip macro for optional sample data
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{FakeEngine, ScratchWorkspace};
//! ```

pub mod fake_engine;
#[cfg(unix)]
pub mod fake_gdal;
pub mod fixtures;
pub mod paths;

// Re-export commonly used items at the crate root
pub use fake_engine::*;
#[cfg(unix)]
pub use fake_gdal::*;
pub use fixtures::*;
pub use paths::*;

/// Macro to skip a test if the required file is not found.
///
/// Real MODIS granules are large and not checked in; tests that need one
/// skip themselves unless it is present in `TEST_DATA_DIR` or `testdata/`.
///
/// # Usage
///
/// ```ignore
/// use test_utils::require_test_file;
///
/// #[test]
/// fn test_real_granule() {
///     let path = require_test_file!("MOD13Q1.A2020001.h08v05.006.2020018000000.hdf");
///     // Test code using path...
/// }
/// ```
///
/// If the file is not found, the test will print a skip message and return early.
#[macro_export]
macro_rules! require_test_file {
    ($name:expr) => {{
        match $crate::find_test_file($name) {
            Some(path) => path,
            None => {
                eprintln!(
                    "SKIPPED: Test file '{}' not found. Download test data or set TEST_DATA_DIR.",
                    $name
                );
                return;
            }
        }
    }};
}
