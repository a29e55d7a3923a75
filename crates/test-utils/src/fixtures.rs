//! Common test fixtures for pipeline tests.
//!
//! Tile names follow the MODIS convention
//! `<product>.A<yyyyddd>.h<hh>v<vv>.<collection>.<production>.hdf`, so
//! tiles of the same date group into one mosaic.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Four MOD13Q1 tiles: two tiles on each of two dates.
pub const NDVI_TILES: [&str; 4] = [
    "MOD13Q1.A2020001.h26v05.006.2020018000000.hdf",
    "MOD13Q1.A2020001.h27v05.006.2020018000001.hdf",
    "MOD13Q1.A2020017.h26v05.006.2020034000000.hdf",
    "MOD13Q1.A2020017.h27v05.006.2020034000001.hdf",
];

/// Two MOD16A2 tiles of one date.
pub const ET_TILES: [&str; 2] = [
    "MOD16A2.A2020009.h26v05.006.2020018120000.hdf",
    "MOD16A2.A2020009.h27v05.006.2020018120001.hdf",
];

/// Placeholder content written into fake inputs.
pub const FAKE_CONTENT: &[u8] = b"fake raster";

/// A temporary directory holding inputs, masks and a pipeline workspace.
///
/// Removed when dropped.
pub struct ScratchWorkspace {
    dir: TempDir,
}

impl Default for ScratchWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl ScratchWorkspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::Builder::new()
                .prefix("modis_test_")
                .tempdir()
                .expect("Failed to create temporary test directory"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Pipeline workspace root; not created until a run creates it.
    pub fn workspace(&self) -> PathBuf {
        self.root().join("ws")
    }

    /// Directory of one stage, e.g. `stage_dir("1_extract")`.
    pub fn stage_dir(&self, name: &str) -> PathBuf {
        self.workspace().join(name)
    }

    /// Create placeholder HDF inputs under `inputs/`.
    pub fn touch_inputs(&self, names: &[&str]) -> Vec<PathBuf> {
        self.touch_all("inputs", names)
    }

    /// Create placeholder mask files under `masks/`.
    pub fn touch_masks(&self, names: &[&str]) -> Vec<PathBuf> {
        self.touch_all("masks", names)
    }

    /// Write `content` to a path relative to the root, creating parents.
    pub fn write(&self, relative: impl AsRef<Path>, content: &[u8]) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create fixture directory");
        }
        std::fs::write(&path, content).expect("Failed to write fixture file");
        path
    }

    /// Sorted file names inside a stage directory; empty if it is missing.
    pub fn stage_files(&self, name: &str) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.stage_dir(name))
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().is_file())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    fn touch_all(&self, sub: &str, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| self.write(Path::new(sub).join(name), FAKE_CONTENT))
            .collect()
    }
}
