//! Stage input discovery and output completion checks.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::SkipPolicy;
use crate::error::{PipelineError, Result};

/// Extension of the intermediate rasters passed between stages.
pub const RASTER_EXTENSION: &str = ".tif";

/// List the `.tif` files directly inside `dir`, sorted by file name.
///
/// Subdirectories and sidecar files (`.tif.aux.xml`, `.tfw`) are ignored.
pub fn find_tifs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut tifs = Vec::new();

    for entry in walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| PipelineError::Discovery {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;

        if entry.file_type().is_file()
            && entry.file_name().to_string_lossy().ends_with(RASTER_EXTENSION)
        {
            tifs.push(entry.into_path());
        }
    }

    Ok(tifs)
}

/// Whether `path` already holds a finished output under `policy`.
pub async fn output_is_done(path: &Path, policy: SkipPolicy) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(match policy {
            SkipPolicy::IfExists => true,
            SkipPolicy::IfNonEmpty => meta.len() > 0,
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PipelineError::io(path, e)),
    }
}
