//! Job file loading for modis-batch.
//!
//! A job file is YAML describing one run: preset, workspace, inputs, clip
//! masks and target projection, plus optional parameter overrides,
//! pipeline settings and GDAL program names.
//!
//! Supports environment variable substitution using `${VAR}` and
//! `${VAR:-default}` before parsing, and `~` expansion in every path.
//!
//! ```yaml
//! preset: MOD16_ET
//! workspace: ${MODIS_DATA:-~/modis}/et_2020
//! inputs:
//!   hdf_dir: ~/downloads/mod16
//! masks:
//!   - ~/boundaries/basin.shp
//! projection:
//!   target_srs: EPSG:4326
//!   resampling: NEAREST
//! overrides:
//!   scale_factor: 0.1
//! pipeline:
//!   concurrency: 2
//! ```

use anyhow::{Context, Result};
use modis_pipeline::{ParameterOverrides, PipelineConfig, PresetSelector, RunRequest};
use raster_engine::{CellSize, GdalCliConfig, ProjectionParams, ResamplingMethod};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// ============================================================================
// Job Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    /// Preset name (`MOD13_NDVI`, `MOD16_ET`, ...) or `custom`
    pub preset: String,
    /// Root of the stage directories
    pub workspace: String,
    pub inputs: InputsConfig,
    /// Boundary geometries to clip with
    pub masks: Vec<String>,
    pub projection: ProjectionConfig,
    pub overrides: ParameterOverrides,
    /// Pipeline settings; taken from `MODIS_*` environment variables when absent
    pub pipeline: Option<PipelineConfig>,
    pub engine: GdalCliConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputsConfig {
    /// HDF containers, processed in this order
    pub hdfs: Vec<String>,
    /// Directory searched for `*.hdf`; matches follow the explicit list
    pub hdf_dir: Option<String>,
    /// Also search subdirectories of `hdf_dir`
    pub recursive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectionConfig {
    /// EPSG code, WKT, or path to a .prj file
    pub target_srs: String,
    pub resampling: ResamplingMethod,
    /// Preset default when unset
    pub cell_size: Option<CellSize>,
}

impl JobConfig {
    pub fn selector(&self) -> Result<PresetSelector> {
        self.preset
            .parse()
            .with_context(|| format!("Invalid preset in job: {:?}", self.preset))
    }

    pub fn workspace_path(&self) -> PathBuf {
        expand_path(&self.workspace)
    }

    /// Explicit inputs followed by the ones discovered in `hdf_dir`.
    pub fn hdf_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = self.inputs.hdfs.iter().map(|p| expand_path(p)).collect();

        if let Some(dir) = &self.inputs.hdf_dir {
            let found = discover_hdfs(&expand_path(dir), self.inputs.recursive)?;
            for path in found {
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }

        Ok(paths)
    }

    pub fn mask_paths(&self) -> Vec<PathBuf> {
        self.masks.iter().map(|p| expand_path(p)).collect()
    }

    /// Pipeline settings from the job, or from the environment.
    pub fn pipeline_config(&self) -> PipelineConfig {
        self.pipeline.clone().unwrap_or_else(PipelineConfig::from_env)
    }

    /// Resolve the job into a pipeline request.
    pub fn to_run_request(&self) -> Result<RunRequest> {
        let hdfs = self.hdf_paths()?;
        let projection = ProjectionParams {
            target_srs: expand_srs(&self.projection.target_srs),
            resampling: self.projection.resampling,
            cell_size: self.projection.cell_size,
        };

        let request = RunRequest::from_selector(
            self.selector()?,
            &self.overrides,
            self.workspace_path(),
            hdfs,
            self.mask_paths(),
            projection,
        )
        .context("Failed to resolve product parameters")?
        .absolute()
        .context("Failed to resolve job paths")?;

        request.validate().context("Invalid job")?;
        Ok(request)
    }
}

// ============================================================================
// Loading Functions
// ============================================================================

/// Load and parse a job file with environment variable substitution.
///
/// Validation runs separately, after command-line overrides are applied.
pub fn load_job_config<P: AsRef<Path>>(path: P) -> Result<JobConfig> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read job file {:?}", path.as_ref()))?;

    parse_job_config(&content)
        .with_context(|| format!("Failed to load job file {:?}", path.as_ref()))
}

pub fn parse_job_config(content: &str) -> Result<JobConfig> {
    let expanded = expand_env_vars(content)?;
    serde_yaml::from_str(&expanded).context("Failed to parse job YAML")
}

/// Sorted `*.hdf` files (any extension case) under `dir`.
pub fn discover_hdfs(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    anyhow::ensure!(dir.is_dir(), "HDF directory {:?} does not exist", dir);

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut found = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("Failed to list {:?}", dir))?;
        let is_hdf = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("hdf"))
            .unwrap_or(false);

        if entry.file_type().is_file() && is_hdf {
            found.push(entry.into_path());
        }
    }

    Ok(found)
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw.trim()).into_owned())
}

/// Expand `~` only when the coordinate system names a `.prj` file.
fn expand_srs(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('~') {
        shellexpand::tilde(trimmed).into_owned()
    } else {
        trimmed.to_string()
    }
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand `${VAR}` and `${VAR:-default}`; `$${` yields a literal `${`.
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("$${") {
            result.push_str("${");
            rest = after;
        } else if let Some(after) = tail.strip_prefix("${") {
            let end = after
                .find('}')
                .with_context(|| format!("Unclosed variable substitution: ${{{}", after))?;
            result.push_str(&resolve_var_expr(&after[..end])?);
            rest = &after[end + 1..];
        } else {
            result.push('$');
            rest = &tail[1..];
        }
    }

    result.push_str(rest);
    Ok(result)
}

/// Resolve `VAR` or `VAR:-default`; an empty variable takes the default.
fn resolve_var_expr(expr: &str) -> Result<String> {
    match expr.split_once(":-") {
        Some((name, default)) => match std::env::var(name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        },
        None => std::env::var(expr.trim())
            .with_context(|| format!("Environment variable {} not set", expr.trim())),
    }
}

// ============================================================================
// Validation
// ============================================================================

pub fn validate_job_config(config: &JobConfig) -> Result<()> {
    anyhow::ensure!(!config.preset.trim().is_empty(), "Job preset cannot be empty");
    config.selector()?;

    anyhow::ensure!(
        !config.workspace.trim().is_empty(),
        "Job workspace cannot be empty"
    );
    anyhow::ensure!(
        !config.inputs.hdfs.is_empty() || config.inputs.hdf_dir.is_some(),
        "Job needs inputs.hdfs or inputs.hdf_dir"
    );
    anyhow::ensure!(!config.masks.is_empty(), "Job needs at least one mask");
    anyhow::ensure!(
        !config.projection.target_srs.trim().is_empty(),
        "projection.target_srs cannot be empty"
    );

    if let Some(pipeline) = &config.pipeline {
        pipeline.validate().context("Invalid pipeline settings")?;
    }

    Ok(())
}
