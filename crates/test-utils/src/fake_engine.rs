//! A recording in-process raster engine.
//!
//! Every call is recorded, and successful calls write a small placeholder
//! file to their output path so skip-if-exists logic sees real files.

use async_trait::async_trait;
use raster_engine::{
    EngineContext, EngineError, MosaicRequest, NodataPredicate, ProjectionParams,
    RasterDescription, RasterEngine, Result,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::fixtures::FAKE_CONTENT;

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Extract {
        src: PathBuf,
        index: Option<u32>,
        out: PathBuf,
    },
    Describe {
        path: PathBuf,
    },
    Mosaic {
        members: Vec<PathBuf>,
        out: PathBuf,
        request: MosaicRequestSummary,
    },
    Project {
        src: PathBuf,
        out: PathBuf,
        params: ProjectionParams,
    },
    Clip {
        src: PathBuf,
        out: PathBuf,
        mask: PathBuf,
    },
    SetNull {
        src: PathBuf,
        out: PathBuf,
        predicate: NodataPredicate,
    },
    Multiply {
        src: PathBuf,
        out: PathBuf,
        factor: f64,
    },
}

/// The non-path parts of a mosaic request.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicRequestSummary {
    pub template: RasterDescription,
    pub pixel_type: raster_engine::PixelType,
    pub mosaic_method: raster_engine::MosaicMethod,
    pub colormap_mode: raster_engine::ColormapMode,
}

impl EngineCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Extract { .. } => "extract",
            Self::Describe { .. } => "describe",
            Self::Mosaic { .. } => "mosaic",
            Self::Project { .. } => "project",
            Self::Clip { .. } => "clip",
            Self::SetNull { .. } => "set_null",
            Self::Multiply { .. } => "multiply",
        }
    }

    /// Output path, for calls that write one.
    pub fn output(&self) -> Option<&Path> {
        match self {
            Self::Describe { .. } => None,
            Self::Extract { out, .. }
            | Self::Mosaic { out, .. }
            | Self::Project { out, .. }
            | Self::Clip { out, .. }
            | Self::SetNull { out, .. }
            | Self::Multiply { out, .. } => Some(out.as_path()),
        }
    }

    /// Every path the call touches.
    fn paths(&self) -> Vec<&Path> {
        match self {
            Self::Extract { src, out, .. }
            | Self::Project { src, out, .. }
            | Self::SetNull { src, out, .. }
            | Self::Multiply { src, out, .. } => vec![src.as_path(), out.as_path()],
            Self::Describe { path } => vec![path.as_path()],
            Self::Mosaic { members, out, .. } => {
                let mut paths: Vec<&Path> = members.iter().map(|p| p.as_path()).collect();
                paths.push(out.as_path());
                paths
            }
            Self::Clip { src, out, mask } => vec![src.as_path(), out.as_path(), mask.as_path()],
        }
    }
}

/// Recording fake engine for pipeline tests.
pub struct FakeEngine {
    calls: Mutex<Vec<EngineCall>>,
    fail_patterns: Vec<String>,
    descriptions: Vec<(String, RasterDescription)>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_patterns: Vec::new(),
            descriptions: Vec::new(),
            delay: None,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Fail any call touching a path that contains `pattern`.
    pub fn fail_when(mut self, pattern: impl Into<String>) -> Self {
        self.fail_patterns.push(pattern.into());
        self
    }

    /// Describe rasters with this file name as `desc`.
    pub fn with_description(
        mut self,
        file_name: impl Into<String>,
        desc: RasterDescription,
    ) -> Self {
        self.descriptions.push((file_name.into(), desc));
        self
    }

    /// Hold every call for `delay` before completing it.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Description returned for rasters without a configured one.
    pub fn default_description() -> RasterDescription {
        RasterDescription {
            spatial_reference: "PROJCS[\"unnamed\",GEOGCS[\"Unknown datum based upon the custom spheroid\"],PROJECTION[\"Sinusoidal\"]]".to_string(),
            cell_width: 231.656358263889,
            band_count: 1,
        }
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of recorded calls with the given [`EngineCall::name`].
    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.name() == name).count()
    }

    /// Highest number of calls observed in progress at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn clear_calls(&self) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Record the call, wait out the delay, and fail if a pattern matches.
    async fn enter(&self, call: EngineCall) -> Result<()> {
        let failing = self.fail_patterns.iter().find(|pattern| {
            call.paths()
                .iter()
                .any(|p| p.to_string_lossy().contains(pattern.as_str()))
        });
        let failure = failing.map(|pattern| EngineError::CommandFailed {
            program: "fake-engine".to_string(),
            status: "exit status: 1".to_string(),
            stderr: format!("simulated failure for '{}' in {}", pattern, call.name()),
        });

        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn write_output(out: &Path) -> Result<()> {
        tokio::fs::write(out, FAKE_CONTENT).await?;
        Ok(())
    }
}

#[async_trait]
impl RasterEngine for FakeEngine {
    async fn extract_subdataset(
        &self,
        _ctx: &EngineContext,
        src: &Path,
        index: Option<u32>,
        out: &Path,
    ) -> Result<PathBuf> {
        self.enter(EngineCall::Extract {
            src: src.to_path_buf(),
            index,
            out: out.to_path_buf(),
        })
        .await?;
        Self::write_output(out).await?;
        Ok(out.to_path_buf())
    }

    async fn describe_raster(
        &self,
        _ctx: &EngineContext,
        path: &Path,
    ) -> Result<RasterDescription> {
        self.enter(EngineCall::Describe {
            path: path.to_path_buf(),
        })
        .await?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self
            .descriptions
            .iter()
            .find(|(file_name, _)| *file_name == name)
            .map(|(_, desc)| desc.clone())
            .unwrap_or_else(Self::default_description))
    }

    async fn mosaic_to_raster(&self, _ctx: &EngineContext, request: &MosaicRequest) -> Result<()> {
        let out = request.output_path();
        self.enter(EngineCall::Mosaic {
            members: request.members.clone(),
            out: out.clone(),
            request: MosaicRequestSummary {
                template: request.template.clone(),
                pixel_type: request.pixel_type,
                mosaic_method: request.mosaic_method,
                colormap_mode: request.colormap_mode,
            },
        })
        .await?;
        Self::write_output(&out).await
    }

    async fn project_raster(
        &self,
        _ctx: &EngineContext,
        src: &Path,
        out: &Path,
        params: &ProjectionParams,
    ) -> Result<()> {
        self.enter(EngineCall::Project {
            src: src.to_path_buf(),
            out: out.to_path_buf(),
            params: params.clone(),
        })
        .await?;
        Self::write_output(out).await
    }

    async fn clip_by_geometry(
        &self,
        _ctx: &EngineContext,
        src: &Path,
        out: &Path,
        mask: &Path,
    ) -> Result<()> {
        self.enter(EngineCall::Clip {
            src: src.to_path_buf(),
            out: out.to_path_buf(),
            mask: mask.to_path_buf(),
        })
        .await?;
        Self::write_output(out).await
    }

    async fn set_null(
        &self,
        _ctx: &EngineContext,
        src: &Path,
        out: &Path,
        predicate: &NodataPredicate,
    ) -> Result<()> {
        self.enter(EngineCall::SetNull {
            src: src.to_path_buf(),
            out: out.to_path_buf(),
            predicate: *predicate,
        })
        .await?;
        Self::write_output(out).await
    }

    async fn multiply(
        &self,
        _ctx: &EngineContext,
        src: &Path,
        out: &Path,
        factor: f64,
    ) -> Result<()> {
        self.enter(EngineCall::Multiply {
            src: src.to_path_buf(),
            out: out.to_path_buf(),
            factor,
        })
        .await?;
        Self::write_output(out).await
    }
}
