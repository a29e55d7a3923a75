//! The raster engine trait and its call parameters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::types::{
    CellSize, ColormapMode, MosaicMethod, NodataPredicate, PixelType, RasterDescription,
    ResamplingMethod,
};

/// Engine settings passed explicitly to every call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineContext {
    /// Directory relative paths are resolved against (the process working
    /// directory when unset)
    #[serde(default)]
    pub workspace: Option<PathBuf>,

    /// Threads the engine may use inside a single call; 0 lets the engine decide
    #[serde(default)]
    pub parallel_processing_factor: u32,
}

impl EngineContext {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: Some(workspace.into()),
            parallel_processing_factor: 0,
        }
    }

    pub fn with_parallel_processing_factor(mut self, factor: u32) -> Self {
        self.parallel_processing_factor = factor;
        self
    }

    /// Resolve a path against the context workspace.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.workspace {
            Some(ws) if path.is_relative() => ws.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// Everything needed to mosaic one group of tiles into a new raster.
#[derive(Debug, Clone)]
pub struct MosaicRequest {
    /// Member rasters in group order
    pub members: Vec<PathBuf>,
    pub out_dir: PathBuf,
    pub out_name: String,
    /// Spatial reference, cell width and band count of the template raster
    pub template: RasterDescription,
    pub pixel_type: PixelType,
    pub mosaic_method: MosaicMethod,
    pub colormap_mode: ColormapMode,
}

impl MosaicRequest {
    pub fn output_path(&self) -> PathBuf {
        self.out_dir.join(&self.out_name)
    }
}

/// Target of a reprojection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionParams {
    /// Target spatial reference (EPSG code, WKT or path to a .prj file)
    pub target_srs: String,
    #[serde(default)]
    pub resampling: ResamplingMethod,
    /// Output cell size; engine default when unset
    #[serde(default)]
    pub cell_size: Option<CellSize>,
}

/// Opaque raster-processing capability used by every pipeline stage.
///
/// Implementations need not be re-entrant; callers that run items
/// concurrently must either know the engine is safe or wrap it in a
/// [`SerializedEngine`](crate::SerializedEngine).
#[async_trait]
pub trait RasterEngine: Send + Sync {
    /// Extract one subdataset of a multi-layer container into `out`.
    ///
    /// With no index the engine picks a default (the only band of a
    /// single-layer source, otherwise the first subdataset).
    async fn extract_subdataset(
        &self,
        ctx: &EngineContext,
        src: &Path,
        index: Option<u32>,
        out: &Path,
    ) -> Result<PathBuf>;

    /// Read spatial reference, cell width and band count of a raster.
    async fn describe_raster(&self, ctx: &EngineContext, path: &Path)
        -> Result<RasterDescription>;

    async fn mosaic_to_raster(&self, ctx: &EngineContext, request: &MosaicRequest) -> Result<()>;

    async fn project_raster(
        &self,
        ctx: &EngineContext,
        src: &Path,
        out: &Path,
        params: &ProjectionParams,
    ) -> Result<()>;

    /// Clip `src` to the geometry of `mask`.
    async fn clip_by_geometry(
        &self,
        ctx: &EngineContext,
        src: &Path,
        out: &Path,
        mask: &Path,
    ) -> Result<()>;

    /// Replace cells matching `predicate` with nodata.
    async fn set_null(
        &self,
        ctx: &EngineContext,
        src: &Path,
        out: &Path,
        predicate: &NodataPredicate,
    ) -> Result<()>;

    /// Multiply every cell by `factor`.
    async fn multiply(&self, ctx: &EngineContext, src: &Path, out: &Path, factor: f64)
        -> Result<()>;
}

#[async_trait]
impl<T: RasterEngine + ?Sized> RasterEngine for Arc<T> {
    async fn extract_subdataset(
        &self,
        ctx: &EngineContext,
        src: &Path,
        index: Option<u32>,
        out: &Path,
    ) -> Result<PathBuf> {
        (**self).extract_subdataset(ctx, src, index, out).await
    }

    async fn describe_raster(
        &self,
        ctx: &EngineContext,
        path: &Path,
    ) -> Result<RasterDescription> {
        (**self).describe_raster(ctx, path).await
    }

    async fn mosaic_to_raster(&self, ctx: &EngineContext, request: &MosaicRequest) -> Result<()> {
        (**self).mosaic_to_raster(ctx, request).await
    }

    async fn project_raster(
        &self,
        ctx: &EngineContext,
        src: &Path,
        out: &Path,
        params: &ProjectionParams,
    ) -> Result<()> {
        (**self).project_raster(ctx, src, out, params).await
    }

    async fn clip_by_geometry(
        &self,
        ctx: &EngineContext,
        src: &Path,
        out: &Path,
        mask: &Path,
    ) -> Result<()> {
        (**self).clip_by_geometry(ctx, src, out, mask).await
    }

    async fn set_null(
        &self,
        ctx: &EngineContext,
        src: &Path,
        out: &Path,
        predicate: &NodataPredicate,
    ) -> Result<()> {
        (**self).set_null(ctx, src, out, predicate).await
    }

    async fn multiply(
        &self,
        ctx: &EngineContext,
        src: &Path,
        out: &Path,
        factor: f64,
    ) -> Result<()> {
        (**self).multiply(ctx, src, out, factor).await
    }
}
