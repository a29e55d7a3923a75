//! Serializing wrapper for engines that are not safe to call concurrently.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::engine::{EngineContext, MosaicRequest, ProjectionParams, RasterEngine};
use crate::error::Result;
use crate::types::{NodataPredicate, RasterDescription};

/// Admits one engine call at a time, whatever the caller's concurrency.
pub struct SerializedEngine<E> {
    inner: E,
    gate: Mutex<()>,
}

impl<E: RasterEngine> SerializedEngine<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: RasterEngine> RasterEngine for SerializedEngine<E> {
    async fn extract_subdataset(
        &self,
        ctx: &EngineContext,
        src: &Path,
        index: Option<u32>,
        out: &Path,
    ) -> Result<PathBuf> {
        let _guard = self.gate.lock().await;
        self.inner.extract_subdataset(ctx, src, index, out).await
    }

    async fn describe_raster(
        &self,
        ctx: &EngineContext,
        path: &Path,
    ) -> Result<RasterDescription> {
        let _guard = self.gate.lock().await;
        self.inner.describe_raster(ctx, path).await
    }

    async fn mosaic_to_raster(&self, ctx: &EngineContext, request: &MosaicRequest) -> Result<()> {
        let _guard = self.gate.lock().await;
        self.inner.mosaic_to_raster(ctx, request).await
    }

    async fn project_raster(
        &self,
        ctx: &EngineContext,
        src: &Path,
        out: &Path,
        params: &ProjectionParams,
    ) -> Result<()> {
        let _guard = self.gate.lock().await;
        self.inner.project_raster(ctx, src, out, params).await
    }

    async fn clip_by_geometry(
        &self,
        ctx: &EngineContext,
        src: &Path,
        out: &Path,
        mask: &Path,
    ) -> Result<()> {
        let _guard = self.gate.lock().await;
        self.inner.clip_by_geometry(ctx, src, out, mask).await
    }

    async fn set_null(
        &self,
        ctx: &EngineContext,
        src: &Path,
        out: &Path,
        predicate: &NodataPredicate,
    ) -> Result<()> {
        let _guard = self.gate.lock().await;
        self.inner.set_null(ctx, src, out, predicate).await
    }

    async fn multiply(
        &self,
        ctx: &EngineContext,
        src: &Path,
        out: &Path,
        factor: f64,
    ) -> Result<()> {
        let _guard = self.gate.lock().await;
        self.inner.multiply(ctx, src, out, factor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Records the highest number of calls observed in flight at once.
    #[derive(Default)]
    struct OverlapProbe {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl OverlapProbe {
        async fn enter(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RasterEngine for OverlapProbe {
        async fn extract_subdataset(
            &self,
            _: &EngineContext,
            _: &Path,
            _: Option<u32>,
            out: &Path,
        ) -> Result<PathBuf> {
            self.enter().await;
            Ok(out.to_path_buf())
        }

        async fn describe_raster(&self, _: &EngineContext, _: &Path) -> Result<RasterDescription> {
            self.enter().await;
            Ok(RasterDescription {
                spatial_reference: String::new(),
                cell_width: 1.0,
                band_count: 1,
            })
        }

        async fn mosaic_to_raster(&self, _: &EngineContext, _: &MosaicRequest) -> Result<()> {
            self.enter().await;
            Ok(())
        }

        async fn project_raster(
            &self,
            _: &EngineContext,
            _: &Path,
            _: &Path,
            _: &ProjectionParams,
        ) -> Result<()> {
            self.enter().await;
            Ok(())
        }

        async fn clip_by_geometry(
            &self,
            _: &EngineContext,
            _: &Path,
            _: &Path,
            _: &Path,
        ) -> Result<()> {
            self.enter().await;
            Ok(())
        }

        async fn set_null(
            &self,
            _: &EngineContext,
            _: &Path,
            _: &Path,
            _: &NodataPredicate,
        ) -> Result<()> {
            self.enter().await;
            Ok(())
        }

        async fn multiply(&self, _: &EngineContext, _: &Path, _: &Path, _: f64) -> Result<()> {
            self.enter().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_serialized_engine_never_overlaps_calls() {
        let engine = Arc::new(SerializedEngine::new(OverlapProbe::default()));
        let ctx = EngineContext::default();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let out = PathBuf::from(format!("{}.tif", i));
                    engine.multiply(&ctx, Path::new("in.tif"), &out, 0.1).await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(engine.inner().peak.load(Ordering::SeqCst), 1);
    }
}
