//! Dispatch of planned work items onto a raster engine.

use raster_engine::{EngineContext, RasterEngine};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::stage::{StageOperation, WorkItem};

/// Run the engine call of one work item.
pub async fn dispatch(
    engine: &dyn RasterEngine,
    ctx: &EngineContext,
    item: &WorkItem,
) -> Result<()> {
    let out = item.output.as_path();

    let result = match &item.operation {
        StageOperation::Extract { src, index } => engine
            .extract_subdataset(ctx, src, *index, out)
            .await
            .map(|written| {
                if written != out {
                    debug!(
                        expected = %out.display(),
                        written = %written.display(),
                        "Engine wrote extract to a different path"
                    );
                }
            }),
        StageOperation::Mosaic { group, template } => {
            let template = template.get(engine, ctx).await?;
            engine.mosaic_to_raster(ctx, &group.request(template)).await
        }
        StageOperation::Reproject { src, params } => {
            engine.project_raster(ctx, src, out, params).await
        }
        StageOperation::Clip { src, mask } => engine.clip_by_geometry(ctx, src, out, mask).await,
        StageOperation::SetNull { src, predicate } => {
            engine.set_null(ctx, src, out, predicate).await
        }
        StageOperation::Multiply { src, factor } => engine.multiply(ctx, src, out, *factor).await,
    };

    result.map_err(|e| PipelineError::engine(out, e))
}
