//! Pipeline orchestration.
//!
//! A run is planned once from a [`RunRequest`] into an ordered list of
//! [`StageSpec`]s over a fixed workspace layout, then executed stage by
//! stage. Each stage after extract discovers its inputs in the previous
//! stage's directory when it starts, so a stage sees everything the one
//! before it produced, including outputs left by earlier runs.

use chrono::{Local, Utc};
use metrics::histogram;
use raster_engine::{EngineContext, ProjectionParams, RasterEngine, SerializedEngine};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{PipelineConfig, StageFailurePolicy};
use crate::discovery::{find_tifs, output_is_done};
use crate::error::{PipelineError, Result};
use crate::grouping::{GroupingStrategy, ModisDateKey};
use crate::preset::{
    resolve_selector, ParameterOverrides, PresetSelector, ProductParameters, StageLayout,
};
use crate::report::{ItemReport, ReportSink, RunReport, StageReport};
use crate::runner::StageRunner;
use crate::stage::{
    plan_clip, plan_extract, plan_mosaic, plan_multiply, plan_reproject, plan_set_null,
    StageInput, StageKind, StageParams, StageSpec, WorkItem,
};
use crate::template::LazyTemplate;

/// Everything a caller supplies for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Root of the stage directories; created if missing
    pub workspace: PathBuf,
    /// Source HDF containers
    pub hdfs: Vec<PathBuf>,
    /// Boundary geometries to clip with
    pub masks: Vec<PathBuf>,
    /// Preset label for reporting (`MOD13_NDVI`, `custom`, ...)
    pub preset: String,
    pub params: ProductParameters,
    pub projection: ProjectionParams,
}

impl RunRequest {
    /// Resolve a preset selector plus overrides into a request.
    ///
    /// A projection without a cell size takes the preset's default.
    pub fn from_selector(
        selector: PresetSelector,
        overrides: &ParameterOverrides,
        workspace: impl Into<PathBuf>,
        hdfs: Vec<PathBuf>,
        masks: Vec<PathBuf>,
        mut projection: ProjectionParams,
    ) -> Result<Self> {
        let params = resolve_selector(selector, overrides)?;
        if projection.cell_size.is_none() {
            projection.cell_size = params.cell_size;
        }

        Ok(Self {
            workspace: workspace.into(),
            hdfs,
            masks,
            preset: selector.label().to_string(),
            params,
            projection,
        })
    }

    /// Anchor relative workspace, input and mask paths at the current
    /// directory. Absolute paths are kept as given.
    pub fn absolute(mut self) -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| PipelineError::io(".", e))?;

        anchor(&cwd, &mut self.workspace);
        for path in self.hdfs.iter_mut().chain(self.masks.iter_mut()) {
            anchor(&cwd, path);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hdfs.is_empty() {
            return Err(PipelineError::invalid_parameter("at least one HDF input is required"));
        }
        if self.masks.is_empty() {
            return Err(PipelineError::invalid_parameter("at least one clip mask is required"));
        }
        if self.projection.target_srs.trim().is_empty() {
            return Err(PipelineError::invalid_parameter("target coordinate system is required"));
        }
        self.params.validate()
    }
}

fn anchor(cwd: &Path, path: &mut PathBuf) {
    if path.is_relative() {
        *path = cwd.join(&*path);
    }
}

/// The planned stages of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub workspace: PathBuf,
    pub layout: StageLayout,
    pub stages: Vec<StageSpec>,
}

impl PipelineRun {
    pub fn plan(request: &RunRequest, config: &PipelineConfig) -> Result<Self> {
        request.validate()?;

        let params = &request.params;
        let layout = params.layout;
        let total = layout.stage_count();
        let dirs: Vec<PathBuf> = layout
            .dir_names()
            .iter()
            .map(|name| request.workspace.join(name))
            .collect();

        let mut stages = Vec::with_capacity(total);
        for (i, kind) in layout.kinds().iter().enumerate() {
            let input = match i {
                0 => StageInput::Explicit(request.hdfs.clone()),
                _ => StageInput::Discover(dirs[i - 1].clone()),
            };

            let stage_params = match kind {
                StageKind::Extract => StageParams::Extract {
                    sds_index: params.sds_index,
                    band_name: params.band_name.clone(),
                },
                StageKind::Mosaic => StageParams::Mosaic {
                    pixel_type: params.pixel_type,
                    mosaic_method: params.mosaic_method,
                    colormap_mode: params.colormap_mode,
                },
                StageKind::Reproject => StageParams::Reproject {
                    projection: request.projection.clone(),
                    prefix: config.prefixes.reproject.clone(),
                },
                StageKind::Clip => StageParams::Clip {
                    masks: request.masks.clone(),
                },
                StageKind::SetNull => StageParams::SetNull {
                    predicate: params.nodata.ok_or_else(|| {
                        PipelineError::invalid_parameter("set-null stage needs a nodata predicate")
                    })?,
                    prefix: config.prefixes.set_null.clone(),
                },
                StageKind::Multiply => StageParams::Multiply {
                    factor: params.scale_factor,
                    prefix: config.prefixes.scale.clone(),
                },
            };

            stages.push(StageSpec::new(i + 1, total, input, dirs[i].clone(), stage_params));
        }

        Ok(Self {
            workspace: request.workspace.clone(),
            layout,
            stages,
        })
    }

    pub fn stage_dirs(&self) -> impl Iterator<Item = &Path> {
        self.stages.iter().map(|s| s.output_dir.as_path())
    }

    /// Create the workspace root and every stage directory. Existing
    /// directories are left as they are.
    pub async fn create_dirs(&self) -> Result<()> {
        for dir in std::iter::once(self.workspace.as_path()).chain(self.stage_dirs()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| PipelineError::io(dir, e))?;
        }
        Ok(())
    }
}

fn localtime() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Runs planned pipelines against one engine.
pub struct Pipeline {
    engine: Arc<dyn RasterEngine>,
    sink: Arc<dyn ReportSink>,
    config: PipelineConfig,
    grouping: Arc<dyn GroupingStrategy>,
}

impl Pipeline {
    /// Validates the configuration. A non-reentrant engine driven with
    /// concurrency above 1 is wrapped so its calls never overlap.
    pub fn new(
        engine: Arc<dyn RasterEngine>,
        sink: Arc<dyn ReportSink>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let engine: Arc<dyn RasterEngine> = if config.needs_serialized_engine() {
            info!(
                concurrency = config.concurrency,
                "Engine is not reentrant; serializing engine calls"
            );
            Arc::new(SerializedEngine::new(engine))
        } else {
            engine
        };

        Ok(Self {
            engine,
            sink,
            config,
            grouping: Arc::new(ModisDateKey),
        })
    }

    /// Replace the mosaic grouping rule.
    pub fn with_grouping(mut self, strategy: Arc<dyn GroupingStrategy>) -> Self {
        self.grouping = strategy;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn plan(&self, request: &RunRequest) -> Result<PipelineRun> {
        PipelineRun::plan(request, &self.config)
    }

    /// Plan and execute a run.
    ///
    /// Relative request paths are taken from the current directory.
    /// Item failures are recorded and never abort the run. Stage setup
    /// failures follow the configured [`StageFailurePolicy`]; directory
    /// creation failures always abort.
    #[instrument(
        skip(self, request),
        fields(
            preset = %request.preset,
            workspace = %request.workspace.display(),
            run_id = tracing::field::Empty
        )
    )]
    pub async fn run(&self, request: &RunRequest) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let request = &request.clone().absolute()?;
        let plan = self.plan(request)?;
        plan.create_dirs().await?;

        let started_at = Utc::now();
        let run_start = Instant::now();
        let ctx = EngineContext::new(&plan.workspace)
            .with_parallel_processing_factor(self.config.parallel_processing_factor);

        info!(
            layout = ?plan.layout,
            stages = plan.stages.len(),
            inputs = request.hdfs.len(),
            masks = request.masks.len(),
            "Starting pipeline run"
        );

        let mut stages = Vec::with_capacity(plan.stages.len());
        for spec in &plan.stages {
            self.sink.note(&format!(
                "Starting step {}/{}: {} into {}... {}",
                spec.number,
                spec.total,
                spec.kind.description(),
                spec.output_dir.display(),
                localtime()
            ));

            let stage_start = Instant::now();
            let outcome = self.run_stage(spec, &ctx).await;
            let elapsed = stage_start.elapsed().as_secs_f64();

            let (items, setup_error) = match outcome {
                Ok(items) => (items, None),
                Err(e) if self.config.failure_policy == StageFailurePolicy::FailFast => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(stage = %spec.kind, error = %e, "Stage setup failed; continuing");
                    self.sink
                        .note(&format!("Step {} could not run: {}", spec.number, e));
                    (Vec::new(), Some(e.to_string()))
                }
            };

            self.sink.note(&format!(
                "Time for step {} = {:.2} seconds. {}",
                spec.number,
                elapsed,
                localtime()
            ));
            histogram!("modis_pipeline_stage_duration_ms", "stage" => spec.kind.as_str())
                .record(elapsed * 1000.0);

            let report = StageReport {
                number: spec.number,
                total_stages: spec.total,
                kind: spec.kind,
                output_dir: spec.output_dir.clone(),
                elapsed_secs: elapsed,
                items,
                setup_error,
            };
            let tally = report.tally();
            info!(
                stage = %spec.kind,
                completed = tally.completed,
                skipped = tally.skipped,
                failed = tally.failed,
                elapsed_secs = elapsed,
                "Stage finished"
            );
            stages.push(report);
        }

        let report = RunReport {
            run_id,
            preset: request.preset.clone(),
            layout: plan.layout,
            workspace: plan.workspace.clone(),
            started_at,
            finished_at: Utc::now(),
            elapsed_secs: run_start.elapsed().as_secs_f64(),
            stages,
        };

        let tally = report.tally();
        info!(
            completed = tally.completed,
            skipped = tally.skipped,
            failed = tally.failed,
            elapsed_secs = report.elapsed_secs,
            "Pipeline run finished"
        );

        Ok(report)
    }

    /// Resolve inputs, plan items and run them. Errors are setup failures.
    async fn run_stage(&self, spec: &StageSpec, ctx: &EngineContext) -> Result<Vec<ItemReport>> {
        let (inputs, source_dir) = match &spec.input {
            StageInput::Explicit(paths) => (paths.clone(), None),
            StageInput::Discover(dir) => (find_tifs(dir)?, Some(dir.as_path())),
        };

        if inputs.is_empty() {
            return Err(PipelineError::EmptyStage {
                stage: spec.kind.to_string(),
                dir: source_dir.unwrap_or(spec.output_dir.as_path()).to_path_buf(),
            });
        }

        let out = spec.output_dir.as_path();
        let items = match &spec.params {
            StageParams::Extract {
                sds_index,
                band_name,
            } => plan_extract(&inputs, out, *sds_index, band_name),
            StageParams::Mosaic {
                pixel_type,
                mosaic_method,
                colormap_mode,
            } => {
                let dir = source_dir.unwrap_or(out);
                let template =
                    LazyTemplate::new(self.config.template_policy, dir, inputs.clone());
                let items = plan_mosaic(
                    &inputs,
                    out,
                    &template,
                    *pixel_type,
                    *mosaic_method,
                    *colormap_mode,
                    self.grouping.as_ref(),
                )?;

                // Resolve the template up front so an unreadable one fails
                // the stage, not every item. Skipped when nothing is pending.
                if self.any_pending(&items).await? {
                    template.get(self.engine.as_ref(), ctx).await?;
                } else {
                    debug!(stage = %spec.kind, "All mosaic outputs present; template not read");
                }
                items
            }
            StageParams::Reproject { projection, prefix } => {
                plan_reproject(&inputs, out, prefix, projection)
            }
            StageParams::Clip { masks } => plan_clip(&inputs, out, masks),
            StageParams::SetNull { predicate, prefix } => {
                plan_set_null(&inputs, out, prefix, predicate)
            }
            StageParams::Multiply { factor, prefix } => {
                plan_multiply(&inputs, out, prefix, *factor)
            }
        };

        let runner = StageRunner::new(self.engine.as_ref(), ctx, self.sink.as_ref())
            .with_concurrency(self.config.concurrency)
            .with_skip_policy(self.config.skip_policy);

        Ok(runner.run(spec.kind, items).await)
    }

    async fn any_pending(&self, items: &[WorkItem]) -> Result<bool> {
        for item in items {
            if !output_is_done(&item.output, self.config.skip_policy).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::Preset;

    fn projection() -> ProjectionParams {
        ProjectionParams {
            target_srs: "EPSG:4326".to_string(),
            resampling: Default::default(),
            cell_size: None,
        }
    }

    fn request(selector: PresetSelector) -> RunRequest {
        RunRequest::from_selector(
            selector,
            &ParameterOverrides::default(),
            "/ws",
            vec![PathBuf::from("/in/A.hdf")],
            vec![PathBuf::from("/masks/basin.shp")],
            projection(),
        )
        .unwrap()
    }

    #[test]
    fn test_plan_five_stage_layout() {
        let run = PipelineRun::plan(
            &request(PresetSelector::Named(Preset::Mod13Ndvi)),
            &PipelineConfig::default(),
        )
        .unwrap();

        let kinds: Vec<_> = run.stages.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            [
                StageKind::Extract,
                StageKind::Mosaic,
                StageKind::Reproject,
                StageKind::Clip,
                StageKind::Multiply
            ]
        );
        assert_eq!(run.stages[4].output_dir, PathBuf::from("/ws/5_scale"));
        assert_eq!(
            run.stages[1].input,
            StageInput::Discover(PathBuf::from("/ws/1_extract"))
        );
        assert!(run.stages.iter().all(|s| s.total == 5));
    }

    #[test]
    fn test_plan_six_stage_wires_set_null() {
        let run = PipelineRun::plan(
            &request(PresetSelector::Named(Preset::Mod16Et)),
            &PipelineConfig::default(),
        )
        .unwrap();

        assert_eq!(run.stages.len(), 6);
        let set_null = &run.stages[4];
        assert_eq!(set_null.kind, StageKind::SetNull);
        assert_eq!(set_null.output_dir, PathBuf::from("/ws/5_setn"));
        assert_eq!(set_null.input, StageInput::Discover(PathBuf::from("/ws/4_clip")));
        assert_eq!(
            run.stages[5].input,
            StageInput::Discover(PathBuf::from("/ws/5_setn"))
        );
    }

    #[test]
    fn test_preset_cell_size_fills_projection() {
        let req = request(PresetSelector::Named(Preset::Mod11a2Lst));
        assert_eq!(
            req.projection.cell_size,
            Some(raster_engine::CellSize::square(1000.0))
        );

        let req = RunRequest::from_selector(
            PresetSelector::Named(Preset::Mod11a2Lst),
            &ParameterOverrides::default(),
            "/ws",
            vec![PathBuf::from("a.hdf")],
            vec![PathBuf::from("m.shp")],
            ProjectionParams {
                cell_size: Some(raster_engine::CellSize::square(250.0)),
                ..projection()
            },
        )
        .unwrap();
        assert_eq!(
            req.projection.cell_size,
            Some(raster_engine::CellSize::square(250.0))
        );
    }

    #[test]
    fn test_absolute_anchors_relative_paths() {
        let cwd = std::env::current_dir().unwrap();
        let mut req = request(PresetSelector::Named(Preset::Mod13Ndvi));
        req.workspace = PathBuf::from("ws");
        req.hdfs = vec![PathBuf::from("in/A.hdf"), PathBuf::from("/in/B.hdf")];
        req.masks = vec![PathBuf::from("M.shp")];

        let req = req.absolute().unwrap();
        assert_eq!(req.workspace, cwd.join("ws"));
        assert_eq!(req.hdfs, [cwd.join("in/A.hdf"), PathBuf::from("/in/B.hdf")]);
        assert_eq!(req.masks, [cwd.join("M.shp")]);

        let run = PipelineRun::plan(&req, &PipelineConfig::default()).unwrap();
        assert_eq!(run.stages[0].output_dir, cwd.join("ws/1_extract"));
    }

    #[test]
    fn test_request_validation() {
        let mut req = request(PresetSelector::Named(Preset::Mod13Ndvi));
        req.masks.clear();
        assert!(matches!(
            PipelineRun::plan(&req, &PipelineConfig::default()),
            Err(PipelineError::InvalidParameter(_))
        ));

        let mut req = request(PresetSelector::Named(Preset::Mod13Ndvi));
        req.hdfs.clear();
        assert!(req.validate().is_err());

        let mut req = request(PresetSelector::Named(Preset::Mod13Ndvi));
        req.projection.target_srs = " ".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_plan_uses_configured_prefixes() {
        let mut config = PipelineConfig::default();
        config.prefixes.reproject = "proj_".to_string();
        let run = PipelineRun::plan(&request(PresetSelector::Named(Preset::Mod13Evi)), &config)
            .unwrap();

        match &run.stages[2].params {
            StageParams::Reproject { prefix, .. } => assert_eq!(prefix, "proj_"),
            other => panic!("unexpected params {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_dirs_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(PresetSelector::Named(Preset::Mod16Pet));
        req.workspace = dir.path().join("ws");

        let run = PipelineRun::plan(&req, &PipelineConfig::default()).unwrap();
        run.create_dirs().await.unwrap();
        run.create_dirs().await.unwrap();

        for name in ["1_extract", "2_mosaic", "3_reproject", "4_clip", "5_setn", "6_scale"] {
            assert!(req.workspace.join(name).is_dir(), "{} missing", name);
        }
    }
}
