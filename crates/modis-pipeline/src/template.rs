//! Choice of the template raster a mosaic takes its spatial reference,
//! cell width and band count from.

use raster_engine::{EngineContext, RasterDescription, RasterEngine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplatePolicy {
    /// First discovered raster
    #[default]
    First,
    /// The description shared by most rasters
    MostCommon,
    /// The largest file
    Largest,
}

impl TemplatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::MostCommon => "most_common",
            Self::Largest => "largest",
        }
    }
}

impl FromStr for TemplatePolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "first" => Ok(Self::First),
            "most_common" | "mostcommon" => Ok(Self::MostCommon),
            "largest" => Ok(Self::Largest),
            _ => Err(PipelineError::InvalidConfig(format!(
                "unknown template policy '{}' (expected first, most_common or largest)",
                s
            ))),
        }
    }
}

impl fmt::Display for TemplatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick and describe the template raster among `inputs`.
///
/// Ties always go to the earliest input.
pub async fn select_template(
    policy: TemplatePolicy,
    dir: &Path,
    inputs: &[PathBuf],
    engine: &dyn RasterEngine,
    ctx: &EngineContext,
) -> Result<(PathBuf, RasterDescription)> {
    let first = inputs
        .first()
        .ok_or_else(|| PipelineError::MissingRepresentativeInput(dir.to_path_buf()))?;

    match policy {
        TemplatePolicy::First => describe(engine, ctx, first).await,
        TemplatePolicy::Largest => {
            let mut best: Option<(&PathBuf, u64)> = None;
            for path in inputs {
                let size = tokio::fs::metadata(path)
                    .await
                    .map_err(|e| PipelineError::io(path, e))?
                    .len();
                if best.map_or(true, |(_, largest)| size > largest) {
                    best = Some((path, size));
                }
            }
            let path = best.map_or(first, |(p, _)| p);
            debug!(template = %path.display(), "Selected largest raster as mosaic template");
            describe(engine, ctx, path).await
        }
        TemplatePolicy::MostCommon => {
            // (description, count, first input carrying it)
            let mut seen: Vec<(RasterDescription, usize, &PathBuf)> = Vec::new();
            let mut first_error = None;

            for path in inputs {
                match engine.describe_raster(ctx, path).await {
                    Ok(desc) => match seen.iter_mut().find(|(d, _, _)| *d == desc) {
                        Some(entry) => entry.1 += 1,
                        None => seen.push((desc, 1, path)),
                    },
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to describe raster");
                        first_error.get_or_insert_with(|| PipelineError::engine(path, e));
                    }
                }
            }

            // max_by_key returns the last maximum; scan in reverse so the
            // earliest wins ties.
            match seen.into_iter().rev().max_by_key(|(_, count, _)| *count) {
                Some((desc, count, path)) => {
                    debug!(
                        template = %path.display(),
                        shared_by = count,
                        "Selected most common description as mosaic template"
                    );
                    Ok((path.clone(), desc))
                }
                None => Err(first_error.unwrap_or_else(|| {
                    PipelineError::MissingRepresentativeInput(dir.to_path_buf())
                })),
            }
        }
    }
}

/// A mosaic stage's template, selected on first use and shared by every
/// item of the stage.
///
/// A stage whose outputs all exist never resolves it, so re-runs make no
/// engine calls.
#[derive(Debug, Clone)]
pub struct LazyTemplate {
    policy: TemplatePolicy,
    dir: PathBuf,
    inputs: Arc<[PathBuf]>,
    cell: Arc<OnceCell<(PathBuf, RasterDescription)>>,
}

impl LazyTemplate {
    pub fn new(policy: TemplatePolicy, dir: impl Into<PathBuf>, inputs: Vec<PathBuf>) -> Self {
        Self {
            policy,
            dir: dir.into(),
            inputs: inputs.into(),
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// A template that is already known.
    pub fn resolved(path: impl Into<PathBuf>, desc: RasterDescription) -> Self {
        let path = path.into();
        Self {
            policy: TemplatePolicy::First,
            dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            inputs: Arc::from(vec![path.clone()]),
            cell: Arc::new(OnceCell::new_with(Some((path, desc)))),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.initialized()
    }

    /// Select and describe the template, or return the cached result.
    pub async fn get(
        &self,
        engine: &dyn RasterEngine,
        ctx: &EngineContext,
    ) -> Result<&RasterDescription> {
        let (_, desc) = self
            .cell
            .get_or_try_init(|| async {
                let (path, desc) =
                    select_template(self.policy, &self.dir, &self.inputs, engine, ctx).await?;
                info!(
                    template = %path.display(),
                    policy = %self.policy,
                    cell_width = desc.cell_width,
                    bands = desc.band_count,
                    "Mosaic template selected"
                );
                Ok::<_, PipelineError>((path, desc))
            })
            .await?;
        Ok(desc)
    }
}

async fn describe(
    engine: &dyn RasterEngine,
    ctx: &EngineContext,
    path: &Path,
) -> Result<(PathBuf, RasterDescription)> {
    let desc = engine
        .describe_raster(ctx, path)
        .await
        .map_err(|e| PipelineError::engine(path, e))?;
    Ok((path.to_path_buf(), desc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::FakeEngine;

    fn desc(width: f64) -> RasterDescription {
        RasterDescription {
            spatial_reference: "SINUSOIDAL".to_string(),
            cell_width: width,
            band_count: 1,
        }
    }

    #[tokio::test]
    async fn test_first_policy_describes_first_input() {
        let engine = FakeEngine::new();
        let inputs = vec![PathBuf::from("/w/a.tif"), PathBuf::from("/w/b.tif")];

        let (path, _) = select_template(
            TemplatePolicy::First,
            Path::new("/w"),
            &inputs,
            &engine,
            &EngineContext::default(),
        )
        .await
        .unwrap();

        assert_eq!(path, PathBuf::from("/w/a.tif"));
        assert_eq!(engine.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_inputs_is_missing_representative() {
        let engine = FakeEngine::new();
        let err = select_template(
            TemplatePolicy::First,
            Path::new("/w/1_extract"),
            &[],
            &engine,
            &EngineContext::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::MissingRepresentativeInput(_)));
    }

    #[tokio::test]
    async fn test_most_common_prefers_majority_then_earliest() {
        let engine = FakeEngine::new()
            .with_description("a.tif", desc(231.6))
            .with_description("b.tif", desc(463.3))
            .with_description("c.tif", desc(463.3));
        let inputs: Vec<PathBuf> = ["a.tif", "b.tif", "c.tif"].iter().map(PathBuf::from).collect();

        let (path, d) = select_template(
            TemplatePolicy::MostCommon,
            Path::new("."),
            &inputs,
            &engine,
            &EngineContext::default(),
        )
        .await
        .unwrap();

        assert_eq!(path, PathBuf::from("b.tif"));
        assert_eq!(d.cell_width, 463.3);
    }

    #[tokio::test]
    async fn test_most_common_tie_goes_to_earliest() {
        let engine = FakeEngine::new()
            .with_description("a.tif", desc(1.0))
            .with_description("b.tif", desc(2.0));
        let inputs: Vec<PathBuf> = ["a.tif", "b.tif"].iter().map(PathBuf::from).collect();

        let (path, _) = select_template(
            TemplatePolicy::MostCommon,
            Path::new("."),
            &inputs,
            &engine,
            &EngineContext::default(),
        )
        .await
        .unwrap();

        assert_eq!(path, PathBuf::from("a.tif"));
    }

    #[tokio::test]
    async fn test_largest_picks_biggest_file() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("small.tif");
        let big = dir.path().join("big.tif");
        std::fs::write(&small, b"x").unwrap();
        std::fs::write(&big, b"xxxxxxxx").unwrap();

        let engine = FakeEngine::new();
        let (path, _) = select_template(
            TemplatePolicy::Largest,
            dir.path(),
            &[small, big.clone()],
            &engine,
            &EngineContext::default(),
        )
        .await
        .unwrap();

        assert_eq!(path, big);
    }

    #[tokio::test]
    async fn test_lazy_template_describes_once() {
        let engine = FakeEngine::new();
        let ctx = EngineContext::default();
        let template = LazyTemplate::new(
            TemplatePolicy::First,
            "/w",
            vec![PathBuf::from("/w/a.tif"), PathBuf::from("/w/b.tif")],
        );
        let shared = template.clone();

        assert!(!template.is_resolved());
        template.get(&engine, &ctx).await.unwrap();
        shared.get(&engine, &ctx).await.unwrap();

        assert!(shared.is_resolved());
        assert_eq!(engine.count("describe"), 1);
    }

    #[tokio::test]
    async fn test_resolved_template_needs_no_engine() {
        let engine = FakeEngine::new();
        let template = LazyTemplate::resolved("/w/a.tif", desc(500.0));

        let d = template.get(&engine, &EngineContext::default()).await.unwrap();

        assert_eq!(d.cell_width, 500.0);
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("most-common".parse::<TemplatePolicy>().unwrap(), TemplatePolicy::MostCommon);
        assert_eq!("LARGEST".parse::<TemplatePolicy>().unwrap(), TemplatePolicy::Largest);
        assert!("biggest".parse::<TemplatePolicy>().is_err());
    }
}
