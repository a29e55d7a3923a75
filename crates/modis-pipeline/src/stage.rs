//! Stage descriptions and work-item planning.
//!
//! Planning is pure: given a stage's inputs it produces the ordered list of
//! [`WorkItem`]s, each carrying its output path and the engine operation
//! that produces it. Nothing here touches the filesystem or the engine.

use raster_engine::{
    ColormapMode, MosaicMethod, MosaicRequest, NodataPredicate, PixelType, ProjectionParams,
    RasterDescription,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::grouping::{group_paths, GroupingStrategy};
use crate::template::LazyTemplate;

/// Pipeline stage operations, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Extract,
    Mosaic,
    Reproject,
    Clip,
    SetNull,
    Multiply,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Mosaic => "mosaic",
            Self::Reproject => "reproject",
            Self::Clip => "clip",
            Self::SetNull => "set_null",
            Self::Multiply => "multiply",
        }
    }

    /// Directory name after the `N_` stage number.
    pub fn dir_suffix(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Mosaic => "mosaic",
            Self::Reproject => "reproject",
            Self::Clip => "clip",
            Self::SetNull => "setn",
            Self::Multiply => "scale",
        }
    }

    /// Banner wording.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Extract => "extract subdataset",
            Self::Mosaic => "mosaic raster",
            Self::Reproject => "reproject raster",
            Self::Clip => "clip raster",
            Self::SetNull => "exclude invalid value,",
            Self::Multiply => "raster times scale factor",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a stage's inputs come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageInput {
    /// A fixed list, e.g. the HDF containers of the extract stage
    Explicit(Vec<PathBuf>),
    /// Every `.tif` directly inside the directory, at stage start
    Discover(PathBuf),
}

/// Per-kind stage parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageParams {
    Extract {
        sds_index: Option<u32>,
        band_name: String,
    },
    Mosaic {
        pixel_type: PixelType,
        mosaic_method: MosaicMethod,
        colormap_mode: ColormapMode,
    },
    Reproject {
        projection: ProjectionParams,
        prefix: String,
    },
    Clip {
        masks: Vec<PathBuf>,
    },
    SetNull {
        predicate: NodataPredicate,
        prefix: String,
    },
    Multiply {
        factor: f64,
        prefix: String,
    },
}

impl StageParams {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Extract { .. } => StageKind::Extract,
            Self::Mosaic { .. } => StageKind::Mosaic,
            Self::Reproject { .. } => StageKind::Reproject,
            Self::Clip { .. } => StageKind::Clip,
            Self::SetNull { .. } => StageKind::SetNull,
            Self::Multiply { .. } => StageKind::Multiply,
        }
    }
}

/// One planned stage of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub kind: StageKind,
    /// 1-based position in the run
    pub number: usize,
    pub total: usize,
    pub input: StageInput,
    pub output_dir: PathBuf,
    pub params: StageParams,
}

impl StageSpec {
    pub fn new(
        number: usize,
        total: usize,
        input: StageInput,
        output_dir: PathBuf,
        params: StageParams,
    ) -> Self {
        Self {
            kind: params.kind(),
            number,
            total,
            input,
            output_dir,
            params,
        }
    }
}

/// One mosaic group awaiting its stage template.
#[derive(Debug, Clone)]
pub struct MosaicGroup {
    pub members: Vec<PathBuf>,
    pub out_dir: PathBuf,
    pub out_name: String,
    pub pixel_type: PixelType,
    pub mosaic_method: MosaicMethod,
    pub colormap_mode: ColormapMode,
}

impl MosaicGroup {
    /// Complete the engine request with the template description.
    pub fn request(&self, template: &RasterDescription) -> MosaicRequest {
        MosaicRequest {
            members: self.members.clone(),
            out_dir: self.out_dir.clone(),
            out_name: self.out_name.clone(),
            template: template.clone(),
            pixel_type: self.pixel_type,
            mosaic_method: self.mosaic_method,
            colormap_mode: self.colormap_mode,
        }
    }
}

/// The engine call that produces one output.
#[derive(Debug, Clone)]
pub enum StageOperation {
    Extract {
        src: PathBuf,
        index: Option<u32>,
    },
    Mosaic {
        group: MosaicGroup,
        template: LazyTemplate,
    },
    Reproject {
        src: PathBuf,
        params: ProjectionParams,
    },
    Clip {
        src: PathBuf,
        mask: PathBuf,
    },
    SetNull {
        src: PathBuf,
        predicate: NodataPredicate,
    },
    Multiply {
        src: PathBuf,
        factor: f64,
    },
}

/// One unit of stage work.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Name used in progress lines
    pub label: String,
    pub output: PathBuf,
    pub operation: StageOperation,
}

impl WorkItem {
    /// Item reported under its output path.
    fn at(output: PathBuf, operation: StageOperation) -> Self {
        Self {
            label: output.display().to_string(),
            output,
            operation,
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `<container stem>.<band>.tif`
pub fn extract_output_name(container: &Path, band_name: &str) -> String {
    format!("{}.{}.tif", file_stem(container), band_name)
}

/// `<mask stem>_<last '_' token of the raster stem>.tif`
pub fn clip_output_name(mask: &Path, raster: &Path) -> String {
    let raster_stem = file_stem(raster);
    let suffix = raster_stem.rsplit('_').next().unwrap_or_default();
    format!("{}_{}.tif", file_stem(mask), suffix)
}

/// `<prefix><file name>`
pub fn prefixed_name(prefix: &str, path: &Path) -> String {
    format!("{}{}", prefix, file_name(path))
}

pub fn plan_extract(
    containers: &[PathBuf],
    out_dir: &Path,
    sds_index: Option<u32>,
    band_name: &str,
) -> Vec<WorkItem> {
    containers
        .iter()
        .map(|src| {
            WorkItem::at(
                out_dir.join(extract_output_name(src, band_name)),
                StageOperation::Extract {
                    src: src.clone(),
                    index: sds_index,
                },
            )
        })
        .collect()
}

/// One item per mosaic group, in first-seen group order, reported under the
/// group key. All items share `template`.
pub fn plan_mosaic(
    inputs: &[PathBuf],
    out_dir: &Path,
    template: &LazyTemplate,
    pixel_type: PixelType,
    mosaic_method: MosaicMethod,
    colormap_mode: ColormapMode,
    strategy: &dyn GroupingStrategy,
) -> Result<Vec<WorkItem>> {
    let groups = group_paths(inputs, strategy)?;

    Ok(groups
        .iter()
        .map(|(key, members)| WorkItem {
            label: key.to_string(),
            output: out_dir.join(key),
            operation: StageOperation::Mosaic {
                group: MosaicGroup {
                    members: members.to_vec(),
                    out_dir: out_dir.to_path_buf(),
                    out_name: key.to_string(),
                    pixel_type,
                    mosaic_method,
                    colormap_mode,
                },
                template: template.clone(),
            },
        })
        .collect())
}

pub fn plan_reproject(
    inputs: &[PathBuf],
    out_dir: &Path,
    prefix: &str,
    projection: &ProjectionParams,
) -> Vec<WorkItem> {
    inputs
        .iter()
        .map(|src| {
            WorkItem::at(
                out_dir.join(prefixed_name(prefix, src)),
                StageOperation::Reproject {
                    src: src.clone(),
                    params: projection.clone(),
                },
            )
        })
        .collect()
}

/// Masks form the outer loop and rasters the inner one, so item `k` is
/// mask `k / rasters` applied to raster `k % rasters`.
pub fn plan_clip(inputs: &[PathBuf], out_dir: &Path, masks: &[PathBuf]) -> Vec<WorkItem> {
    masks
        .iter()
        .flat_map(|mask| {
            inputs.iter().map(move |src| {
                WorkItem::at(
                    out_dir.join(clip_output_name(mask, src)),
                    StageOperation::Clip {
                        src: src.clone(),
                        mask: mask.clone(),
                    },
                )
            })
        })
        .collect()
}

pub fn plan_set_null(
    inputs: &[PathBuf],
    out_dir: &Path,
    prefix: &str,
    predicate: &NodataPredicate,
) -> Vec<WorkItem> {
    inputs
        .iter()
        .map(|src| {
            WorkItem::at(
                out_dir.join(prefixed_name(prefix, src)),
                StageOperation::SetNull {
                    src: src.clone(),
                    predicate: *predicate,
                },
            )
        })
        .collect()
}

pub fn plan_multiply(
    inputs: &[PathBuf],
    out_dir: &Path,
    prefix: &str,
    factor: f64,
) -> Vec<WorkItem> {
    inputs
        .iter()
        .map(|src| {
            WorkItem::at(
                out_dir.join(prefixed_name(prefix, src)),
                StageOperation::Multiply {
                    src: src.clone(),
                    factor,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::ModisDateKey;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_extract_output_name() {
        assert_eq!(extract_output_name(Path::new("/in/A.hdf"), "NDVI"), "A.NDVI.tif");
        assert_eq!(
            extract_output_name(
                Path::new("MOD13Q1.A2020001.h08v05.006.2020018.hdf"),
                "NDVI"
            ),
            "MOD13Q1.A2020001.h08v05.006.2020018.NDVI.tif"
        );
    }

    #[test]
    fn test_clip_output_name() {
        assert_eq!(
            clip_output_name(
                Path::new("/masks/basin.shp"),
                Path::new("/ws/3_reproject/pr_2020001_2020016.NDVI.tif")
            ),
            "basin_2020016.NDVI.tif"
        );
        assert_eq!(
            clip_output_name(Path::new("basin.shp"), Path::new("pr_MOD13Q1.A2020001.NDVI.tif")),
            "basin_MOD13Q1.A2020001.NDVI.tif"
        );
        assert_eq!(
            clip_output_name(Path::new("basin.shp"), Path::new("plain.tif")),
            "basin_plain.tif"
        );
    }

    #[test]
    fn test_prefixed_name() {
        assert_eq!(prefixed_name("pr_", Path::new("/ws/2_mosaic/k.tif")), "pr_k.tif");
        assert_eq!(prefixed_name("", Path::new("k.tif")), "k.tif");
    }

    #[test]
    fn test_plan_extract() {
        let items = plan_extract(
            &paths(&["/in/A.hdf", "/in/B.hdf"]),
            Path::new("/ws/1_extract"),
            Some(1),
            "EVI",
        );
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].output, PathBuf::from("/ws/1_extract/A.EVI.tif"));
        assert_eq!(items[1].label, "/ws/1_extract/B.EVI.tif");
        assert!(matches!(
            items[0].operation,
            StageOperation::Extract { index: Some(1), .. }
        ));
    }

    #[test]
    fn test_plan_mosaic_one_item_per_group() {
        let inputs = paths(&[
            "/ws/1_extract/MOD13Q1.A2020001.h08v05.006.1.NDVI.tif",
            "/ws/1_extract/MOD13Q1.A2020001.h09v05.006.2.NDVI.tif",
            "/ws/1_extract/MOD13Q1.A2020017.h08v05.006.3.NDVI.tif",
        ]);
        let template = RasterDescription {
            spatial_reference: "SINUSOIDAL".to_string(),
            cell_width: 231.66,
            band_count: 1,
        };

        let items = plan_mosaic(
            &inputs,
            Path::new("/ws/2_mosaic"),
            &LazyTemplate::resolved(&inputs[0], template.clone()),
            PixelType::I16,
            MosaicMethod::Maximum,
            ColormapMode::First,
            &ModisDateKey,
        )
        .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label, "MOD13Q1.A2020001.NDVI.tif");
        assert_eq!(items[0].output, PathBuf::from("/ws/2_mosaic/MOD13Q1.A2020001.NDVI.tif"));
        match &items[0].operation {
            StageOperation::Mosaic { group, .. } => {
                let request = group.request(&template);
                assert_eq!(request.members.as_slice(), &inputs[..2]);
                assert_eq!(request.output_path(), items[0].output);
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_plan_clip_masks_outer_rasters_inner() {
        let rasters = paths(&["pr_a_2020001.tif", "pr_a_2020017.tif"]);
        let masks = paths(&["basin.shp", "county.shp"]);

        let items = plan_clip(&rasters, Path::new("4_clip"), &masks);
        let outputs: Vec<_> = items
            .iter()
            .map(|i| i.output.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            outputs,
            [
                "4_clip/basin_2020001.tif",
                "4_clip/basin_2020017.tif",
                "4_clip/county_2020001.tif",
                "4_clip/county_2020017.tif",
            ]
        );
    }

    #[test]
    fn test_plan_prefix_stages() {
        let inputs = paths(&["/ws/4_clip/basin_2020001.NDVI.tif"]);

        let items = plan_reproject(
            &inputs,
            Path::new("/ws/3_reproject"),
            "pr_",
            &ProjectionParams {
                target_srs: "EPSG:4326".to_string(),
                resampling: Default::default(),
                cell_size: None,
            },
        );
        assert_eq!(items[0].output, PathBuf::from("/ws/3_reproject/pr_basin_2020001.NDVI.tif"));

        let items = plan_set_null(
            &inputs,
            Path::new("/ws/5_setn"),
            "sn_",
            &NodataPredicate::greater_than(32700.0),
        );
        assert_eq!(items[0].output, PathBuf::from("/ws/5_setn/sn_basin_2020001.NDVI.tif"));

        let items = plan_multiply(&inputs, Path::new("/ws/5_scale"), "", 0.0001);
        assert_eq!(items[0].output, PathBuf::from("/ws/5_scale/basin_2020001.NDVI.tif"));
    }

    #[test]
    fn test_stage_params_kind() {
        let spec = StageSpec::new(
            6,
            6,
            StageInput::Discover(PathBuf::from("5_setn")),
            PathBuf::from("6_scale"),
            StageParams::Multiply {
                factor: 0.1,
                prefix: String::new(),
            },
        );
        assert_eq!(spec.kind, StageKind::Multiply);
        assert_eq!(spec.kind.dir_suffix(), "scale");
    }
}
