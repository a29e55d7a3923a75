//! Raster engine backed by the GDAL command-line utilities.
//!
//! Each operation shells out to one GDAL program through `tokio::process`:
//!
//! | operation | program |
//! |---|---|
//! | describe, subdataset listing | `gdalinfo -json` |
//! | extract | `gdal_translate` |
//! | mosaic FIRST/LAST, reproject, clip | `gdalwarp` |
//! | mosaic MINIMUM/MAXIMUM/MEAN/SUM, set null, multiply | `gdal_calc.py` |
//!
//! Argument lists are built by pure functions so they can be tested
//! without GDAL installed. Relative paths are resolved against the
//! context workspace before they reach a program; child processes keep
//! the caller's working directory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::engine::{EngineContext, MosaicRequest, ProjectionParams, RasterEngine};
use crate::error::{EngineError, Result};
use crate::types::{MosaicMethod, NodataPredicate, RasterDescription};

/// Value written to cells removed by `set_null`.
pub const SET_NULL_NODATA: f64 = -9999.0;

/// gdal_calc.py names its inputs A..Z.
const MAX_CALC_INPUTS: usize = 26;

/// Program names and shared options for [`GdalCliEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GdalCliConfig {
    pub gdalinfo: String,
    pub gdal_translate: String,
    pub gdalwarp: String,
    pub gdal_calc: String,
    /// GeoTIFF creation options applied to every output
    pub creation_options: Vec<String>,
}

impl Default for GdalCliConfig {
    fn default() -> Self {
        Self {
            gdalinfo: "gdalinfo".to_string(),
            gdal_translate: "gdal_translate".to_string(),
            gdalwarp: "gdalwarp".to_string(),
            gdal_calc: "gdal_calc.py".to_string(),
            creation_options: vec!["COMPRESS=LZW".to_string()],
        }
    }
}

/// [`RasterEngine`] that drives GDAL programs as child processes.
#[derive(Debug, Clone, Default)]
pub struct GdalCliEngine {
    config: GdalCliConfig,
}

impl GdalCliEngine {
    pub fn new(config: GdalCliConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GdalCliConfig {
        &self.config
    }

    /// Return the GDAL release string, e.g. `GDAL 3.8.4, released 2024/02/08`.
    pub async fn probe(&self) -> Result<String> {
        let ctx = EngineContext::default();
        let stdout = self
            .run(&ctx, &self.config.gdalinfo, vec!["--version".to_string()])
            .await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    /// Run a program and return its stdout.
    async fn run(&self, ctx: &EngineContext, program: &str, args: Vec<String>) -> Result<Vec<u8>> {
        debug!(program = %program, args = ?args, "Running GDAL command");

        let mut command = Command::new(program);
        command.args(&args).kill_on_drop(true);

        let threads = match ctx.parallel_processing_factor {
            0 => "ALL_CPUS".to_string(),
            n => n.to_string(),
        };
        command.env("GDAL_NUM_THREADS", threads);

        let output = command.output().await.map_err(|source| EngineError::Spawn {
            program: program.to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(EngineError::CommandFailed {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    async fn gdalinfo(&self, ctx: &EngineContext, path: &Path) -> Result<Vec<u8>> {
        self.run(ctx, &self.config.gdalinfo, vec!["-json".to_string(), path_arg(path)])
            .await
    }
}

#[async_trait]
impl RasterEngine for GdalCliEngine {
    #[instrument(skip_all, fields(src = %src.display()))]
    async fn extract_subdataset(
        &self,
        ctx: &EngineContext,
        src: &Path,
        index: Option<u32>,
        out: &Path,
    ) -> Result<PathBuf> {
        let (src, out) = (ctx.resolve(src), ctx.resolve(out));
        let info = self.gdalinfo(ctx, &src).await?;
        let subdatasets = parse_subdatasets(&info)?;
        let source = select_subdataset(&src, &subdatasets, index)?;

        let args = translate_args(&source, &out, &self.config.creation_options);
        self.run(ctx, &self.config.gdal_translate, args).await?;
        Ok(out)
    }

    async fn describe_raster(
        &self,
        ctx: &EngineContext,
        path: &Path,
    ) -> Result<RasterDescription> {
        let info = self.gdalinfo(ctx, &ctx.resolve(path)).await?;
        parse_description(&info)
    }

    #[instrument(
        skip(self, ctx, request),
        fields(out = %request.out_name, members = request.members.len())
    )]
    async fn mosaic_to_raster(&self, ctx: &EngineContext, request: &MosaicRequest) -> Result<()> {
        let request = &resolve_request(ctx, request);
        if request.colormap_mode != Default::default() {
            debug!(mode = %request.colormap_mode, "Colormap mode has no GDAL equivalent, ignoring");
        }

        match request.mosaic_method {
            MosaicMethod::First | MosaicMethod::Last => {
                let args = mosaic_warp_args(request, &self.config.creation_options);
                self.run(ctx, &self.config.gdalwarp, args).await?;
            }
            MosaicMethod::Blend => {
                return Err(EngineError::unsupported(
                    "mosaic method BLEND is not available through the GDAL command-line tools",
                ));
            }
            _ => {
                let args = mosaic_calc_args(request, &self.config.creation_options)?;
                self.run(ctx, &self.config.gdal_calc, args).await?;
            }
        }

        Ok(())
    }

    async fn project_raster(
        &self,
        ctx: &EngineContext,
        src: &Path,
        out: &Path,
        params: &ProjectionParams,
    ) -> Result<()> {
        let (src, out) = (ctx.resolve(src), ctx.resolve(out));
        let args = project_args(&src, &out, params, &self.config.creation_options);
        self.run(ctx, &self.config.gdalwarp, args).await?;
        Ok(())
    }

    async fn clip_by_geometry(
        &self,
        ctx: &EngineContext,
        src: &Path,
        out: &Path,
        mask: &Path,
    ) -> Result<()> {
        let (src, out, mask) = (ctx.resolve(src), ctx.resolve(out), ctx.resolve(mask));
        let args = clip_args(&src, &out, &mask, &self.config.creation_options);
        self.run(ctx, &self.config.gdalwarp, args).await?;
        Ok(())
    }

    async fn set_null(
        &self,
        ctx: &EngineContext,
        src: &Path,
        out: &Path,
        predicate: &NodataPredicate,
    ) -> Result<()> {
        let expr = format!(
            "where(A {} {}, {}, A)",
            predicate.op.numpy_symbol(),
            predicate.threshold,
            SET_NULL_NODATA
        );
        let (src, out) = (ctx.resolve(src), ctx.resolve(out));
        let mut args = calc_args(
            &[src.as_path()],
            &out,
            &expr,
            "Float32",
            &self.config.creation_options,
        );
        args.push(format!("--NoDataValue={}", SET_NULL_NODATA));
        self.run(ctx, &self.config.gdal_calc, args).await?;
        Ok(())
    }

    async fn multiply(
        &self,
        ctx: &EngineContext,
        src: &Path,
        out: &Path,
        factor: f64,
    ) -> Result<()> {
        let expr = format!("A*{}", factor);
        let (src, out) = (ctx.resolve(src), ctx.resolve(out));
        let args = calc_args(
            &[src.as_path()],
            &out,
            &expr,
            "Float32",
            &self.config.creation_options,
        );
        self.run(ctx, &self.config.gdal_calc, args).await?;
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn resolve_request(ctx: &EngineContext, request: &MosaicRequest) -> MosaicRequest {
    MosaicRequest {
        members: request.members.iter().map(|p| ctx.resolve(p)).collect(),
        out_dir: ctx.resolve(&request.out_dir),
        ..request.clone()
    }
}

/// Pick the GDAL source name for a subdataset index.
///
/// Containers without subdatasets are single-layer products and are read
/// directly when the index is absent or 0.
fn select_subdataset(src: &Path, subdatasets: &[String], index: Option<u32>) -> Result<String> {
    if subdatasets.is_empty() {
        return match index {
            None | Some(0) => Ok(path_arg(src)),
            Some(i) => Err(EngineError::MissingSubdataset {
                path: src.to_path_buf(),
                index: i,
                available: 0,
            }),
        };
    }

    let i = index.unwrap_or(0);
    subdatasets
        .get(i as usize)
        .cloned()
        .ok_or_else(|| EngineError::MissingSubdataset {
            path: src.to_path_buf(),
            index: i,
            available: subdatasets.len(),
        })
}

#[derive(Debug, Deserialize)]
struct GdalInfo {
    #[serde(rename = "coordinateSystem")]
    coordinate_system: Option<CoordinateSystem>,
    #[serde(rename = "geoTransform")]
    geo_transform: Option<Vec<f64>>,
    #[serde(default)]
    bands: Vec<serde_json::Value>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CoordinateSystem {
    #[serde(default)]
    wkt: String,
}

fn parse_description(json: &[u8]) -> Result<RasterDescription> {
    let info: GdalInfo = serde_json::from_slice(json)?;

    let cell_width = info
        .geo_transform
        .as_ref()
        .and_then(|gt| gt.get(1))
        .map(|w| w.abs())
        .ok_or_else(|| EngineError::invalid_output("gdalinfo reported no geotransform"))?;

    let spatial_reference = info.coordinate_system.map(|cs| cs.wkt).unwrap_or_default();
    if spatial_reference.is_empty() {
        warn!("Raster has no spatial reference");
    }

    Ok(RasterDescription {
        spatial_reference,
        cell_width,
        band_count: info.bands.len() as u32,
    })
}

/// Subdataset names in index order (`SUBDATASET_1_NAME` is index 0).
fn parse_subdatasets(json: &[u8]) -> Result<Vec<String>> {
    let info: GdalInfo = serde_json::from_slice(json)?;

    let Some(domain) = info.metadata.get("SUBDATASETS").and_then(|v| v.as_object()) else {
        return Ok(Vec::new());
    };

    let mut named: Vec<(u32, String)> = domain
        .iter()
        .filter_map(|(key, value)| {
            let n = key
                .strip_prefix("SUBDATASET_")?
                .strip_suffix("_NAME")?
                .parse::<u32>()
                .ok()?;
            Some((n, value.as_str()?.to_string()))
        })
        .collect();
    named.sort_by_key(|(n, _)| *n);

    Ok(named.into_iter().map(|(_, name)| name).collect())
}

fn creation_option_args(flag: &str, options: &[String]) -> Vec<String> {
    options
        .iter()
        .flat_map(|co| [flag.to_string(), co.clone()])
        .collect()
}

fn translate_args(source: &str, out: &Path, creation_options: &[String]) -> Vec<String> {
    let mut args = vec!["-of".to_string(), "GTiff".to_string()];
    args.extend(creation_option_args("-co", creation_options));
    args.push(source.to_string());
    args.push(path_arg(out));
    args
}

/// Ordered mosaic: gdalwarp lets later inputs overwrite earlier ones.
fn mosaic_warp_args(request: &MosaicRequest, creation_options: &[String]) -> Vec<String> {
    let mut args = vec!["-overwrite".to_string()];

    if !request.template.spatial_reference.is_empty() {
        args.push("-t_srs".to_string());
        args.push(request.template.spatial_reference.clone());
    }

    let width = request.template.cell_width.to_string();
    args.extend(["-tr".to_string(), width.clone(), width]);
    args.extend(["-ot".to_string(), request.pixel_type.gdal_type().to_string()]);
    args.extend(creation_option_args("-co", creation_options));
    if let Some(nbits) = request.pixel_type.nbits() {
        args.extend(["-co".to_string(), format!("NBITS={}", nbits)]);
    }

    let members: Vec<String> = match request.mosaic_method {
        MosaicMethod::First => request.members.iter().rev().map(|p| path_arg(p)).collect(),
        _ => request.members.iter().map(|p| path_arg(p)).collect(),
    };
    args.extend(members);
    args.push(path_arg(&request.output_path()));
    args
}

/// Statistical mosaic through gdal_calc.py over the union extent.
fn mosaic_calc_args(request: &MosaicRequest, creation_options: &[String]) -> Result<Vec<String>> {
    let n = request.members.len();
    if n == 0 {
        return Err(EngineError::invalid_output("mosaic group has no members"));
    }
    if n > MAX_CALC_INPUTS {
        return Err(EngineError::unsupported(format!(
            "mosaic method {} supports at most {} members, group has {}",
            request.mosaic_method, MAX_CALC_INPUTS, n
        )));
    }
    if request.template.band_count > 1 {
        return Err(EngineError::unsupported(format!(
            "mosaic method {} only supports single-band rasters",
            request.mosaic_method
        )));
    }

    let letters: Vec<String> = (0..n)
        .map(|i| char::from(b'A' + i as u8).to_string())
        .collect();

    let expr = match request.mosaic_method {
        MosaicMethod::Maximum => fold_expr("maximum", &letters),
        MosaicMethod::Minimum => fold_expr("minimum", &letters),
        MosaicMethod::Sum => letters.join("+"),
        MosaicMethod::Mean => format!("({})/{}", letters.join("+"), n),
        other => {
            return Err(EngineError::unsupported(format!(
                "mosaic method {} is not a statistical method",
                other
            )))
        }
    };

    let members: Vec<&Path> = request.members.iter().map(|p| p.as_path()).collect();
    let mut args = calc_args(
        &members,
        &request.output_path(),
        &expr,
        request.pixel_type.gdal_type(),
        creation_options,
    );
    args.push("--extent=union".to_string());
    if let Some(nbits) = request.pixel_type.nbits() {
        args.push(format!("--co=NBITS={}", nbits));
    }
    Ok(args)
}

/// `maximum(A,maximum(B,C))` style nesting of a binary numpy function.
fn fold_expr(func: &str, letters: &[String]) -> String {
    match letters {
        [] => String::new(),
        [only] => only.clone(),
        [first, rest @ ..] => format!("{}({},{})", func, first, fold_expr(func, rest)),
    }
}

fn calc_args(
    inputs: &[&Path],
    out: &Path,
    expr: &str,
    data_type: &str,
    creation_options: &[String],
) -> Vec<String> {
    let mut args = Vec::new();
    for (i, input) in inputs.iter().enumerate() {
        args.push(format!("-{}", char::from(b'A' + i as u8)));
        args.push(path_arg(input));
    }
    args.push(format!("--outfile={}", path_arg(out)));
    args.push(format!("--calc={}", expr));
    args.push(format!("--type={}", data_type));
    args.extend(creation_options.iter().map(|co| format!("--co={}", co)));
    args.push("--overwrite".to_string());
    args
}

fn project_args(
    src: &Path,
    out: &Path,
    params: &ProjectionParams,
    creation_options: &[String],
) -> Vec<String> {
    let mut args = vec![
        "-overwrite".to_string(),
        "-t_srs".to_string(),
        params.target_srs.clone(),
        "-r".to_string(),
        params.resampling.gdal_name().to_string(),
    ];
    if let Some(cell) = params.cell_size {
        args.extend(["-tr".to_string(), cell.x.to_string(), cell.y.to_string()]);
    }
    args.extend(creation_option_args("-co", creation_options));
    args.push(path_arg(src));
    args.push(path_arg(out));
    args
}

fn clip_args(src: &Path, out: &Path, mask: &Path, creation_options: &[String]) -> Vec<String> {
    let mut args = vec![
        "-overwrite".to_string(),
        "-cutline".to_string(),
        path_arg(mask),
        "-crop_to_cutline".to_string(),
    ];
    args.extend(creation_option_args("-co", creation_options));
    args.push(path_arg(src));
    args.push(path_arg(out));
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CellSize, ColormapMode, PixelType, ResamplingMethod};

    const MOD13_INFO: &str = r#"{
        "description": "MOD13Q1.A2020001.h26v05.006.hdf",
        "driverShortName": "HDF4",
        "metadata": {
            "": {"HDFEOSVersion": "HDFEOS_V2.19"},
            "SUBDATASETS": {
                "SUBDATASET_2_NAME": "HDF4_EOS:EOS_GRID:\"a.hdf\":MODIS_Grid_16DAY_250m_500m_VI:250m 16 days EVI",
                "SUBDATASET_1_DESC": "[4800x4800] 250m 16 days NDVI (16-bit integer)",
                "SUBDATASET_1_NAME": "HDF4_EOS:EOS_GRID:\"a.hdf\":MODIS_Grid_16DAY_250m_500m_VI:250m 16 days NDVI",
                "SUBDATASET_10_NAME": "HDF4_EOS:EOS_GRID:\"a.hdf\":MODIS_Grid_16DAY_250m_500m_VI:250m 16 days pixel reliability"
            }
        },
        "bands": []
    }"#;

    const TIF_INFO: &str = r#"{
        "coordinateSystem": {"wkt": "PROJCRS[\"unnamed\",BASEGEOGCRS[\"Unknown datum based upon the custom spheroid\"]]"},
        "geoTransform": [10007554.677, 231.656358264, 0.0, 4447802.079, 0.0, -231.656358264],
        "bands": [{"band": 1, "type": "Int16"}]
    }"#;

    fn request(method: MosaicMethod, n: usize) -> MosaicRequest {
        MosaicRequest {
            members: (0..n).map(|i| PathBuf::from(format!("t{}.tif", i))).collect(),
            out_dir: PathBuf::from("2_mosaic"),
            out_name: "MOD13Q1.A2020001.NDVI.tif".to_string(),
            template: RasterDescription {
                spatial_reference: "WKT".to_string(),
                cell_width: 231.5,
                band_count: 1,
            },
            pixel_type: PixelType::I16,
            mosaic_method: method,
            colormap_mode: ColormapMode::First,
        }
    }

    #[test]
    fn test_parse_subdatasets_orders_by_index() {
        let names = parse_subdatasets(MOD13_INFO.as_bytes()).unwrap();
        assert_eq!(names.len(), 3);
        assert!(names[0].ends_with("NDVI"));
        assert!(names[1].ends_with("EVI"));
        assert!(names[2].ends_with("pixel reliability"));
    }

    #[test]
    fn test_parse_subdatasets_single_layer() {
        let names = parse_subdatasets(TIF_INFO.as_bytes()).unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn test_select_subdataset() {
        let names = vec!["sds1".to_string(), "sds2".to_string()];
        let src = Path::new("a.hdf");

        assert_eq!(select_subdataset(src, &names, Some(1)).unwrap(), "sds2");
        assert_eq!(select_subdataset(src, &names, None).unwrap(), "sds1");
        assert!(matches!(
            select_subdataset(src, &names, Some(5)),
            Err(EngineError::MissingSubdataset { index: 5, available: 2, .. })
        ));

        // Single-layer container is read directly
        assert_eq!(select_subdataset(src, &[], None).unwrap(), "a.hdf");
        assert_eq!(select_subdataset(src, &[], Some(0)).unwrap(), "a.hdf");
        assert!(select_subdataset(src, &[], Some(2)).is_err());
    }

    #[test]
    fn test_parse_description() {
        let desc = parse_description(TIF_INFO.as_bytes()).unwrap();
        assert!(desc.spatial_reference.starts_with("PROJCRS"));
        assert!((desc.cell_width - 231.656358264).abs() < 1e-9);
        assert_eq!(desc.band_count, 1);
    }

    #[test]
    fn test_parse_description_requires_geotransform() {
        let err = parse_description(MOD13_INFO.as_bytes()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOutput(_)));
    }

    #[test]
    fn test_mosaic_warp_args_first_reverses_members() {
        let last = mosaic_warp_args(&request(MosaicMethod::Last, 3), &[]);
        let first = mosaic_warp_args(&request(MosaicMethod::First, 3), &[]);

        let tail = |args: &[String]| args[args.len() - 4..args.len() - 1].to_vec();
        assert_eq!(tail(&last), vec!["t0.tif", "t1.tif", "t2.tif"]);
        assert_eq!(tail(&first), vec!["t2.tif", "t1.tif", "t0.tif"]);
        assert_eq!(last.last().unwrap(), "2_mosaic/MOD13Q1.A2020001.NDVI.tif");
        assert!(last.windows(2).any(|w| w == ["-ot", "Int16"]));
        assert!(last.windows(3).any(|w| w == ["-tr", "231.5", "231.5"]));
    }

    #[test]
    fn test_mosaic_calc_expressions() {
        let args = mosaic_calc_args(&request(MosaicMethod::Maximum, 3), &[]).unwrap();
        assert!(args.contains(&"--calc=maximum(A,maximum(B,C))".to_string()));
        assert!(args.contains(&"--extent=union".to_string()));
        assert!(args.contains(&"-C".to_string()));

        let args = mosaic_calc_args(&request(MosaicMethod::Mean, 2), &[]).unwrap();
        assert!(args.contains(&"--calc=(A+B)/2".to_string()));

        let args = mosaic_calc_args(&request(MosaicMethod::Minimum, 1), &[]).unwrap();
        assert!(args.contains(&"--calc=A".to_string()));
    }

    #[test]
    fn test_mosaic_calc_rejects_large_groups() {
        let err = mosaic_calc_args(&request(MosaicMethod::Sum, 27), &[]).unwrap_err();
        assert!(matches!(err, EngineError::Unsupported(_)));
    }

    #[test]
    fn test_project_args() {
        let params = ProjectionParams {
            target_srs: "EPSG:4326".to_string(),
            resampling: ResamplingMethod::Bilinear,
            cell_size: Some(CellSize::square(0.0025)),
        };
        let args = project_args(Path::new("in.tif"), Path::new("pr_in.tif"), &params, &[]);
        assert_eq!(
            args,
            vec![
                "-overwrite", "-t_srs", "EPSG:4326", "-r", "bilinear", "-tr", "0.0025", "0.0025",
                "in.tif", "pr_in.tif"
            ]
        );
    }

    #[test]
    fn test_clip_args_include_cutline() {
        let args = clip_args(
            Path::new("pr_a.tif"),
            Path::new("basin_a.tif"),
            Path::new("basin.shp"),
            &["COMPRESS=LZW".to_string()],
        );
        assert!(args.windows(2).any(|w| w == ["-cutline", "basin.shp"]));
        assert!(args.contains(&"-crop_to_cutline".to_string()));
        assert!(args.windows(2).any(|w| w == ["-co", "COMPRESS=LZW"]));
    }

    #[test]
    fn test_translate_args() {
        let args = translate_args("HDF4_EOS:EOS_GRID:x", Path::new("a.NDVI.tif"), &[]);
        assert_eq!(args, vec!["-of", "GTiff", "HDF4_EOS:EOS_GRID:x", "a.NDVI.tif"]);
    }
}
