//! MODIS batch preprocessing CLI.
//!
//! Runs HDF granules through extract, mosaic, reproject, clip, optional
//! masking and scaling with the GDAL command-line tools. A run is
//! described by a YAML job file, by command-line options, or by both
//! (options override the job file).

mod job;

use anyhow::{Context, Result};
use clap::Parser;
use modis_pipeline::{
    ItemOutcome, Pipeline, PipelineConfig, PipelineRun, RunReport, StageFailurePolicy,
    TemplatePolicy, TracingSink,
};
use raster_engine::{CellSize, GdalCliEngine, NodataPredicate, PixelType, ResamplingMethod};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use job::{load_job_config, validate_job_config, JobConfig};

#[derive(Parser, Debug)]
#[command(name = "modis-batch")]
#[command(about = "Batch preprocessing of MODIS HDF granules")]
struct Args {
    /// YAML job file
    #[arg(short, long, env = "MODIS_JOB")]
    job: Option<PathBuf>,

    /// Preset (MOD13_NDVI, MOD13_EVI, MOD16_ET, MOD16_PET, MOD11A2_LST,
    /// MOD17A2_GPP, MOD17A3_NPP, MOD15A2_LAI) or custom
    #[arg(short, long)]
    preset: Option<String>,

    /// Workspace root for the stage directories
    #[arg(short, long)]
    workspace: Option<String>,

    /// HDF input (repeatable)
    #[arg(long = "hdf")]
    hdfs: Vec<String>,

    /// Directory searched for *.hdf inputs
    #[arg(long)]
    hdf_dir: Option<String>,

    /// Search subdirectories of --hdf-dir too
    #[arg(long)]
    recursive: bool,

    /// Clip mask (repeatable)
    #[arg(short, long = "mask")]
    masks: Vec<String>,

    /// Target coordinate system (EPSG code, WKT or .prj file)
    #[arg(long)]
    target_srs: Option<String>,

    /// Resampling method (NEAREST, BILINEAR, CUBIC, MAJORITY)
    #[arg(long)]
    resampling: Option<ResamplingMethod>,

    /// Output cell size, '<size>' or '<x> <y>'
    #[arg(long)]
    cell_size: Option<CellSize>,

    /// Subdataset index to extract
    #[arg(long)]
    sds_index: Option<u32>,

    /// Band name used in extracted file names
    #[arg(long)]
    band_name: Option<String>,

    /// Mosaic pixel type, e.g. 16_BIT_SIGNED
    #[arg(long)]
    pixel_type: Option<PixelType>,

    /// Scale factor applied in the last stage
    #[arg(long)]
    scale_factor: Option<f64>,

    /// Cells to set to nodata, e.g. "VALUE > 32700"
    #[arg(long)]
    nodata: Option<NodataPredicate>,

    /// Work items in flight per stage
    #[arg(long)]
    concurrency: Option<usize>,

    /// How the mosaic template raster is chosen (first, most_common, largest)
    #[arg(long)]
    template_policy: Option<TemplatePolicy>,

    /// Abort when a stage cannot be set up instead of continuing
    #[arg(long)]
    fail_fast: bool,

    /// Print the planned stages as JSON and exit
    #[arg(long)]
    plan: bool,

    /// Write the JSON run report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Write Prometheus metrics of the run to this file
    #[arg(long)]
    metrics_file: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,
}

impl Args {
    /// Apply command-line values on top of a job.
    fn overlay(&self, job: &mut JobConfig) {
        if let Some(preset) = &self.preset {
            job.preset = preset.clone();
        }
        if let Some(workspace) = &self.workspace {
            job.workspace = workspace.clone();
        }
        if !self.hdfs.is_empty() {
            job.inputs.hdfs = self.hdfs.clone();
        }
        if let Some(dir) = &self.hdf_dir {
            job.inputs.hdf_dir = Some(dir.clone());
        }
        if self.recursive {
            job.inputs.recursive = true;
        }
        if !self.masks.is_empty() {
            job.masks = self.masks.clone();
        }
        if let Some(srs) = &self.target_srs {
            job.projection.target_srs = srs.clone();
        }
        if let Some(resampling) = self.resampling {
            job.projection.resampling = resampling;
        }
        if self.cell_size.is_some() {
            job.projection.cell_size = self.cell_size;
        }

        let overrides = &mut job.overrides;
        overrides.sds_index = self.sds_index.or(overrides.sds_index);
        overrides.band_name = self.band_name.clone().or(overrides.band_name.take());
        overrides.pixel_type = self.pixel_type.or(overrides.pixel_type);
        overrides.scale_factor = self.scale_factor.or(overrides.scale_factor);
        overrides.nodata = self.nodata.or(overrides.nodata);
    }

    fn pipeline_config(&self, job: &JobConfig) -> PipelineConfig {
        let mut config = job.pipeline_config();
        if let Some(n) = self.concurrency {
            config.concurrency = n;
        }
        if let Some(policy) = self.template_policy {
            config.template_policy = policy;
        }
        if self.fail_fast {
            config.failure_policy = StageFailurePolicy::FailFast;
        }
        config
    }
}

fn init_tracing(args: &Args) -> Result<()> {
    // Accepts a bare level or full directives, e.g. "info,raster_engine=debug".
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr so --plan output stays parseable.
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if args.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args)?;

    let mut job = match &args.job {
        Some(path) => {
            let job = load_job_config(path)?;
            info!(job = %path.display(), preset = %job.preset, "Loaded job file");
            job
        }
        None => JobConfig::default(),
    };
    args.overlay(&mut job);
    validate_job_config(&job)?;

    let config = args.pipeline_config(&job);
    config.validate().context("Invalid pipeline settings")?;
    let request = job.to_run_request()?;

    if args.plan {
        let plan = PipelineRun::plan(&request, &config)?;
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(ExitCode::SUCCESS);
    }

    let prometheus = match &args.metrics_file {
        Some(_) => Some(
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .context("Failed to install Prometheus recorder")?,
        ),
        None => None,
    };

    let engine = GdalCliEngine::new(job.engine.clone());
    match engine.probe().await {
        Ok(version) => info!(version = %version, "GDAL available"),
        Err(e) => warn!(error = %e, "GDAL probe failed; stages will likely fail"),
    }

    info!(
        preset = %request.preset,
        workspace = %request.workspace.display(),
        inputs = request.hdfs.len(),
        masks = request.masks.len(),
        concurrency = config.concurrency,
        "Starting MODIS batch run"
    );

    let pipeline = Pipeline::new(Arc::new(engine), Arc::new(TracingSink), config)?;
    let report = pipeline.run(&request).await?;

    if let Some(path) = &args.report {
        write_report(path, &report)?;
        info!(path = %path.display(), "Wrote run report");
    }
    if let (Some(path), Some(handle)) = (&args.metrics_file, &prometheus) {
        std::fs::write(path, handle.render())
            .with_context(|| format!("Failed to write metrics to {:?}", path))?;
    }

    print_summary(&report);

    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        error!(run_id = %report.run_id, "Run finished with failures");
        Ok(ExitCode::from(2))
    }
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write report to {:?}", path))
}

fn print_summary(report: &RunReport) {
    println!(
        "Run {} ({}, {:?}) finished in {:.1}s",
        report.run_id, report.preset, report.layout, report.elapsed_secs
    );
    for stage in &report.stages {
        let tally = stage.tally();
        println!(
            "  {}/{} {:<10} completed {:>4}  skipped {:>4}  failed {:>4}  {:.1}s",
            stage.number,
            stage.total_stages,
            stage.kind.as_str(),
            tally.completed,
            tally.skipped,
            tally.failed,
            stage.elapsed_secs
        );
        if let Some(err) = &stage.setup_error {
            println!("      not run: {}", err);
        }
        for item in stage.failed_items() {
            if let ItemOutcome::Failed { error } = &item.outcome {
                println!("      {} failed: {}", item.label, error);
            }
        }
    }
}
