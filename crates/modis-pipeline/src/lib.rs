//! MODIS batch preprocessing pipeline.
//!
//! Turns raw MODIS HDF granules into analysis-ready rasters by running a
//! fixed sequence of stages against a [`RasterEngine`]:
//!
//! ```text
//! extract -> mosaic -> reproject -> clip -> [set null] -> scale
//! ```
//!
//! # Architecture
//!
//! - [`grouping`] derives per-date mosaic keys from tile file names
//! - [`preset`] resolves a product family into concrete stage parameters
//! - [`stage`] describes stages and plans their work items
//! - [`runner`] executes work items with skip-if-exists resumability and
//!   per-item error isolation
//! - [`orchestrator`] wires the stages together over a workspace directory
//!
//! Progress goes to an injected [`ReportSink`]; nothing here writes log
//! files directly.
//!
//! [`RasterEngine`]: raster_engine::RasterEngine

pub mod adapter;
pub mod config;
pub mod discovery;
pub mod error;
pub mod grouping;
pub mod orchestrator;
pub mod preset;
pub mod report;
pub mod runner;
pub mod stage;
pub mod template;

// Re-exports
pub use config::{OutputPrefixes, PipelineConfig, SkipPolicy, StageFailurePolicy};
pub use error::{PipelineError, Result};
pub use grouping::{
    group_files, group_key, group_paths, GroupingStrategy, ModisDateKey, MosaicGroups,
};
pub use orchestrator::{Pipeline, PipelineRun, RunRequest};
pub use preset::{
    resolve, resolve_selector, ParameterOverrides, Preset, PresetProfile, PresetSelector,
    ProductParameters, StageLayout,
};
pub use report::{
    ItemOutcome, ItemReport, MemorySink, NullSink, ProgressEvent, ReportSink, RunReport,
    StageReport, StageTally, TracingSink,
};
pub use runner::StageRunner;
pub use stage::{
    MosaicGroup, StageInput, StageKind, StageOperation, StageParams, StageSpec, WorkItem,
};
pub use template::{LazyTemplate, TemplatePolicy};
