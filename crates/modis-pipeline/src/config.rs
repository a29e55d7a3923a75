//! Configuration for pipeline execution.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, Result};
use crate::template::TemplatePolicy;

/// What to do when a stage cannot be set up (no inputs, unreadable
/// template, unreadable directory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageFailurePolicy {
    /// Warn, record the error on the stage report and continue
    #[default]
    Degrade,
    /// Abort the run with the error
    FailFast,
}

impl StageFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Degrade => "degrade",
            Self::FailFast => "fail_fast",
        }
    }
}

impl FromStr for StageFailurePolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "degrade" | "continue" => Ok(Self::Degrade),
            "fail_fast" | "failfast" | "abort" => Ok(Self::FailFast),
            _ => Err(PipelineError::InvalidConfig(format!(
                "unknown stage failure policy '{}' (expected degrade or fail_fast)",
                s
            ))),
        }
    }
}

impl fmt::Display for StageFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When an existing output counts as done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// Any existing file
    #[default]
    IfExists,
    /// Only files with content; zero-byte leftovers of an interrupted run
    /// are redone
    IfNonEmpty,
}

impl SkipPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IfExists => "if_exists",
            Self::IfNonEmpty => "if_non_empty",
        }
    }
}

impl FromStr for SkipPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "if_exists" | "exists" => Ok(Self::IfExists),
            "if_non_empty" | "non_empty" | "nonempty" => Ok(Self::IfNonEmpty),
            _ => Err(PipelineError::InvalidConfig(format!(
                "unknown skip policy '{}' (expected if_exists or if_non_empty)",
                s
            ))),
        }
    }
}

impl fmt::Display for SkipPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File name prefixes of the per-file stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputPrefixes {
    pub reproject: String,
    pub set_null: String,
    pub scale: String,
}

impl Default for OutputPrefixes {
    fn default() -> Self {
        Self {
            reproject: "pr_".to_string(),
            set_null: "sn_".to_string(),
            scale: String::new(),
        }
    }
}

/// Execution settings of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Work items in flight per stage; 1 runs strictly in order
    pub concurrency: usize,

    /// How the mosaic template raster is chosen
    pub template_policy: TemplatePolicy,

    pub failure_policy: StageFailurePolicy,

    pub skip_policy: SkipPolicy,

    pub prefixes: OutputPrefixes,

    /// Threads the engine may use inside one call; 0 lets it decide
    pub parallel_processing_factor: u32,

    /// Whether the engine tolerates concurrent calls. When false and
    /// `concurrency > 1`, engine calls are serialized.
    pub engine_reentrant: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            template_policy: TemplatePolicy::default(),
            failure_policy: StageFailurePolicy::default(),
            skip_policy: SkipPolicy::default(),
            prefixes: OutputPrefixes::default(),
            parallel_processing_factor: 0,
            engine_reentrant: false,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MODIS_CONCURRENCY") {
            if let Ok(n) = val.parse() {
                config.concurrency = n;
            }
        }

        if let Ok(val) = std::env::var("MODIS_TEMPLATE_POLICY") {
            if let Ok(policy) = val.parse() {
                config.template_policy = policy;
            }
        }

        if let Ok(val) = std::env::var("MODIS_FAILURE_POLICY") {
            if let Ok(policy) = val.parse() {
                config.failure_policy = policy;
            }
        }

        if let Ok(val) = std::env::var("MODIS_SKIP_POLICY") {
            if let Ok(policy) = val.parse() {
                config.skip_policy = policy;
            }
        }

        if let Ok(val) = std::env::var("MODIS_PARALLEL_PROCESSING_FACTOR") {
            if let Ok(n) = val.parse() {
                config.parallel_processing_factor = n;
            }
        }

        if let Ok(val) = std::env::var("MODIS_ENGINE_REENTRANT") {
            config.engine_reentrant = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "concurrency must be > 0".to_string(),
            ));
        }

        for (stage, prefix) in [
            ("reproject", &self.prefixes.reproject),
            ("set_null", &self.prefixes.set_null),
            ("scale", &self.prefixes.scale),
        ] {
            if prefix.contains(['/', '\\']) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{} prefix '{}' must not contain path separators",
                    stage, prefix
                )));
            }
        }

        Ok(())
    }

    /// Whether engine calls must be funneled through one at a time.
    pub fn needs_serialized_engine(&self) -> bool {
        self.concurrency > 1 && !self.engine_reentrant
    }
}
