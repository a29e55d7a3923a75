//! Stage runner: executes the work items of one stage.
//!
//! Every item is checked against its output first so an interrupted run can
//! simply be restarted. A failing item is reported and the stage moves on;
//! nothing an item does can abort its siblings.

use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use raster_engine::{EngineContext, RasterEngine};
use std::time::Instant;
use tracing::{debug, warn};

use crate::adapter::dispatch;
use crate::config::SkipPolicy;
use crate::discovery::output_is_done;
use crate::error::PipelineError;
use crate::report::{ItemOutcome, ItemReport, ReportSink};
use crate::stage::{StageKind, WorkItem};

/// Runs work items against an engine and reports each outcome.
pub struct StageRunner<'a> {
    engine: &'a dyn RasterEngine,
    ctx: &'a EngineContext,
    sink: &'a dyn ReportSink,
    concurrency: usize,
    skip_policy: SkipPolicy,
}

impl<'a> StageRunner<'a> {
    pub fn new(
        engine: &'a dyn RasterEngine,
        ctx: &'a EngineContext,
        sink: &'a dyn ReportSink,
    ) -> Self {
        Self {
            engine,
            ctx,
            sink,
            concurrency: 1,
            skip_policy: SkipPolicy::default(),
        }
    }

    /// Items in flight at once; 0 is treated as 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_skip_policy(mut self, policy: SkipPolicy) -> Self {
        self.skip_policy = policy;
        self
    }

    /// Run all items, returning one report per item in item order.
    ///
    /// With concurrency 1 items run strictly one after another. Otherwise
    /// up to `concurrency` items are in flight; each keeps its original
    /// index and results are re-sorted before returning.
    pub async fn run(&self, kind: StageKind, items: Vec<WorkItem>) -> Vec<ItemReport> {
        let total = items.len();

        let mut reports: Vec<ItemReport> = stream::iter(items.into_iter().enumerate())
            .map(|(i, item)| self.run_item(kind, i + 1, total, item))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        reports.sort_by_key(|r| r.index);
        reports
    }

    async fn run_item(
        &self,
        kind: StageKind,
        index: usize,
        total: usize,
        item: WorkItem,
    ) -> ItemReport {
        let start = Instant::now();

        let outcome = match output_is_done(&item.output, self.skip_policy).await {
            Ok(true) => {
                self.sink
                    .report(&format!("{} already exists", item.label), index, total);
                ItemOutcome::Skipped
            }
            Ok(false) => match dispatch(self.engine, self.ctx, &item).await {
                Ok(()) => {
                    let elapsed = start.elapsed().as_secs_f64();
                    self.sink.report(
                        &format!("{} completed, time used {:.2}s", item.label, elapsed),
                        index,
                        total,
                    );
                    ItemOutcome::Completed {
                        elapsed_secs: elapsed,
                    }
                }
                Err(e) => self.fail(&item, &e, index, total),
            },
            Err(e) => self.fail(&item, &e, index, total),
        };

        counter!(
            "modis_pipeline_items_total",
            "stage" => kind.as_str(),
            "outcome" => outcome.label()
        )
        .increment(1);
        histogram!("modis_pipeline_item_duration_ms", "stage" => kind.as_str())
            .record(start.elapsed().as_secs_f64() * 1000.0);

        debug!(stage = %kind, index, total, outcome = outcome.label(), "Item finished");

        ItemReport {
            index,
            label: item.label,
            output: item.output,
            outcome,
        }
    }

    fn fail(
        &self,
        item: &WorkItem,
        err: &PipelineError,
        index: usize,
        total: usize,
    ) -> ItemOutcome {
        // The output path is already in the label; report only the cause.
        let message = match err {
            PipelineError::EngineOperationFailed { source, .. } => source.to_string(),
            other => other.to_string(),
        };

        warn!(item = %item.label, error = %message, "Item failed");
        self.sink
            .report(&format!("{} errored, {}", item.label, message), index, total);

        ItemOutcome::Failed { error: message }
    }
}
