//! Progress sinks and run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::preset::StageLayout;
use crate::stage::StageKind;

/// Receives human-readable progress lines. Reporting never fails the run.
pub trait ReportSink: Send + Sync {
    /// A per-item line, rendered as `index/total | message`.
    fn report(&self, message: &str, index: usize, total: usize);

    /// A line outside any item, such as a stage banner.
    fn note(&self, message: &str) {
        self.report(message, 0, 0);
    }
}

/// Emits every line as a tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn report(&self, message: &str, index: usize, total: usize) {
        info!(index, total, "{}/{} | {}", index, total, message);
    }

    fn note(&self, message: &str) {
        info!("{}", message);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn report(&self, _message: &str, _index: usize, _total: usize) {}

    fn note(&self, _message: &str) {}
}

/// One recorded sink call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Item {
        index: usize,
        total: usize,
        message: String,
    },
    Note(String),
}

/// Collects lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Item lines as `i/n | message`, in arrival order.
    pub fn lines(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::Item {
                    index,
                    total,
                    message,
                } => Some(format!("{}/{} | {}", index, total, message)),
                ProgressEvent::Note(_) => None,
            })
            .collect()
    }

    pub fn notes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::Note(message) => Some(message),
                ProgressEvent::Item { .. } => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    fn push(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

impl ReportSink for MemorySink {
    fn report(&self, message: &str, index: usize, total: usize) {
        self.push(ProgressEvent::Item {
            index,
            total,
            message: message.to_string(),
        });
    }

    fn note(&self, message: &str) {
        self.push(ProgressEvent::Note(message.to_string()));
    }
}

/// How a single work item ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Completed { elapsed_secs: f64 },
    Skipped,
    Failed { error: String },
}

impl ItemOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Skipped => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    /// 1-based position within the stage
    pub index: usize,
    /// Label the item was reported under
    pub label: String,
    pub output: PathBuf,
    pub outcome: ItemOutcome,
}

/// Outcome counts of one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTally {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl StageTally {
    pub fn total(&self) -> usize {
        self.completed + self.skipped + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// 1-based stage number
    pub number: usize,
    pub total_stages: usize,
    pub kind: StageKind,
    pub output_dir: PathBuf,
    pub elapsed_secs: f64,
    pub items: Vec<ItemReport>,
    /// Set when the stage could not be set up and ran no items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_error: Option<String>,
}

impl StageReport {
    pub fn tally(&self) -> StageTally {
        let mut tally = StageTally::default();
        for item in &self.items {
            match item.outcome {
                ItemOutcome::Completed { .. } => tally.completed += 1,
                ItemOutcome::Skipped => tally.skipped += 1,
                ItemOutcome::Failed { .. } => tally.failed += 1,
            }
        }
        tally
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &ItemReport> {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, ItemOutcome::Failed { .. }))
    }
}

/// Serializable result of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Preset label, or `custom`
    pub preset: String,
    pub layout: StageLayout,
    pub workspace: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub stages: Vec<StageReport>,
}

impl RunReport {
    /// Summed tally across stages.
    pub fn tally(&self) -> StageTally {
        self.stages.iter().fold(StageTally::default(), |acc, stage| {
            let t = stage.tally();
            StageTally {
                completed: acc.completed + t.completed,
                skipped: acc.skipped + t.skipped,
                failed: acc.failed + t.failed,
            }
        })
    }

    /// Whether every stage was set up and no item failed.
    pub fn is_clean(&self) -> bool {
        self.stages
            .iter()
            .all(|s| s.setup_error.is_none() && s.tally().failed == 0)
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(index: usize, outcome: ItemOutcome) -> ItemReport {
        ItemReport {
            index,
            label: format!("{}.tif", index),
            output: PathBuf::from(format!("out/{}.tif", index)),
            outcome,
        }
    }

    #[test]
    fn test_memory_sink_formats_lines() {
        let sink = MemorySink::new();
        sink.note("Starting step 1/5");
        sink.report("a.tif completed, time used 0.10s", 1, 2);
        sink.report("b.tif already exists", 2, 2);

        assert_eq!(
            sink.lines(),
            [
                "1/2 | a.tif completed, time used 0.10s",
                "2/2 | b.tif already exists"
            ]
        );
        assert_eq!(sink.notes(), ["Starting step 1/5"]);

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_stage_tally() {
        let report = StageReport {
            number: 1,
            total_stages: 5,
            kind: StageKind::Extract,
            output_dir: PathBuf::from("1_extract"),
            elapsed_secs: 0.0,
            items: vec![
                item(1, ItemOutcome::Completed { elapsed_secs: 0.5 }),
                item(2, ItemOutcome::Skipped),
                item(3, ItemOutcome::Failed {
                    error: "boom".to_string(),
                }),
            ],
            setup_error: None,
        };

        let tally = report.tally();
        assert_eq!(tally, StageTally { completed: 1, skipped: 1, failed: 1 });
        assert_eq!(tally.total(), 3);
        assert_eq!(report.failed_items().count(), 1);
    }

    #[test]
    fn test_item_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(ItemOutcome::Failed {
            error: "no such file".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "no such file");

        let json = serde_json::to_value(ItemOutcome::Skipped).unwrap();
        assert_eq!(json["status"], "skipped");
    }
}
