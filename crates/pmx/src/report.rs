//! 🧾 The Migration Report: one per run, one section per collection, and the first few
//! reasons things went wrong at each stage, so nobody has to open a 40 MB artifact to
//! find out the agency reference was misspelled.

use std::collections::HashSet;
use std::path::PathBuf;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use serde::Serialize;

use crate::common::RecordFailure;
use crate::export::ExportResult;
use crate::import::{BatchPlan, ImportFailure, ImportResult, ValidationMismatch};
use crate::progress::format_number;
use crate::supervisors::MigrationStage;
use crate::transforms::TransformResult;

pub const DEFAULT_FAILURE_SAMPLE_SIZE: usize = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionReport {
    pub collection: String,
    /// Where the state machine stopped: `Done` or `Failed`.
    pub state: MigrationStage,
    /// The stage that was running when the collection failed.
    pub failed_at: Option<MigrationStage>,
    pub error: Option<String>,

    pub exported: usize,
    pub export_failed: usize,
    pub transformed: usize,
    pub transform_failed: usize,
    pub imported: usize,
    pub import_failed: usize,
    /// Records read back and found identical. Zero when the read-back pass was skipped.
    pub validated: usize,
    pub validation_errors: usize,
    pub validation_skipped: bool,
    pub cancelled: bool,

    pub export_failures: Vec<RecordFailure>,
    pub transform_failures: Vec<RecordFailure>,
    pub import_failures: Vec<ImportFailure>,
    pub validation_failures: Vec<ValidationMismatch>,

    pub batch_plan: Option<BatchPlan>,
    /// Highest source id read; the resume cursor for a follow-up run.
    pub last_key: Option<String>,
    pub artifacts: Vec<PathBuf>,
    pub success: bool,

    #[serde(skip)]
    sample_size: usize,
}

impl CollectionReport {
    pub fn new(collection: &str, sample_size: usize) -> Self {
        Self {
            collection: collection.to_string(),
            state: MigrationStage::Exporting,
            failed_at: None,
            error: None,
            exported: 0,
            export_failed: 0,
            transformed: 0,
            transform_failed: 0,
            imported: 0,
            import_failed: 0,
            validated: 0,
            validation_errors: 0,
            validation_skipped: false,
            cancelled: false,
            export_failures: Vec::new(),
            transform_failures: Vec::new(),
            import_failures: Vec::new(),
            validation_failures: Vec::new(),
            batch_plan: None,
            last_key: None,
            artifacts: Vec::new(),
            success: false,
            sample_size,
        }
    }

    pub fn record_export(&mut self, export: &ExportResult) {
        self.exported = export.summary.valid;
        self.export_failed = export.summary.failed;
        self.export_failures = sample(&export.failed, self.sample_size);
        self.last_key = export.last_key.clone();
        self.artifacts.extend(export.artifact.clone());
    }

    pub fn record_transform(&mut self, transform: &TransformResult) {
        self.transformed = transform.summary.transformed;
        self.transform_failed = transform.summary.failed;
        self.transform_failures = sample(&transform.failed, self.sample_size);
        self.artifacts.extend(transform.artifact.clone());
    }

    pub fn record_import(&mut self, import: &ImportResult) {
        self.imported = import.successful_ids.len();
        self.import_failed = import.failed.len();
        self.cancelled = import.cancelled;
        let drifted: HashSet<&str> = import
            .validation_errors
            .iter()
            .map(|m| m.document_id.as_str())
            .collect();
        self.validation_errors = import.validation_errors.len();
        self.validation_skipped = !import.validated;
        self.validated = if import.validated {
            self.imported.saturating_sub(drifted.len())
        } else {
            0
        };
        self.import_failures = sample(&import.failed, self.sample_size);
        self.validation_failures = sample(&import.validation_errors, self.sample_size);
        self.batch_plan = Some(import.plan.clone());
        self.artifacts.extend(import.artifact.clone());
    }

    /// 💀 The collection stops here.
    pub fn fail(&mut self, stage: MigrationStage, error: impl Into<String>) {
        self.failed_at = Some(stage);
        self.state = MigrationStage::Failed;
        self.error = Some(error.into());
        self.success = false;
    }

    /// ✅ Reached the end. Success means nothing was dropped anywhere along the way.
    pub fn complete(&mut self) {
        self.state = MigrationStage::Done;
        self.success = self.export_failed == 0
            && self.transform_failed == 0
            && self.import_failed == 0
            && self.validation_errors == 0;
    }
}

fn sample<T: Clone>(items: &[T], n: usize) -> Vec<T> {
    items.iter().take(n).cloned().collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub started_at: String,
    pub finished_at: String,
    pub collections: Vec<CollectionReport>,
    pub success: bool,
    pub artifact: Option<PathBuf>,
}

impl MigrationReport {
    pub fn new(started_at: String, finished_at: String, collections: Vec<CollectionReport>) -> Self {
        let success = collections.iter().all(|c| c.success);
        Self {
            started_at,
            finished_at,
            collections,
            success,
            artifact: None,
        }
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionReport> {
        self.collections.iter().find(|c| c.collection == name)
    }

    /// 🍽️ A table for humans: one row per collection, then the first failure reasons.
    pub fn render_table(&self) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            "collection",
            "state",
            "exported",
            "transformed",
            "imported",
            "validated",
            "failed",
            "batch",
        ]);
        for c in &self.collections {
            let failed = c.export_failed + c.transform_failed + c.import_failed;
            let state = match (c.state, c.failed_at) {
                (MigrationStage::Failed, Some(at)) => format!("❌ failed while {}", at.as_str()),
                (_, _) if c.success => "✅ done".to_string(),
                _ => "⚠️ done with failures".to_string(),
            };
            table.add_row(vec![
                Cell::new(&c.collection),
                Cell::new(state),
                count_cell(c.exported),
                count_cell(c.transformed),
                count_cell(c.imported),
                if c.validation_skipped {
                    Cell::new("skipped").set_alignment(CellAlignment::Right)
                } else {
                    count_cell(c.validated)
                },
                count_cell(failed),
                Cell::new(
                    c.batch_plan
                        .as_ref()
                        .map(|p| {
                            if p.calibrated {
                                format!("{} (calibrated)", p.batch_size)
                            } else {
                                p.batch_size.to_string()
                            }
                        })
                        .unwrap_or_else(|| "-".to_string()),
                ),
            ]);
        }

        let mut out = table.to_string();
        for c in &self.collections {
            let reasons: Vec<String> = c
                .error
                .iter()
                .map(|e| format!("stage error: {e}"))
                .chain(c.export_failures.iter().map(|f| format!("export {}: {}", f.id, f.reason)))
                .chain(
                    c.transform_failures
                        .iter()
                        .map(|f| format!("transform {}: {}", f.id, f.reason)),
                )
                .chain(c.import_failures.iter().map(|f| format!("import {}: {}", f.id, f.error)))
                .chain(c.validation_failures.iter().map(|m| {
                    format!(
                        "validate {}: field '{}' expected {} got {}",
                        m.document_id, m.field, m.expected, m.actual
                    )
                }))
                .collect();
            if !reasons.is_empty() {
                out.push_str(&format!("\n\n{}:", c.collection));
                for reason in reasons {
                    out.push_str(&format!("\n  - {reason}"));
                }
            }
        }
        out
    }
}

fn count_cell(n: usize) -> Cell {
    Cell::new(format_number(n as u64)).set_alignment(CellAlignment::Right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportSummary;
    use chrono::Utc;

    fn export_with_failures(n: usize) -> ExportResult {
        ExportResult {
            collection: "users".into(),
            exported_at: Utc::now(),
            valid: Vec::new(),
            failed: (0..n)
                .map(|i| RecordFailure::new(format!("u{i}"), "Missing required field: email"))
                .collect(),
            summary: ExportSummary {
                total: n,
                valid: 0,
                failed: n,
            },
            last_key: None,
            artifact: None,
        }
    }

    #[test]
    fn the_one_where_only_the_first_ten_reasons_make_the_report() {
        let mut report = CollectionReport::new("users", DEFAULT_FAILURE_SAMPLE_SIZE);
        report.record_export(&export_with_failures(25));
        report.complete();

        assert_eq!(report.export_failed, 25);
        assert_eq!(report.export_failures.len(), 10);
        assert_eq!(report.state, MigrationStage::Done);
        assert!(!report.success);
    }

    #[test]
    fn the_one_where_a_failed_collection_fails_the_run() {
        let mut clean = CollectionReport::new("agencies", 10);
        clean.complete();
        let mut broken = CollectionReport::new("users", 10);
        broken.fail(MigrationStage::Exporting, "source unreachable");

        let report = MigrationReport::new("t0".into(), "t1".into(), vec![clean, broken]);
        assert!(!report.success);
        assert!(report.collection("agencies").is_some_and(|c| c.success));
        let rendered = report.render_table();
        assert!(rendered.contains("failed while exporting"));
        assert!(rendered.contains("stage error: source unreachable"));
    }

    fn import_of(ids: &[&str], validated: bool) -> ImportResult {
        ImportResult {
            collection: "agencies".into(),
            target_collection: "agencies".into(),
            successful_ids: ids.iter().map(|id| id.to_string()).collect(),
            failed: Vec::new(),
            validation_errors: Vec::new(),
            validated,
            plan: BatchPlan::fixed(25),
            batches: 1,
            cancelled: false,
            artifact: None,
        }
    }

    #[test]
    fn the_one_where_skipping_the_read_back_validates_nothing() {
        let mut report = CollectionReport::new("agencies", 10);
        report.record_import(&import_of(&["a1", "a2"], false));
        report.complete();

        assert_eq!(report.imported, 2);
        assert_eq!(report.validated, 0);
        assert!(report.validation_skipped);
        assert!(report.success);
        let rendered = MigrationReport::new("t0".into(), "t1".into(), vec![report]).render_table();
        assert!(rendered.contains("skipped"));
    }

    #[test]
    fn the_one_where_a_clean_read_back_counts_every_record() {
        let mut report = CollectionReport::new("agencies", 10);
        report.record_import(&import_of(&["a1", "a2"], true));
        assert_eq!(report.validated, 2);
        assert!(!report.validation_skipped);
    }
}
