//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where records must move... one supervisor dared to move them all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor: part middle manager, part helicopter parent. It doesn't export,
//! transform or import anything itself. It tells the stages when to go, writes down
//! what happened, and decides whether a bad collection should stop the show (it
//! shouldn't; the next collection still gets its turn).
//!
//! 🧠 State machine, per collection:
//!
//! ```text
//! Exporting ──▶ Transforming ──▶ Importing ──▶ Done
//!     │               │              │
//!     └───────────────┴──────────────┴──────▶ Failed
//! ```
//!
//! A stage with some failed records still moves on, unless `halt_on_partial_failure`
//! is set. A stage that errors outright (source unreachable, artifact unwritable) fails
//! the collection and the run carries on with the next one.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::app_config::{AppConfig, MigrationConfig};
use crate::artifacts::{ArtifactWriter, report_artifact_name};
use crate::backends::{SourceBackend, SourceStore, TargetBackend, TargetStore};
use crate::catalog::Catalog;
use crate::common::format_iso_millis;
use crate::export::Exporter;
use crate::import::{CancelFlag, Importer};
use crate::progress::ProgressMetrics;
use crate::report::{CollectionReport, MigrationReport};
use crate::transforms::Transformer;

pub const CANCELLED_BEFORE_START: &str = "migration cancelled before this collection started";

/// 🚦 Where a collection is in its journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStage {
    Exporting,
    Transforming,
    Importing,
    Done,
    Failed,
}

impl MigrationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationStage::Exporting => "exporting",
            MigrationStage::Transforming => "transforming",
            MigrationStage::Importing => "importing",
            MigrationStage::Done => "done",
            MigrationStage::Failed => "failed",
        }
    }

    /// The happy-path successor. Terminal states stay put.
    pub fn next(self) -> Self {
        match self {
            MigrationStage::Exporting => MigrationStage::Transforming,
            MigrationStage::Transforming => MigrationStage::Importing,
            MigrationStage::Importing | MigrationStage::Done => MigrationStage::Done,
            MigrationStage::Failed => MigrationStage::Failed,
        }
    }
}

/// 📦 Owns the stages and the policy; runs collections one after another.
pub struct Supervisor {
    catalog: Arc<Catalog>,
    target: Arc<dyn TargetStore>,
    config: MigrationConfig,
    artifacts: ArtifactWriter,
    exporter: Exporter,
    transformer: Transformer,
    cancel: CancelFlag,
    resume_after: Option<String>,
}

impl Supervisor {
    /// 🚀 Stores are handed in, so tests can bring their own.
    pub fn new(
        catalog: Catalog,
        source: Arc<dyn SourceStore>,
        target: Arc<dyn TargetStore>,
        config: MigrationConfig,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let artifacts = ArtifactWriter::new(config.artifact_dir.clone());
        let exporter = Exporter::new(
            source,
            Arc::clone(&catalog),
            config.retry.clone(),
            artifacts.clone(),
        );
        let transformer = Transformer::new(Arc::clone(&catalog), artifacts.clone());
        Self {
            catalog,
            target,
            config,
            artifacts,
            exporter,
            transformer,
            cancel: CancelFlag::new(),
            resume_after: None,
        }
    }

    /// 🔧 The production wiring: stores built from config, the property-management catalog.
    pub async fn from_app_config(app_config: &AppConfig) -> Result<Self> {
        let source = SourceBackend::from_config(&app_config.source)
            .context("💀 Could not build the source store from config")?
            .into_store();
        let target = TargetBackend::from_config(&app_config.target)
            .await
            .context("💀 Could not build the target store from config")?
            .into_store();
        Ok(Self::new(
            Catalog::property_management(),
            source,
            target,
            app_config.migration.clone(),
        ))
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// ⏩ Start each collection's export after this source id.
    pub fn with_resume_after(mut self, resume_after: Option<String>) -> Self {
        self.resume_after = resume_after;
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// The collections this run will touch, in the order it will touch them.
    pub fn collections(&self) -> Vec<String> {
        match &self.config.collections {
            Some(requested) => requested.clone(),
            None => self.catalog.collection_names().to_vec(),
        }
    }

    /// 🛫 Every requested collection needs a schema and a rule table. Checked before any I/O.
    pub fn preflight(&self) -> Result<()> {
        self.catalog
            .preflight(&self.collections())
            .context("💀 Preflight failed: the catalog can't migrate what it can't describe")
    }

    /// 🏃 Export, transform and import one collection.
    ///
    /// `Err` only for configuration problems found before any I/O. Everything that goes
    /// wrong after that is written into the returned report.
    pub async fn migrate_collection(&self, collection: &str) -> Result<CollectionReport> {
        self.catalog
            .preflight(&[collection])
            .context("💀 Preflight failed for a single collection")?;

        let mut report = CollectionReport::new(collection, self.config.failure_sample_size);
        let halt = self.config.halt_on_partial_failure;
        info!(event = "migration_start", collection, "🚀 collection migration starting");

        // 📤 Exporting
        let export = match self
            .exporter
            .export(collection, self.config.page_size, self.resume_after.as_deref())
            .await
        {
            Ok(export) => export,
            Err(err) => return Ok(self.stage_failed(report, err)),
        };
        report.record_export(&export);
        if halt && export.summary.failed > 0 {
            return Ok(self.halted(report, export.summary.failed));
        }
        self.advance(&mut report);

        // 🔄 Transforming
        let transformed = match self.transformer.transform(&export).await {
            Ok(transformed) => transformed,
            Err(err) => return Ok(self.stage_failed(report, err)),
        };
        // -- the export snapshot is on disk; no reason to hold it in memory through the import
        drop(export);
        report.record_transform(&transformed);
        if halt && transformed.summary.failed > 0 {
            return Ok(self.halted(report, transformed.summary.failed));
        }
        self.advance(&mut report);

        // 📥 Importing
        let importer = Importer::new(
            Arc::clone(&self.target),
            self.artifacts.clone(),
            self.config.import_options(),
        )
        .with_cancel_flag(self.cancel.clone());
        let mut metrics = ProgressMetrics::new(
            collection,
            transformed.records.len(),
            self.config.show_progress,
        );
        let imported = importer
            .import(&transformed, |progress| {
                info!(
                    event = "migration_progress",
                    stage = "import",
                    collection,
                    processed = progress.processed,
                    total = progress.total,
                    batch = progress.current_batch,
                    total_batches = progress.total_batches,
                    "📥 import progress"
                );
                metrics.update(progress);
            })
            .await;
        metrics.finish();
        let imported = match imported {
            Ok(imported) => imported,
            Err(err) => return Ok(self.stage_failed(report, err)),
        };
        report.record_import(&imported);
        let import_problems = imported.failed.len() + imported.validation_errors.len();
        if halt && import_problems > 0 {
            return Ok(self.halted(report, import_problems));
        }

        report.complete();
        info!(
            event = "migration_complete",
            collection,
            success = report.success,
            exported = report.exported,
            transformed = report.transformed,
            imported = report.imported,
            validated = report.validated,
            "🏁 collection migration complete"
        );
        Ok(report)
    }

    /// 🎬 The whole show: every configured collection, in order, then the report.
    pub async fn run_migration(&self) -> Result<MigrationReport> {
        self.preflight()?;
        let collections = self.collections();
        let started_at = Utc::now();
        info!(
            event = "migration_start",
            collections = ?collections,
            artifact_dir = %self.artifacts.dir().display(),
            "🎬 migration run starting"
        );

        let mut reports = Vec::with_capacity(collections.len());
        for collection in &collections {
            if self.cancel.is_cancelled() {
                warn!(event = "migration_error", collection, "🛑 skipped, run was cancelled");
                let mut skipped = CollectionReport::new(collection, self.config.failure_sample_size);
                skipped.cancelled = true;
                skipped.fail(MigrationStage::Exporting, CANCELLED_BEFORE_START);
                reports.push(skipped);
                continue;
            }
            reports.push(self.migrate_collection(collection).await?);
        }

        let finished_at = Utc::now();
        let mut report = MigrationReport::new(
            format_iso_millis(&started_at),
            format_iso_millis(&finished_at),
            reports,
        );
        match self
            .artifacts
            .write(&report_artifact_name(&finished_at), &report)
            .await
        {
            Ok(path) => report.artifact = Some(path),
            // -- the report still goes back to the caller; the table is printed either way
            Err(err) => warn!(
                event = "migration_error",
                error = %format!("{err:#}"),
                "💀 migration report artifact could not be written"
            ),
        }

        info!(
            event = "migration_complete",
            success = report.success,
            collections = report.collections.len(),
            "🏁 migration run finished"
        );
        Ok(report)
    }

    /// ⏭️ On to the next stage. Failures are pinned on whichever stage the report is in.
    fn advance(&self, report: &mut CollectionReport) {
        report.state = report.state.next();
        debug!(
            collection = %report.collection,
            stage = report.state.as_str(),
            "⏭️ collection moved to the next stage"
        );
    }

    fn stage_failed(&self, mut report: CollectionReport, err: anyhow::Error) -> CollectionReport {
        let stage = report.state;
        let message = format!("{err:#}");
        error!(
            event = "migration_error",
            collection = %report.collection,
            stage = stage.as_str(),
            error = %message,
            "💀 stage failed, moving on to the next collection"
        );
        report.fail(stage, message);
        report
    }

    fn halted(&self, mut report: CollectionReport, failed: usize) -> CollectionReport {
        let stage = report.state;
        warn!(
            event = "migration_error",
            collection = %report.collection,
            stage = stage.as_str(),
            failed,
            "🛑 halting collection on partial failure"
        );
        report.fail(
            stage,
            format!(
                "{failed} record(s) failed while {} and halt_on_partial_failure is set",
                stage.as_str()
            ),
        );
        report
    }
}
