//! 📥 The Importer: slice the transformed records into batches, write them with bounded
//! concurrency, keep score per record, then read everything back and compare.
//!
//! 🧠 Knowledge graph:
//! - `calibrator.rs` picks the batch size (unless the config pins one).
//! - Every bulk write goes through `retry::with_retry`; a batch that still fails after
//!   the budget marks each of its records failed with the final error.
//! - `verify.rs` is the read-back pass.
//! - Counters live in the one loop that drains the batch stream. Batches may finish out
//!   of order; the counters don't care, and the callback sees a monotonic `processed`.
//! - Cancellation is checked when a batch is about to be dispatched. A batch already in
//!   flight finishes; the ones behind it are failed without being written.

pub mod calibrator;
pub mod verify;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifacts::{ArtifactKind, ArtifactWriter, stage_artifact_name};
use crate::backends::TargetStore;
use crate::retry::{RetryPolicy, with_retry};
use crate::transforms::{TransformResult, TransformedRecord};

pub use calibrator::{BatchPlan, CalibrationSettings, Measurement, calibrate};
pub use verify::{MISSING_DOCUMENT_FIELD, ValidationMismatch, compare_documents};

pub const CANCELLED_REASON: &str = "migration cancelled before batch was written";

/// 🛑 Shared stop signal. Cheap to clone; every clone sees the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 📊 Handed to the progress callback after every completed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    pub processed: usize,
    pub total: usize,
    /// Completion ordinal, not the batch's position in the collection.
    pub current_batch: usize,
    pub total_batches: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchSizing {
    Auto(CalibrationSettings),
    Fixed(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportOptions {
    pub sizing: BatchSizing,
    pub concurrency: usize,
    pub validate_after_import: bool,
    pub retry: RetryPolicy,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            sizing: BatchSizing::Auto(CalibrationSettings::default()),
            concurrency: 4,
            validate_after_import: true,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFailure {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub collection: String,
    pub target_collection: String,
    pub successful_ids: Vec<String>,
    pub failed: Vec<ImportFailure>,
    pub validation_errors: Vec<ValidationMismatch>,
    /// Whether the read-back pass ran. `false` means nothing was compared, not that
    /// everything matched.
    pub validated: bool,
    pub plan: BatchPlan,
    pub batches: usize,
    pub cancelled: bool,
    #[serde(skip)]
    pub artifact: Option<PathBuf>,
}

impl ImportResult {
    pub fn success(&self) -> bool {
        self.failed.is_empty() && self.validation_errors.is_empty()
    }
}

struct BatchOutcome {
    index: usize,
    written: usize,
    succeeded: Vec<String>,
    failed: Vec<ImportFailure>,
    cancelled: bool,
}

pub struct Importer {
    target: Arc<dyn TargetStore>,
    artifacts: ArtifactWriter,
    options: ImportOptions,
    cancel: CancelFlag,
}

impl Importer {
    pub fn new(target: Arc<dyn TargetStore>, artifacts: ArtifactWriter, options: ImportOptions) -> Self {
        Self {
            target,
            artifacts,
            options,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// 📥 Import the output of the transform stage.
    pub async fn import<F>(&self, transformed: &TransformResult, on_progress: F) -> Result<ImportResult>
    where
        F: FnMut(ImportProgress) + Send,
    {
        self.import_records(
            &transformed.collection,
            &transformed.target_collection,
            &transformed.records,
            on_progress,
        )
        .await
    }

    pub async fn import_records<F>(
        &self,
        collection: &str,
        target_collection: &str,
        records: &[TransformedRecord],
        mut on_progress: F,
    ) -> Result<ImportResult>
    where
        F: FnMut(ImportProgress) + Send,
    {
        let plan = match &self.options.sizing {
            BatchSizing::Fixed(size) => BatchPlan::fixed(*size),
            BatchSizing::Auto(settings) => {
                calibrate(self.target.as_ref(), target_collection, records, settings).await
            }
        };

        let batches: Vec<&[TransformedRecord]> = records.chunks(plan.batch_size).collect();
        let total = records.len();
        let total_batches = batches.len();
        info!(
            collection,
            total,
            total_batches,
            batch_size = plan.batch_size,
            concurrency = self.options.concurrency,
            "📥 import starting"
        );

        let mut outcomes = stream::iter(batches.iter().copied().enumerate())
            .map(|(index, batch)| {
                // -- evaluated when buffer_unordered pulls the next batch, i.e. at dispatch
                let cancelled = self.cancel.is_cancelled();
                async move {
                    if cancelled {
                        return cancelled_batch(index, batch);
                    }
                    self.write_batch(index, target_collection, batch).await
                }
            })
            .buffer_unordered(self.options.concurrency.max(1));

        let mut by_index: Vec<Option<BatchOutcome>> = (0..total_batches).map(|_| None).collect();
        let mut processed = 0;
        let mut completed = 0;
        while let Some(outcome) = outcomes.next().await {
            if !outcome.cancelled {
                processed += outcome.written;
                completed += 1;
                on_progress(ImportProgress {
                    processed,
                    total,
                    current_batch: completed,
                    total_batches,
                });
            }
            let index = outcome.index;
            by_index[index] = Some(outcome);
        }

        // -- reassemble in collection order so results don't depend on who finished first
        let mut successful_ids = Vec::with_capacity(total);
        let mut failed = Vec::new();
        let mut cancelled = false;
        for outcome in by_index.into_iter().flatten() {
            cancelled |= outcome.cancelled;
            successful_ids.extend(outcome.succeeded);
            failed.extend(outcome.failed);
        }
        if cancelled {
            warn!(collection, unwritten = failed.len(), "🛑 import cancelled");
        }

        let validated = self.options.validate_after_import;
        let validation_errors = if validated && !successful_ids.is_empty() {
            self.verify(target_collection, records, &successful_ids).await
        } else {
            Vec::new()
        };

        let mut result = ImportResult {
            collection: collection.to_string(),
            target_collection: target_collection.to_string(),
            successful_ids,
            failed,
            validation_errors,
            validated,
            plan,
            batches: total_batches,
            cancelled,
            artifact: None,
        };
        let artifact = self
            .artifacts
            .write(
                &stage_artifact_name(collection, ArtifactKind::Import, &Utc::now()),
                &result,
            )
            .await
            .context("💀 Import finished but its artifact could not be saved")?;
        result.artifact = Some(artifact);

        info!(
            collection,
            imported = result.successful_ids.len(),
            failed = result.failed.len(),
            validation_errors = result.validation_errors.len(),
            "📥 import complete"
        );
        Ok(result)
    }

    async fn write_batch(
        &self,
        index: usize,
        target_collection: &str,
        batch: &[TransformedRecord],
    ) -> BatchOutcome {
        let target = self.target.as_ref();
        let written = with_retry(&self.options.retry, "bulk upsert", |_| {
            target.bulk_upsert(target_collection, batch)
        })
        .await;

        let mut succeeded = Vec::with_capacity(batch.len());
        let mut failed = Vec::new();
        match written {
            Ok(outcome) => {
                let mut answers: HashMap<&str, Option<&str>> = outcome
                    .results
                    .iter()
                    .map(|r| (r.id.as_str(), r.error.as_deref()))
                    .collect();
                for record in batch {
                    match answers.remove(record.id.as_str()) {
                        Some(None) => succeeded.push(record.id.clone()),
                        Some(Some(reason)) => failed.push(ImportFailure {
                            id: record.id.clone(),
                            error: reason.to_string(),
                        }),
                        None => failed.push(ImportFailure {
                            id: record.id.clone(),
                            error: "the store returned no result for this record".to_string(),
                        }),
                    }
                }
                debug!(
                    batch = index,
                    succeeded = succeeded.len(),
                    failed = failed.len(),
                    request_charge = outcome.request_charge,
                    "📦 batch written"
                );
            }
            Err(err) => {
                warn!(
                    event = "migration_error",
                    batch = index,
                    records = batch.len(),
                    error = %err,
                    "💀 batch failed after retries"
                );
                let error = err.to_string();
                failed.extend(batch.iter().map(|record| ImportFailure {
                    id: record.id.clone(),
                    error: error.clone(),
                }));
            }
        }

        BatchOutcome {
            index,
            written: batch.len(),
            succeeded,
            failed,
            cancelled: false,
        }
    }

    /// 🔎 Re-read every successful record and compare it with what we meant to write.
    async fn verify(
        &self,
        target_collection: &str,
        records: &[TransformedRecord],
        successful_ids: &[String],
    ) -> Vec<ValidationMismatch> {
        let by_id: HashMap<&str, &TransformedRecord> =
            records.iter().map(|r| (r.id.as_str(), r)).collect();
        let target = self.target.as_ref();
        let retry = &self.options.retry;

        let checks = successful_ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).copied())
            .map(|record| async move {
                let stored = with_retry(retry, "read back", |_| {
                    target.read(target_collection, &record.id, &record.partition_key)
                })
                .await;
                match stored {
                    Ok(stored) => compare_documents(&record.id, &record.document, stored.as_ref()),
                    Err(err) => vec![ValidationMismatch {
                        document_id: record.id.clone(),
                        field: MISSING_DOCUMENT_FIELD.to_string(),
                        expected: serde_json::Value::Object(record.document.clone()),
                        actual: serde_json::Value::String(format!("read failed: {err}")),
                    }],
                }
            });

        let mismatches: Vec<ValidationMismatch> = stream::iter(checks)
            .buffered(self.options.concurrency.max(1))
            .flat_map(stream::iter)
            .collect()
            .await;
        if !mismatches.is_empty() {
            warn!(
                collection = target_collection,
                mismatches = mismatches.len(),
                "🔎 read-back found differences"
            );
        }
        mismatches
    }
}

fn cancelled_batch(index: usize, batch: &[TransformedRecord]) -> BatchOutcome {
    BatchOutcome {
        index,
        written: 0,
        succeeded: Vec::new(),
        failed: batch
            .iter()
            .map(|record| ImportFailure {
                id: record.id.clone(),
                error: CANCELLED_REASON.to_string(),
            })
            .collect(),
        cancelled: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{BulkWriteOutcome, InMemoryTarget};
    use crate::error::StoreError;
    use async_trait::async_trait;
    use serde_json::{Map, Value as Json, json};
    use std::time::Duration;

    fn records(n: usize) -> Vec<TransformedRecord> {
        (0..n)
            .map(|i| {
                let id = format!("r{i:04}");
                let mut document = Map::new();
                document.insert("id".into(), json!(id));
                document.insert("price".into(), json!(1000 + i));
                TransformedRecord {
                    id,
                    target_collection: "properties".to_string(),
                    partition_key: "a1".to_string(),
                    document,
                }
            })
            .collect()
    }

    fn options(batch_size: usize, concurrency: usize) -> ImportOptions {
        ImportOptions {
            sizing: BatchSizing::Fixed(batch_size),
            concurrency,
            validate_after_import: true,
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
        }
    }

    #[tokio::test]
    async fn the_one_where_250_records_make_three_batches_and_three_callbacks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = InMemoryTarget::new();
        let importer = Importer::new(
            Arc::new(target.clone()),
            ArtifactWriter::new(dir.path()),
            options(100, 1),
        );

        let mut seen = Vec::new();
        let result = importer
            .import_records("properties", "properties", &records(250), |p| seen.push(p))
            .await?;

        assert_eq!(result.batches, 3);
        assert_eq!(target.bulk_call_sizes().await, [100, 100, 50]);
        assert_eq!(seen.len(), 3);
        assert_eq!(
            seen.iter().map(|p| p.processed).collect::<Vec<_>>(),
            [100, 200, 250]
        );
        assert!(seen.iter().all(|p| p.total == 250 && p.total_batches == 3));
        assert_eq!(seen.last().map(|p| p.current_batch), Some(3));
        assert_eq!(result.successful_ids.len(), 250);
        assert!(result.success());
        assert!(result.artifact.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_importing_twice_changes_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = InMemoryTarget::new();
        let importer = Importer::new(
            Arc::new(target.clone()),
            ArtifactWriter::new(dir.path()),
            options(40, 3),
        );
        let batch = records(90);

        let first = importer.import_records("properties", "properties", &batch, |_| {}).await?;
        let after_first = target.documents("properties").await;
        let second = importer.import_records("properties", "properties", &batch, |_| {}).await?;

        assert!(first.success() && second.success());
        assert_eq!(target.documents("properties").await, after_first);
        assert_eq!(after_first.len(), 90);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_store_refuses_one_record_and_keeps_the_rest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = InMemoryTarget::new();
        target.reject("r0003", "document too large").await;
        let importer = Importer::new(
            Arc::new(target.clone()),
            ArtifactWriter::new(dir.path()),
            options(5, 2),
        );

        let result = importer.import_records("properties", "properties", &records(10), |_| {}).await?;
        assert_eq!(result.successful_ids.len(), 9);
        assert_eq!(
            result.failed,
            [ImportFailure {
                id: "r0003".into(),
                error: "document too large".into()
            }]
        );
        assert_eq!(result.successful_ids.len() + result.failed.len(), 10);
        assert!(!result.success());
        Ok(())
    }

    #[derive(Debug, Default)]
    struct FlakyTarget {
        inner: InMemoryTarget,
        down_for: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl TargetStore for FlakyTarget {
        async fn bulk_upsert(
            &self,
            collection: &str,
            records: &[TransformedRecord],
        ) -> Result<BulkWriteOutcome, StoreError> {
            if records.iter().any(|r| r.id == "r0000") {
                return Err(StoreError::Transport("connection reset by peer".into()));
            }
            if self.down_for.load(Ordering::SeqCst) > 0 {
                self.down_for.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::from_status(503, "busy"));
            }
            self.inner.bulk_upsert(collection, records).await
        }

        async fn read(&self, collection: &str, id: &str, pk: &str) -> Result<Option<Json>, StoreError> {
            self.inner.read(collection, id, pk).await
        }
    }

    #[tokio::test]
    async fn the_one_where_a_dead_batch_takes_its_records_down_and_only_its_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = FlakyTarget::default();
        // -- the first healthy batch hits one 503 and then recovers on retry
        target.down_for.store(1, Ordering::SeqCst);
        let importer = Importer::new(Arc::new(target), ArtifactWriter::new(dir.path()), options(3, 1));

        let result = importer.import_records("properties", "properties", &records(9), |_| {}).await?;
        assert_eq!(result.failed.len(), 3);
        assert!(result.failed.iter().all(|f| f.error.contains("connection reset by peer")));
        assert_eq!(result.failed[0].id, "r0000");
        assert_eq!(result.successful_ids.len(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_cancel_stops_the_batches_that_have_not_left() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = InMemoryTarget::new();
        let cancel = CancelFlag::new();
        let importer = Importer::new(
            Arc::new(target.clone()),
            ArtifactWriter::new(dir.path()),
            options(10, 1),
        )
        .with_cancel_flag(cancel.clone());

        let result = importer
            .import_records("properties", "properties", &records(30), |p| {
                if p.current_batch == 1 {
                    cancel.cancel();
                }
            })
            .await?;

        assert!(result.cancelled);
        assert_eq!(result.successful_ids.len(), 10);
        assert_eq!(result.failed.len(), 20);
        assert!(result.failed.iter().all(|f| f.error == CANCELLED_REASON));
        assert_eq!(target.bulk_call_sizes().await, [10]);
        Ok(())
    }

    #[derive(Debug, Default)]
    struct DriftingTarget {
        inner: InMemoryTarget,
    }

    #[async_trait]
    impl TargetStore for DriftingTarget {
        async fn bulk_upsert(
            &self,
            collection: &str,
            records: &[TransformedRecord],
        ) -> Result<BulkWriteOutcome, StoreError> {
            self.inner.bulk_upsert(collection, records).await
        }

        async fn read(&self, collection: &str, id: &str, pk: &str) -> Result<Option<Json>, StoreError> {
            if id == "r0001" {
                return Ok(None);
            }
            let mut stored = self.inner.read(collection, id, pk).await?;
            if id == "r0002" {
                if let Some(Json::Object(doc)) = stored.as_mut() {
                    doc.insert("price".into(), json!(1));
                }
            }
            Ok(stored)
        }
    }

    #[tokio::test]
    async fn the_one_where_the_read_back_catches_drift() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let importer = Importer::new(
            Arc::new(DriftingTarget::default()),
            ArtifactWriter::new(dir.path()),
            options(10, 2),
        );
        let result = importer.import_records("properties", "properties", &records(4), |_| {}).await?;

        assert!(result.failed.is_empty());
        assert!(!result.success());
        assert_eq!(result.validation_errors.len(), 2);
        assert_eq!(result.validation_errors[0].document_id, "r0001");
        assert_eq!(result.validation_errors[0].field, MISSING_DOCUMENT_FIELD);
        assert_eq!(result.validation_errors[1].field, "price");
        assert_eq!(result.validation_errors[1].expected, json!(1002));
        assert_eq!(result.validation_errors[1].actual, json!(1));
        Ok(())
    }

    #[derive(Debug, Default)]
    struct CrowdedTarget {
        inner: InMemoryTarget,
        in_flight: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl TargetStore for CrowdedTarget {
        async fn bulk_upsert(
            &self,
            collection: &str,
            records: &[TransformedRecord],
        ) -> Result<BulkWriteOutcome, StoreError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            // -- linger long enough for the next batch to pile in behind us
            tokio::time::sleep(Duration::from_millis(20)).await;
            let outcome = self.inner.bulk_upsert(collection, records).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        }

        async fn read(&self, collection: &str, id: &str, pk: &str) -> Result<Option<Json>, StoreError> {
            self.inner.read(collection, id, pk).await
        }
    }

    #[tokio::test]
    async fn the_one_where_two_lanes_means_two_batches_at_a_time() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = Arc::new(CrowdedTarget::default());
        let mut opts = options(1, 2);
        opts.validate_after_import = false;
        let importer = Importer::new(target.clone(), ArtifactWriter::new(dir.path()), opts);

        let result = importer.import_records("properties", "properties", &records(10), |_| {}).await?;

        assert_eq!(result.batches, 10);
        assert_eq!(result.successful_ids.len(), 10);
        assert!(!result.validated);
        let peak = target.peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "{peak} batches were in flight at once");
        assert!(peak > 1, "batches never overlapped");
        Ok(())
    }

    #[test]
    fn the_one_where_a_clone_of_the_flag_is_the_same_flag() {
        let flag = CancelFlag::new();
        let twin = flag.clone();
        twin.cancel();
        assert!(flag.is_cancelled());
    }
}
