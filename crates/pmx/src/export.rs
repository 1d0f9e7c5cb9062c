//! 📤 The Exporter: page through a source collection, validate every record, keep the
//! good ones, write down why the others stayed behind.
//!
//! 🧠 Knowledge graph:
//! - `validator.rs`: schema checks (required, types, enums, email, nested, array items).
//! - `references.rs`: every `Value::Reference` must resolve in the source store.
//! - A record is valid only if both pass. The reference checker only runs on records the
//!   schema already accepted; no point resolving references on a record we're rejecting.
//! - The result lands on disk as `<collection>_export_<ts>.json` before `export` returns.

pub mod references;
pub mod validator;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::artifacts::{ArtifactKind, ArtifactWriter, stage_artifact_name};
use crate::backends::SourceStore;
use crate::catalog::Catalog;
use crate::common::{RecordFailure, SourceRecord, format_iso_millis};
use crate::retry::{RetryPolicy, with_retry};

pub use references::{FoundReference, MAX_REFERENCE_DEPTH, check_references, collect_references};
pub use validator::{Validation, validate_record};

pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// 📣 A `migration_progress` event every this many records.
pub const PROGRESS_LOG_INTERVAL: usize = 1000;

/// 🏷️ Stamped onto every exported record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStamp {
    pub exported_at: String,
    pub source_collection: String,
    pub format_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedRecord {
    #[serde(flatten)]
    pub record: SourceRecord,
    #[serde(rename = "_exportMetadata")]
    pub stamp: ExportStamp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub total: usize,
    pub valid: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct ExportResult {
    pub collection: String,
    pub exported_at: DateTime<Utc>,
    pub valid: Vec<ExportedRecord>,
    pub failed: Vec<RecordFailure>,
    pub summary: ExportSummary,
    /// Highest id read. Feed it back as `resume_after` to pick up where this run stopped.
    pub last_key: Option<String>,
    pub artifact: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportArtifact<'a> {
    collection: &'a str,
    exported_at: String,
    summary: ExportSummary,
    data: &'a [ExportedRecord],
    failures: &'a [RecordFailure],
}

pub struct Exporter {
    source: Arc<dyn SourceStore>,
    catalog: Arc<Catalog>,
    retry: RetryPolicy,
    artifacts: ArtifactWriter,
}

impl Exporter {
    pub fn new(
        source: Arc<dyn SourceStore>,
        catalog: Arc<Catalog>,
        retry: RetryPolicy,
        artifacts: ArtifactWriter,
    ) -> Self {
        Self {
            source,
            catalog,
            retry,
            artifacts,
        }
    }

    /// 🔍 One record through both checks. `Err` carries every violation, in order.
    pub async fn check_record(
        &self,
        collection: &str,
        record: &SourceRecord,
    ) -> Result<std::result::Result<(), Vec<String>>> {
        let schema = self.catalog.schema(collection)?;
        let validation = validate_record(record, schema);
        if !validation.is_valid() {
            return Ok(Err(validation.errors));
        }
        let dangling = check_references(record, self.source.as_ref(), &self.retry).await;
        Ok(if dangling.is_empty() {
            Ok(())
        } else {
            Err(dangling)
        })
    }

    /// 📤 Export one collection, starting after `resume_after` if given.
    ///
    /// Per-record problems land in `failed`; only configuration errors, a source that
    /// stays unreachable through the retry budget, and an unwritable artifact are `Err`.
    pub async fn export(
        &self,
        collection: &str,
        page_size: usize,
        resume_after: Option<&str>,
    ) -> Result<ExportResult> {
        // -- unknown collection is a config error, and we want it before the first read
        self.catalog.schema(collection)?;
        let page_size = page_size.max(1);
        let exported_at = Utc::now();
        let stamp = ExportStamp {
            exported_at: format_iso_millis(&exported_at),
            source_collection: collection.to_string(),
            format_version: EXPORT_FORMAT_VERSION,
        };

        let mut valid = Vec::new();
        let mut failed = Vec::new();
        let mut cursor = resume_after.map(str::to_string);
        let mut seen = 0usize;

        loop {
            let after = cursor.as_deref();
            let page = with_retry(&self.retry, "fetch source page", |_| {
                self.source.fetch_page(collection, after, page_size)
            })
            .await
            .with_context(|| {
                format!(
                    "💀 Could not read a page of '{collection}' after {:?}. The source went quiet and stayed quiet.",
                    after.unwrap_or("<start>")
                )
            })?;
            if page.is_empty() {
                break;
            }
            debug!(collection, page_len = page.len(), "📄 page fetched");

            let page_len = page.len();
            for record in page {
                // -- pages come back in id order, so the last one is always the highest
                cursor = Some(record.id.clone());
                match self.check_record(collection, &record).await? {
                    Ok(()) => valid.push(ExportedRecord {
                        record,
                        stamp: stamp.clone(),
                    }),
                    Err(errors) => failed.push(RecordFailure::new(record.id, errors.join("; "))),
                }
                seen += 1;
                if seen % PROGRESS_LOG_INTERVAL == 0 {
                    info!(
                        event = "migration_progress",
                        stage = "export",
                        collection,
                        processed = seen,
                        valid = valid.len(),
                        failed = failed.len(),
                        "📤 export progress"
                    );
                }
            }
            if page_len < page_size {
                break;
            }
        }

        let summary = ExportSummary {
            total: seen,
            valid: valid.len(),
            failed: failed.len(),
        };
        let artifact = self
            .artifacts
            .write(
                &stage_artifact_name(collection, ArtifactKind::Export, &exported_at),
                &ExportArtifact {
                    collection,
                    exported_at: stamp.exported_at.clone(),
                    summary,
                    data: &valid,
                    failures: &failed,
                },
            )
            .await
            .context("💀 Export finished but its artifact could not be saved")?;

        info!(
            collection,
            total = summary.total,
            valid = summary.valid,
            failed = summary.failed,
            "📤 export complete"
        );
        Ok(ExportResult {
            collection: collection.to_string(),
            exported_at,
            valid,
            failed,
            summary,
            last_key: cursor,
            artifact: Some(artifact),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemorySource;
    use crate::catalog::collections;
    use crate::common::{DocumentRef, Value};
    use crate::error::{ConfigError, StoreError};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn user(id: &str, email: Option<&str>, agency: &str) -> SourceRecord {
        let mut fields = BTreeMap::new();
        if let Some(email) = email {
            fields.insert("email".to_string(), Value::from(email));
        }
        fields.insert("role".to_string(), Value::from("tenant"));
        fields.insert(
            "createdAt".to_string(),
            Value::Timestamp {
                seconds: 1_609_459_200,
                nanos: 0,
            },
        );
        fields.insert(
            "agency".to_string(),
            Value::Reference(DocumentRef::new(format!("agencies/{agency}"))),
        );
        SourceRecord::new(id, fields)
    }

    async fn source() -> InMemorySource {
        InMemorySource::new()
            .with_records("agencies", [SourceRecord::new("a1", BTreeMap::new())])
            .await
            .with_records(
                "users",
                [
                    user("u1", Some("one@example.com"), "a1"),
                    user("u2", None, "a1"),
                    user("u3", Some("three@example.com"), "nowhere"),
                    user("u4", Some("four@example.com"), "a1"),
                    user("u5", Some("five@example.com"), "a1"),
                ],
            )
            .await
    }

    fn exporter(source: Arc<dyn SourceStore>, dir: &std::path::Path) -> Exporter {
        Exporter::new(
            source,
            Arc::new(Catalog::property_management()),
            RetryPolicy::new(2, Duration::from_millis(1)),
            ArtifactWriter::new(dir),
        )
    }

    #[tokio::test]
    async fn the_one_where_every_record_lands_in_exactly_one_pile() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let result = exporter(Arc::new(source().await), dir.path())
            .export(collections::USERS, 2, None)
            .await?;

        assert_eq!(result.summary, ExportSummary { total: 5, valid: 3, failed: 2 });
        assert_eq!(result.summary.valid + result.summary.failed, result.summary.total);
        assert_eq!(result.last_key.as_deref(), Some("u5"));
        assert_eq!(
            result.failed,
            [
                RecordFailure::new("u2", "Missing required field: email"),
                RecordFailure::new(
                    "u3",
                    "Dangling reference at 'agency': agencies/nowhere does not exist"
                ),
            ]
        );
        assert_eq!(result.valid[0].stamp.source_collection, "users");
        assert_eq!(result.valid[0].stamp.format_version, 1);

        let artifact = result.artifact.expect("artifact written");
        let name = artifact.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.starts_with("users_export_"));
        let saved: serde_json::Value = serde_json::from_slice(&std::fs::read(&artifact)?)?;
        assert_eq!(saved["summary"]["valid"], 3);
        assert_eq!(saved["data"][0]["id"], "u1");
        assert_eq!(saved["data"][0]["_exportMetadata"]["sourceCollection"], "users");
        assert_eq!(saved["failures"][0]["id"], "u2");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_resumed_export_skips_what_it_already_saw() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let result = exporter(Arc::new(source().await), dir.path())
            .export(collections::USERS, 10, Some("u3"))
            .await?;
        let ids: Vec<_> = result.valid.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(ids, ["u4", "u5"]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_unknown_collection_never_touches_the_store() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let err = exporter(Arc::new(source().await), dir.path())
            .export("invoices", 10, None)
            .await
            .expect_err("not in the catalog");
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::UnknownCollection("invoices".into()))
        );
        Ok(())
    }

    #[derive(Debug)]
    struct DownSource;

    #[async_trait]
    impl SourceStore for DownSource {
        async fn fetch_page(
            &self,
            _: &str,
            _: Option<&str>,
            _: usize,
        ) -> Result<Vec<SourceRecord>, StoreError> {
            Err(StoreError::Transport("connection refused".into()))
        }

        async fn get(&self, _: &DocumentRef) -> Result<Option<SourceRecord>, StoreError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn the_one_where_an_unreachable_source_is_a_stage_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let err = exporter(Arc::new(DownSource), dir.path())
            .export(collections::USERS, 10, None)
            .await
            .expect_err("source is down");
        assert!(format!("{err:#}").contains("connection refused"));
        Ok(())
    }
}
