//! 🔄 Transforms: the Rosetta Stone between the source's document shape and the target's.
//!
//! 🎬 COLD OPEN. INT. LETTINGS OFFICE. 11:58 PM.
//!
//! The listing said `createdAt: {seconds: 1609459200}`. The target wanted an ISO string.
//! The location said latitude first; GeoJSON said longitude first. The landlord was a
//! reference to a document in a database that was about to be switched off.
//! "It's just JSON to JSON," someone said. (Narrator: it was not.)
//!
//! ```text
//!   ExportedRecord ──▶ rule table ──▶ TransformedRecord
//!     id                 timestamp       id (same one, always)
//!     fields             geopoint        document { fields..., _type,
//!     export stamp       reference                  _partitionKey, _metadata }
//!                        array           partition_key
//! ```
//!
//! ## Knowledge Graph 🧠
//! - `fields.rs`: the pure per-value conversions.
//! - Rule tables live in `catalog::rules`; fields without a rule are copied verbatim in
//!   extended JSON, so a field nobody declared is never silently dropped.
//! - One bad record goes to `failed` with `Field '<name>': <reason>`; the stage goes on.

pub mod fields;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json, json};
use tracing::{debug, info};

use crate::artifacts::{ArtifactKind, ArtifactWriter, stage_artifact_name};
use crate::catalog::{Catalog, RuleTable};
use crate::common::{RecordFailure, format_iso_millis};
use crate::export::{ExportResult, ExportedRecord};

pub use fields::FieldError;

/// 🧭 Used when a record has no natural partition key.
pub const DEFAULT_PARTITION_KEY: &str = "default";

/// 🏷️ Where every migrated record says it came from.
pub const MIGRATION_SOURCE: &str = "firestore";

/// 📦 One record, reshaped for the target. Created here, consumed once by the importer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformedRecord {
    pub id: String,
    pub target_collection: String,
    pub partition_key: String,
    pub document: Map<String, Json>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformSummary {
    pub total: usize,
    pub transformed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct TransformResult {
    pub collection: String,
    pub target_collection: String,
    pub transformed_at: DateTime<Utc>,
    pub records: Vec<TransformedRecord>,
    pub failed: Vec<RecordFailure>,
    pub summary: TransformSummary,
    pub artifact: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransformArtifact<'a> {
    collection: &'a str,
    target_collection: &'a str,
    transformed_at: String,
    summary: TransformSummary,
    data: &'a [TransformedRecord],
    failures: &'a [RecordFailure],
}

pub struct Transformer {
    catalog: Arc<Catalog>,
    artifacts: ArtifactWriter,
}

impl Transformer {
    pub fn new(catalog: Arc<Catalog>, artifacts: ArtifactWriter) -> Self {
        Self { catalog, artifacts }
    }

    /// 🔧 Reshape one record. The error string is the record's failure reason.
    pub fn transform_record(
        rules: &RuleTable,
        exported: &ExportedRecord,
        transformed_at: &DateTime<Utc>,
    ) -> Result<TransformedRecord, String> {
        let record = &exported.record;
        let mut document = Map::new();
        document.insert("id".to_string(), Json::String(record.id.clone()));

        for (name, value) in &record.fields {
            // -- a source field named `id` loses to the record id; identity is not negotiable
            if name == "id" {
                continue;
            }
            let converted = match rules.fields.get(name) {
                Some(transform) => fields::apply(transform, Some(value))
                    .map_err(|e| format!("Field '{name}': {e}"))?,
                None => value.to_json(),
            };
            document.insert(name.clone(), converted);
        }

        let partition_key = (rules.partition_key)(record)
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| DEFAULT_PARTITION_KEY.to_string());

        document.insert("_type".to_string(), Json::String(rules.target.clone()));
        document.insert(
            "_partitionKey".to_string(),
            Json::String(partition_key.clone()),
        );
        document.insert(
            "_metadata".to_string(),
            json!({
                "createdAt": format_iso_millis(transformed_at),
                "source": MIGRATION_SOURCE,
                "originalId": record.id,
                "exportedAt": exported.stamp.exported_at,
            }),
        );

        Ok(TransformedRecord {
            id: record.id.clone(),
            target_collection: rules.target.clone(),
            partition_key,
            document,
        })
    }

    /// 🔄 Transform a whole export and persist the transform artifact.
    pub async fn transform(&self, export: &ExportResult) -> Result<TransformResult> {
        let collection = export.collection.as_str();
        let rules = self.catalog.rules(collection)?;
        let transformed_at = Utc::now();

        let mut records = Vec::with_capacity(export.valid.len());
        let mut failed = Vec::new();
        for exported in &export.valid {
            match Self::transform_record(rules, exported, &transformed_at) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    debug!(collection, id = %exported.record.id, %reason, "🔄 record failed to transform");
                    failed.push(RecordFailure::new(exported.record.id.clone(), reason));
                }
            }
        }

        let summary = TransformSummary {
            total: export.valid.len(),
            transformed: records.len(),
            failed: failed.len(),
        };
        let artifact = self
            .artifacts
            .write(
                &stage_artifact_name(collection, ArtifactKind::Transform, &transformed_at),
                &TransformArtifact {
                    collection,
                    target_collection: &rules.target,
                    transformed_at: format_iso_millis(&transformed_at),
                    summary,
                    data: &records,
                    failures: &failed,
                },
            )
            .await
            .context("💀 Transform finished but its artifact could not be saved")?;

        info!(
            collection,
            transformed = summary.transformed,
            failed = summary.failed,
            "🔄 transform complete"
        );
        Ok(TransformResult {
            collection: collection.to_string(),
            target_collection: rules.target.clone(),
            transformed_at,
            records,
            failed,
            summary,
            artifact: Some(artifact),
        })
    }
}
