use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::transforms::TransformedRecord;

/// 🧾 What the target said about one record in a bulk write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteResult {
    pub id: String,
    /// `None` means written. `Some(reason)` means the store refused this one record.
    pub error: Option<String>,
}

impl WriteResult {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            error: None,
        }
    }

    pub fn failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            error: Some(reason.into()),
        }
    }
}

/// 📦 The response to one bulk operation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BulkWriteOutcome {
    pub results: Vec<WriteResult>,
    /// 💸 Cost units the store billed for this request, if it tells us.
    pub request_charge: Option<f64>,
}

/// 🕳️ The partitioned store we're migrating into.
///
/// # Contract 📜
/// - `bulk_upsert` writes every record in one request, keyed by `id`. Writing the same id
///   twice overwrites. That is what makes re-running a migration safe.
/// - A transport-level failure is an `Err`; a per-record refusal is a `WriteResult` with
///   an error inside an `Ok`.
/// - `read` returns the stored document or `Ok(None)`.
#[async_trait]
pub trait TargetStore: std::fmt::Debug + Send + Sync {
    async fn bulk_upsert(
        &self,
        collection: &str,
        records: &[TransformedRecord],
    ) -> Result<BulkWriteOutcome, StoreError>;

    async fn read(
        &self,
        collection: &str,
        id: &str,
        partition_key: &str,
    ) -> Result<Option<serde_json::Value>, StoreError>;
}
