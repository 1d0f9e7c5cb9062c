use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as Json;
use tokio::sync::Mutex;

use crate::backends::{BulkWriteOutcome, TargetStore, WriteResult};
use crate::error::StoreError;
use crate::transforms::TransformedRecord;

/// 💸 Deterministic billing: every request costs `per_request`, every record `per_record`.
/// Bigger batches amortise the request overhead, which is exactly the trade-off the
/// batch calibrator is looking for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeModel {
    pub per_request: f64,
    pub per_record: f64,
}

impl Default for ChargeModel {
    fn default() -> Self {
        Self {
            per_request: 10.0,
            per_record: 1.0,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    documents: BTreeMap<String, BTreeMap<String, Json>>,
    bulk_call_sizes: Vec<usize>,
    rejections: HashMap<String, String>,
}

/// 📦 A target store that never forgets. Documents are keyed by `(collection, id)`, so a
/// second write of the same id replaces the first, like the real thing.
///
/// 🔒 Clone-able: clones share state, so tests keep a handle to peek inside after the
/// pipeline is done with it.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTarget {
    state: Arc<Mutex<State>>,
    charge: ChargeModel,
}

impl InMemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_charge_model(mut self, charge: ChargeModel) -> Self {
        self.charge = charge;
        self
    }

    /// 🚫 Make the store refuse one record id with the given reason, on every write.
    pub async fn reject(&self, id: &str, reason: &str) {
        self.state
            .lock()
            .await
            .rejections
            .insert(id.to_string(), reason.to_string());
    }

    pub async fn documents(&self, collection: &str) -> BTreeMap<String, Json> {
        self.state
            .lock()
            .await
            .documents
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Record count of every bulk call so far, in arrival order.
    pub async fn bulk_call_sizes(&self) -> Vec<usize> {
        self.state.lock().await.bulk_call_sizes.clone()
    }
}

#[async_trait]
impl TargetStore for InMemoryTarget {
    async fn bulk_upsert(
        &self,
        collection: &str,
        records: &[TransformedRecord],
    ) -> Result<BulkWriteOutcome, StoreError> {
        let mut state = self.state.lock().await;
        state.bulk_call_sizes.push(records.len());

        let mut results = Vec::with_capacity(records.len());
        for record in records {
            if let Some(reason) = state.rejections.get(&record.id).cloned() {
                results.push(WriteResult::failed(&record.id, reason));
                continue;
            }
            state
                .documents
                .entry(collection.to_string())
                .or_default()
                .insert(record.id.clone(), Json::Object(record.document.clone()));
            results.push(WriteResult::ok(&record.id));
        }

        Ok(BulkWriteOutcome {
            results,
            request_charge: Some(
                self.charge.per_request + self.charge.per_record * records.len() as f64,
            ),
        })
    }

    async fn read(
        &self,
        collection: &str,
        id: &str,
        _partition_key: &str,
    ) -> Result<Option<Json>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .documents
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }
}
