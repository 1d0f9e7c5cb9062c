use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backends::SourceStore;
use crate::common::{DocumentRef, SourceRecord};
use crate::error::StoreError;

/// 📦 A source store that lives entirely in RAM.
///
/// Collections are `BTreeMap`s keyed by id, so paging in id order is a range scan and
/// "start after" is `Bound::Excluded`. Clone-able: clones share the same data, which is
/// how tests seed a store and then hand it to the pipeline.
#[derive(Debug, Default, Clone)]
pub struct InMemorySource {
    collections: Arc<RwLock<BTreeMap<String, BTreeMap<String, SourceRecord>>>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🌱 Seed a whole collection. Later records with the same id win.
    pub async fn with_records(
        self,
        collection: &str,
        records: impl IntoIterator<Item = SourceRecord>,
    ) -> Self {
        {
            let mut guard = self.collections.write().await;
            let entry = guard.entry(collection.to_string()).or_default();
            for record in records {
                entry.insert(record.id.clone(), record);
            }
        }
        self
    }

    pub async fn insert(&self, collection: &str, record: SourceRecord) {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(record.id.clone(), record);
    }
}

#[async_trait]
impl SourceStore for InMemorySource {
    async fn fetch_page(
        &self,
        collection: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SourceRecord>, StoreError> {
        let guard = self.collections.read().await;
        let Some(records) = guard.get(collection) else {
            // 💤 unknown collection reads as empty, same as a real document store
            return Ok(Vec::new());
        };
        let lower = match start_after {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Unbounded,
        };
        Ok(records
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn get(&self, reference: &DocumentRef) -> Result<Option<SourceRecord>, StoreError> {
        let Some(collection) = reference.collection() else {
            return Ok(None);
        };
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|records| records.get(reference.id()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> SourceRecord {
        SourceRecord::new(id, BTreeMap::new())
    }

    #[tokio::test]
    async fn the_one_where_pages_resume_after_the_last_seen_id() {
        let source = InMemorySource::new()
            .with_records("users", ["u3", "u1", "u2", "u4"].map(record))
            .await;

        let first = source.fetch_page("users", None, 2).await.expect("page 1");
        assert_eq!(first.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), ["u1", "u2"]);

        let second = source.fetch_page("users", Some("u2"), 2).await.expect("page 2");
        assert_eq!(second.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), ["u3", "u4"]);

        let done = source.fetch_page("users", Some("u4"), 2).await.expect("page 3");
        assert!(done.is_empty());
    }

    #[tokio::test]
    async fn the_one_where_references_resolve_or_politely_dont() {
        let source = InMemorySource::new().with_records("users", [record("u1")]).await;
        assert!(source.get(&DocumentRef::new("users/u1")).await.expect("get").is_some());
        assert!(source.get(&DocumentRef::new("users/u9")).await.expect("get").is_none());
        assert!(source.get(&DocumentRef::new("u1")).await.expect("get").is_none());
    }
}
