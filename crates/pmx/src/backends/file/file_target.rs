use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as Json;
use tokio::sync::Mutex;
use tracing::debug;

use crate::backends::{BulkWriteOutcome, TargetStore, WriteResult};
use crate::error::StoreError;
use crate::transforms::TransformedRecord;

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct FileTargetConfig {
    pub dir: Option<PathBuf>,
}

impl FileTargetConfig {
    pub(crate) fn missing_keys(&self, prefix: &str) -> Vec<String> {
        match self.dir {
            Some(_) => Vec::new(),
            None => vec![format!("{prefix}.dir")],
        }
    }
}

/// 💾 FileTarget: a target store made of one JSON object per collection, `id → document`.
///
/// Every bulk call reads the collection file, upserts into it, and writes it back whole.
/// That is O(collection) per batch and nobody is pretending otherwise: this backend
/// exists for dry runs you can `jq` afterwards. The mutex serializes writers so
/// concurrent batches cannot interleave their read-modify-write cycles.
#[derive(Debug)]
pub struct FileTarget {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTarget {
    pub async fn new(config: FileTargetConfig) -> Result<Self> {
        let dir = config
            .dir
            .context("💀 FileTarget needs a `dir`. Documents have to land somewhere.")?;
        tokio::fs::create_dir_all(&dir).await.with_context(|| {
            format!(
                "💀 Could not create the target directory '{}'. Permissions, a read-only mount, or a file squatting on that name.",
                dir.display()
            )
        })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.json"))
    }
}

async fn load(path: &Path) -> Result<BTreeMap<String, Json>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Decode(format!("'{}': {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(StoreError::Transport(format!(
            "reading '{}': {e}",
            path.display()
        ))),
    }
}

#[async_trait]
impl TargetStore for FileTarget {
    async fn bulk_upsert(
        &self,
        collection: &str,
        records: &[TransformedRecord],
    ) -> Result<BulkWriteOutcome, StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(collection);
        let mut documents = load(&path).await?;

        for record in records {
            documents.insert(record.id.clone(), Json::Object(record.document.clone()));
        }

        let rendered = serde_json::to_vec_pretty(&documents)
            .map_err(|e| StoreError::Decode(format!("rendering '{}': {e}", path.display())))?;
        tokio::fs::write(&path, rendered).await.map_err(|e| {
            StoreError::Transport(format!("writing '{}': {e}", path.display()))
        })?;
        debug!(
            collection,
            written = records.len(),
            total = documents.len(),
            "💾 upserted batch into {}",
            path.display()
        );

        Ok(BulkWriteOutcome {
            results: records.iter().map(|r| WriteResult::ok(&r.id)).collect(),
            // -- disk is free, at least in request units
            request_charge: None,
        })
    }

    async fn read(
        &self,
        collection: &str,
        id: &str,
        _partition_key: &str,
    ) -> Result<Option<Json>, StoreError> {
        let _guard = self.write_lock.lock().await;
        Ok(load(&self.path_for(collection)).await?.remove(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, title: &str) -> TransformedRecord {
        let mut document = serde_json::Map::new();
        document.insert("id".into(), json!(id));
        document.insert("title".into(), json!(title));
        TransformedRecord {
            id: id.to_string(),
            target_collection: "properties".to_string(),
            partition_key: "a1".to_string(),
            document,
        }
    }

    #[tokio::test]
    async fn the_one_where_the_second_write_replaces_the_first() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = FileTarget::new(FileTargetConfig {
            dir: Some(dir.path().join("out")),
        })
        .await?;

        target.bulk_upsert("properties", &[record("p1", "Old")]).await?;
        let outcome = target
            .bulk_upsert("properties", &[record("p1", "New"), record("p2", "Other")])
            .await?;
        assert!(outcome.results.iter().all(|r| r.error.is_none()));
        assert_eq!(outcome.request_charge, None);

        let stored = target.read("properties", "p1", "a1").await?;
        assert_eq!(stored.and_then(|d| d.get("title").cloned()), Some(json!("New")));
        assert!(target.read("properties", "p9", "a1").await?.is_none());
        Ok(())
    }
}
