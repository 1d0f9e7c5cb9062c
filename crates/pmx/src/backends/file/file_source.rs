use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::backends::SourceStore;
use crate::common::{DocumentRef, SourceRecord};
use crate::error::StoreError;

// -- 📂 FileSourceConfig: a directory of `<collection>.json` dumps, one array per file.
// -- Fields are Option so the config loader can name every missing key at once.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct FileSourceConfig {
    pub dir: Option<PathBuf>,
}

impl FileSourceConfig {
    pub(crate) fn missing_keys(&self, prefix: &str) -> Vec<String> {
        match self.dir {
            Some(_) => Vec::new(),
            None => vec![format!("{prefix}.dir")],
        }
    }
}

type Collection = Arc<BTreeMap<String, SourceRecord>>;

/// 📂 FileSource: reads a source-store dump from disk.
///
/// Each `<dir>/<collection>.json` holds a JSON array of `{id, fields}` records in
/// extended JSON. A collection file is read once, on first touch, and cached sorted by
/// id. Good for rehearsals against a snapshot and for the CLI's offline mode.
#[derive(Debug)]
pub struct FileSource {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Option<Collection>>>,
}

impl FileSource {
    pub fn new(config: FileSourceConfig) -> Result<Self> {
        let dir = config
            .dir
            .context("💀 FileSource needs a `dir`. We can't read a dump from nowhere.")?;
        Ok(Self {
            dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    async fn collection(&self, name: &str) -> Result<Option<Collection>, StoreError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(name) {
            return Ok(cached.clone());
        }

        let path = self.dir.join(format!("{name}.json"));
        let loaded = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let records: Vec<SourceRecord> = serde_json::from_slice(&bytes).map_err(|e| {
                    StoreError::Decode(format!("'{}' is not a record array: {e}", path.display()))
                })?;
                debug!(
                    collection = name,
                    records = records.len(),
                    "📖 loaded collection dump from {}",
                    path.display()
                );
                Some(Arc::new(
                    records
                        .into_iter()
                        .map(|record| (record.id.clone(), record))
                        .collect(),
                ))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(StoreError::Transport(format!(
                    "reading '{}': {e}",
                    path.display()
                )));
            }
        };
        cache.insert(name.to_string(), loaded.clone());
        Ok(loaded)
    }
}

#[async_trait]
impl SourceStore for FileSource {
    async fn fetch_page(
        &self,
        collection: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SourceRecord>, StoreError> {
        let records = self.collection(collection).await?.ok_or_else(|| {
            StoreError::Rejected {
                status: 404,
                message: format!(
                    "no dump for collection '{collection}' in '{}'",
                    self.dir.display()
                ),
            }
        })?;
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
            .collection(collection)
            .await?
            .and_then(|records| records.get(reference.id()).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Value;

    #[tokio::test]
    async fn the_one_where_a_dump_on_disk_pages_like_a_real_store() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join("properties.json"),
            r#"[
                {"id": "p2", "fields": {"title": "Flat", "landlord": {"$ref": "users/u1"}}},
                {"id": "p1", "fields": {"title": "House"}}
            ]"#,
        )?;
        let source = FileSource::new(FileSourceConfig {
            dir: Some(dir.path().to_path_buf()),
        })?;

        let page = source.fetch_page("properties", None, 10).await?;
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "p1");
        assert_eq!(
            page[1].fields.get("landlord"),
            Some(&Value::Reference(DocumentRef::new("users/u1")))
        );

        assert!(source.get(&DocumentRef::new("properties/p2")).await?.is_some());
        assert!(source.get(&DocumentRef::new("users/u1")).await?.is_none());
        assert!(source.fetch_page("users", None, 10).await.is_err());
        Ok(())
    }
}
