use async_trait::async_trait;

use crate::common::{DocumentRef, SourceRecord};
use crate::error::StoreError;

/// 🚰 The document store we're migrating away from.
///
/// Two operations, both read-only: page through a collection in id order, and look up
/// one document by reference. The exporter uses the first, the reference checker the
/// second.
///
/// # Contract 📜
/// - `fetch_page` returns up to `limit` records with `id > start_after`, ascending by id.
///   An empty page means the collection is exhausted.
/// - `get` returns `Ok(None)` for a document that does not exist. Not an error. A fact.
/// - Errors are [`StoreError`]s so the retry executor can tell a hiccup from a wall.
#[async_trait]
pub trait SourceStore: std::fmt::Debug + Send + Sync {
    async fn fetch_page(
        &self,
        collection: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SourceRecord>, StoreError>;

    async fn get(&self, reference: &DocumentRef) -> Result<Option<SourceRecord>, StoreError>;
}
