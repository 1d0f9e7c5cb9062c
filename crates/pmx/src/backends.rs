//! 🔌 Backends: where the real I/O happens.
//!
//! 🚰 Source stores hand over records, target stores take the transformed documents.
//! Everything in between (validation, transformation, batching, retries) is pure pipeline
//! and never learns which store it is talking to.
//!
//! 🎭 This module is the casting agency:
//! - `firestore`: the production source, over REST.
//! - `gateway`: the production target, a partitioned document store behind HTTP.
//! - `file`: JSON dumps on disk, both directions. For rehearsals.
//! - `in_mem`: heap-only doubles. For tests.
//!
//! The stages take `Arc<dyn SourceStore>` / `Arc<dyn TargetStore>`, so tests inject fakes
//! directly; the enums below exist so the config layer can pick a store by name.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value as Json;

use crate::app_config::{SourceConfig, TargetConfig};
use crate::common::{DocumentRef, SourceRecord};
use crate::error::StoreError;
use crate::transforms::TransformedRecord;

pub(crate) mod common_config;
pub mod file;
pub mod firestore;
pub mod gateway;
pub mod in_mem;
mod source;
mod target;

// 🎯 Re-exports so callers write `backends::GatewayTargetConfig` instead of spelunking.
pub use common_config::CommonHttpConfig;
pub use file::{FileSource, FileSourceConfig, FileTarget, FileTargetConfig};
pub use firestore::{FirestoreSource, FirestoreSourceConfig};
pub use gateway::{GatewayTarget, GatewayTargetConfig};
pub use in_mem::{ChargeModel, InMemorySource, InMemoryTarget};
pub use source::SourceStore;
pub use target::{BulkWriteOutcome, TargetStore, WriteResult};

/// 🎭 The many faces of a source store, chosen by configuration.
#[derive(Debug)]
pub enum SourceBackend {
    Firestore(FirestoreSource),
    File(FileSource),
    InMemory(InMemorySource),
}

impl SourceBackend {
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        Ok(match config {
            SourceConfig::Firestore(c) => SourceBackend::Firestore(
                FirestoreSource::new(c.clone())
                    .context("💀 Could not stand up the Firestore source")?,
            ),
            SourceConfig::File(c) => SourceBackend::File(
                FileSource::new(c.clone()).context("💀 Could not stand up the file source")?,
            ),
        })
    }

    pub fn into_store(self) -> Arc<dyn SourceStore> {
        Arc::new(self)
    }
}

#[async_trait]
impl SourceStore for SourceBackend {
    async fn fetch_page(
        &self,
        collection: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SourceRecord>, StoreError> {
        match self {
            SourceBackend::Firestore(s) => s.fetch_page(collection, start_after, limit).await,
            SourceBackend::File(s) => s.fetch_page(collection, start_after, limit).await,
            SourceBackend::InMemory(s) => s.fetch_page(collection, start_after, limit).await,
        }
    }

    async fn get(&self, reference: &DocumentRef) -> Result<Option<SourceRecord>, StoreError> {
        match self {
            SourceBackend::Firestore(s) => s.get(reference).await,
            SourceBackend::File(s) => s.get(reference).await,
            SourceBackend::InMemory(s) => s.get(reference).await,
        }
    }
}

/// 🎭 Mirrors `SourceBackend` on the other end of the pipeline. Symmetry is a feature.
#[derive(Debug)]
pub enum TargetBackend {
    Gateway(GatewayTarget),
    File(FileTarget),
    InMemory(InMemoryTarget),
}

impl TargetBackend {
    pub async fn from_config(config: &TargetConfig) -> Result<Self> {
        Ok(match config {
            TargetConfig::Gateway(c) => TargetBackend::Gateway(
                GatewayTarget::new(c.clone())
                    .context("💀 Could not stand up the gateway target")?,
            ),
            TargetConfig::File(c) => TargetBackend::File(
                FileTarget::new(c.clone())
                    .await
                    .context("💀 Could not stand up the file target")?,
            ),
        })
    }

    pub fn into_store(self) -> Arc<dyn TargetStore> {
        Arc::new(self)
    }
}

#[async_trait]
impl TargetStore for TargetBackend {
    async fn bulk_upsert(
        &self,
        collection: &str,
        records: &[TransformedRecord],
    ) -> Result<BulkWriteOutcome, StoreError> {
        match self {
            TargetBackend::Gateway(t) => t.bulk_upsert(collection, records).await,
            TargetBackend::File(t) => t.bulk_upsert(collection, records).await,
            TargetBackend::InMemory(t) => t.bulk_upsert(collection, records).await,
        }
    }

    async fn read(
        &self,
        collection: &str,
        id: &str,
        partition_key: &str,
    ) -> Result<Option<Json>, StoreError> {
        match self {
            TargetBackend::Gateway(t) => t.read(collection, id, partition_key).await,
            TargetBackend::File(t) => t.read(collection, id, partition_key).await,
            TargetBackend::InMemory(t) => t.read(collection, id, partition_key).await,
        }
    }
}
