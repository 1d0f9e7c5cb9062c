//! 📡 The document gateway: the HTTP front door of the partitioned target store.
//!
//! Bulk writes are batch requests of `Upsert` operations; reads are point GETs that must
//! name the partition key. Status codes map onto `StoreError` kinds so the importer's
//! retry executor knows a 429 from a 401.

mod gateway_target;

pub use gateway_target::{GatewayTarget, GatewayTargetConfig};
