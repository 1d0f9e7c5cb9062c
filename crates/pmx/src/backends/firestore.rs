//! 🔥 The Firestore REST source: where the property-management records live today.
//!
//! 🧠 Knowledge graph:
//! - `firestore_source.rs`: paging (`runQuery`) and point reads, mapped onto `SourceStore`.
//! - `values.rs`: Firestore's `{"stringValue": ...}` wrappers decoded into `Value`.
//! - HTTP status → `StoreError` kind happens here, so the retry executor upstream can tell
//!   a throttle from a bad token.

mod firestore_source;
mod values;

pub use firestore_source::{FirestoreSource, FirestoreSourceConfig};
