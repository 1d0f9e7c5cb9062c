//! # Previously, on pmx...
//!
//! 🎬 The records were trapped between two stores, and somebody had to test the move
//! without renting either of them. This module is that somebody.
//!
//! `in_mem` provides an in-memory [`SourceStore`](crate::backends::SourceStore) and
//! [`TargetStore`](crate::backends::TargetStore) for tests and local rehearsal runs.
//! No network calls. No disk I/O. Just heap memory and a shared lock.
//!
//! ⚠️ This is NOT for production. If you're pointing a real migration at this, the data
//! will be migrated beautifully into a process that is about to exit.

mod in_mem_source;
mod in_mem_target;

pub use in_mem_source::InMemorySource;
pub use in_mem_target::{ChargeModel, InMemoryTarget};
