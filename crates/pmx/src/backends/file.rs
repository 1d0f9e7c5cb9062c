//! 📂 Previously, on "Things That Could Go Wrong With A File"...
//!
//! The disk was quiet. Too quiet. Somebody wanted to rehearse the migration without
//! touching either production store, so both ends became directories full of JSON.
//!
//! - `FileSource` reads `<dir>/<collection>.json`, an array of `{id, fields}` records.
//! - `FileTarget` writes `<dir>/<collection>.json`, an object of `id → document`.
//!
//! 💀 Disk full → your problem now

mod file_source;
mod file_target;

pub use file_source::{FileSource, FileSourceConfig};
pub use file_target::{FileTarget, FileTargetConfig};
