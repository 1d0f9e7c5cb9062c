//! 🗺️ Transformation rule tables: which source field gets which treatment, and where the
//! record lands in the target's partitioning scheme.

use std::collections::BTreeMap;

use crate::common::{SourceRecord, Value};

/// 🔧 The declared per-field conversions. See `transforms::fields` for the semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldTransform {
    Timestamp,
    GeoPoint,
    Reference,
    /// Elements are copied verbatim unless an item transform is given.
    Array(Option<Box<FieldTransform>>),
}

impl FieldTransform {
    pub fn array_of(item: FieldTransform) -> Self {
        FieldTransform::Array(Some(Box::new(item)))
    }
}

/// 🧭 Derives the natural partition key. `None` means "no natural key", and the
/// transformer falls back to `"default"`.
pub type PartitionKeyFn = fn(&SourceRecord) -> Option<String>;

#[derive(Debug, Clone)]
pub struct RuleTable {
    /// Target collection name; also stamped into `_type`.
    pub target: String,
    pub fields: BTreeMap<String, FieldTransform>,
    pub partition_key: PartitionKeyFn,
}

impl RuleTable {
    pub fn new(target: &str, partition_key: PartitionKeyFn) -> Self {
        Self {
            target: target.to_string(),
            fields: BTreeMap::new(),
            partition_key,
        }
    }

    pub fn field(mut self, name: &str, transform: FieldTransform) -> Self {
        self.fields.insert(name.to_string(), transform);
        self
    }
}

/// 🔤 A non-empty string field, as a partition key candidate.
pub fn string_field(record: &SourceRecord, name: &str) -> Option<String> {
    record
        .field(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// 🔗 The id of the document a reference field points at. Accepts the path-string form
/// too, because older records stored references as `"agencies/a1"`.
pub fn reference_id(record: &SourceRecord, name: &str) -> Option<String> {
    match record.field(name)? {
        Value::Reference(reference) => Some(reference.id().to_string()),
        Value::String(path) if !path.is_empty() => {
            Some(crate::common::DocumentRef::new(path).id().to_string())
        }
        _ => None,
    }
    .filter(|id| !id.is_empty())
}
