//! 📐 Collection schemas: what a valid source record is allowed to look like.

use std::collections::BTreeMap;

use crate::common::Value;
use crate::transforms::fields::timestamp_to_iso;

/// 🏷️ The types a schema speaks. Store-native values (timestamps, geopoints, references)
/// count as `Object`, the way the source SDK reported them. `Timestamp` is stricter: it
/// takes exactly what the timestamp transform can turn into an ISO string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Timestamp,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Timestamp => "timestamp",
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => matches!(value, Value::String(_)),
            FieldType::Number => matches!(value, Value::Integer(_) | Value::Double(_)),
            FieldType::Boolean => matches!(value, Value::Bool(_)),
            FieldType::Object => matches!(
                value,
                Value::Map(_)
                    | Value::Timestamp { .. }
                    | Value::GeoPoint { .. }
                    | Value::Reference(_)
            ),
            FieldType::Array => matches!(value, Value::Array(_)),
            // -- native, `{seconds, nanos}` map or RFC 3339 string; if it converts, it's in
            FieldType::Timestamp => !value.is_null() && timestamp_to_iso(Some(value)).is_ok(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFormat {
    Email,
}

/// 📏 The rule for one property.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub field_type: FieldType,
    pub enum_values: Option<Vec<String>>,
    pub format: Option<FieldFormat>,
    /// One level of nested required/type checks for `Object` fields.
    pub nested: Option<Box<CollectionSchema>>,
    /// Element type for `Array` fields.
    pub items: Option<FieldType>,
}

impl FieldRule {
    pub fn of(field_type: FieldType) -> Self {
        Self {
            field_type,
            enum_values: None,
            format: None,
            nested: None,
            items: None,
        }
    }

    pub fn string() -> Self {
        Self::of(FieldType::String)
    }

    pub fn number() -> Self {
        Self::of(FieldType::Number)
    }

    pub fn boolean() -> Self {
        Self::of(FieldType::Boolean)
    }

    pub fn object() -> Self {
        Self::of(FieldType::Object)
    }

    pub fn timestamp() -> Self {
        Self::of(FieldType::Timestamp)
    }

    pub fn email() -> Self {
        Self {
            format: Some(FieldFormat::Email),
            ..Self::string()
        }
    }

    pub fn one_of(values: &[&str]) -> Self {
        Self {
            enum_values: Some(values.iter().map(|v| v.to_string()).collect()),
            ..Self::string()
        }
    }

    pub fn nested(schema: CollectionSchema) -> Self {
        Self {
            nested: Some(Box::new(schema)),
            ..Self::object()
        }
    }

    pub fn array_of(items: FieldType) -> Self {
        Self {
            items: Some(items),
            ..Self::of(FieldType::Array)
        }
    }
}

/// 📋 `{required, properties}` for one source collection. Declared once, never mutated.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollectionSchema {
    pub required: Vec<String>,
    pub properties: BTreeMap<String, FieldRule>,
}

impl CollectionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, fields: &[&str]) -> Self {
        self.required.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    pub fn property(mut self, name: &str, rule: FieldRule) -> Self {
        self.properties.insert(name.to_string(), rule);
        self
    }
}
