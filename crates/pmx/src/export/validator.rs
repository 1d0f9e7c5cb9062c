//! 📐 The Schema Validator. Pure: a record and its schema in, violations out.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::catalog::{CollectionSchema, FieldFormat, FieldRule, FieldType};
use crate::common::{SourceRecord, Value};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is a valid regex")
});

/// 🧾 Violations in the order they were found. Empty means valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    pub errors: Vec<String>,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// 🔍 Required fields first, then every declared property that is present.
pub fn validate_record(record: &SourceRecord, schema: &CollectionSchema) -> Validation {
    let mut errors = Vec::new();
    check_fields(&record.fields, schema, "", &mut errors);
    Validation { errors }
}

fn check_fields(
    fields: &BTreeMap<String, Value>,
    schema: &CollectionSchema,
    prefix: &str,
    errors: &mut Vec<String>,
) {
    let present = |name: &str| fields.get(name).filter(|v| !v.is_null());

    for name in &schema.required {
        if present(name).is_none() {
            errors.push(format!("Missing required field: {prefix}{name}"));
        }
    }

    for (name, rule) in &schema.properties {
        if let Some(value) = present(name) {
            check_value(&format!("{prefix}{name}"), value, rule, errors);
        }
    }
}

fn check_value(path: &str, value: &Value, rule: &FieldRule, errors: &mut Vec<String>) {
    if !rule.field_type.accepts(value) {
        errors.push(type_error(path, rule.field_type, value));
        // -- wrong type: the finer checks below would only repeat the same complaint
        return;
    }

    if let Some(allowed) = &rule.enum_values {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_json().to_string(),
        };
        if !allowed.iter().any(|a| *a == rendered) {
            errors.push(format!(
                "Invalid value for field '{path}': '{rendered}' is not one of [{}]",
                allowed.join(", ")
            ));
        }
    }

    if let (Some(FieldFormat::Email), Value::String(s)) = (rule.format, value) {
        if !EMAIL.is_match(s) {
            errors.push(format!("Invalid email format for field '{path}'"));
        }
    }

    if let (Some(nested), Value::Map(inner)) = (&rule.nested, value) {
        check_fields(inner, nested, &format!("{path}."), errors);
    }

    if let (Some(items), Value::Array(elements)) = (rule.items, value) {
        for (index, element) in elements.iter().enumerate() {
            if !items.accepts(element) {
                errors.push(type_error(&format!("{path}[{index}]"), items, element));
            }
        }
    }
}

fn type_error(path: &str, expected: FieldType, got: &Value) -> String {
    format!(
        "Invalid type for field '{path}': expected {}, got {}",
        expected.name(),
        got.type_name()
    )
}
