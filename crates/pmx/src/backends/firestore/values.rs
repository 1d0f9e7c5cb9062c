//! 🔤 Firestore's typed-value JSON, decoded into [`Value`].
//!
//! The REST API wraps every value in a single-key object naming its type:
//! `{"stringValue": "x"}`, `{"integerValue": "42"}` (yes, a string), `{"mapValue":
//! {"fields": {...}}}` and so on. This module peels that wrapper off.

use std::collections::BTreeMap;

use chrono::{DateTime, Timelike};
use serde_json::{Map, Value as Json};

use crate::common::{DocumentRef, SourceRecord, Value};
use crate::error::StoreError;

/// Strip `projects/<p>/databases/<d>/documents/` off a full resource name.
pub(crate) fn relative_path(name: &str) -> &str {
    match name.find("/documents/") {
        Some(at) => &name[at + "/documents/".len()..],
        None => name,
    }
}

/// 📄 Turn one REST `Document` (`{name, fields, createTime, updateTime}`) into a record.
pub(crate) fn decode_document(document: &Json) -> Result<SourceRecord, StoreError> {
    let name = document
        .get("name")
        .and_then(Json::as_str)
        .ok_or_else(|| StoreError::Decode("document without a `name`".to_string()))?;
    let id = DocumentRef::new(relative_path(name)).id().to_string();
    let fields = match document.get("fields") {
        Some(Json::Object(fields)) => decode_fields(fields)?,
        Some(other) => {
            return Err(StoreError::Decode(format!(
                "document '{name}' has non-object fields: {other}"
            )));
        }
        // -- an empty document arrives with no `fields` key at all
        None => BTreeMap::new(),
    };
    Ok(SourceRecord::new(id, fields))
}

fn decode_fields(fields: &Map<String, Json>) -> Result<BTreeMap<String, Value>, StoreError> {
    fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), decode_value(value)?)))
        .collect()
}

pub(crate) fn decode_value(value: &Json) -> Result<Value, StoreError> {
    let Some((kind, inner)) = value.as_object().and_then(|o| o.iter().next()) else {
        return Err(StoreError::Decode(format!("not a typed value: {value}")));
    };
    let bad = || StoreError::Decode(format!("malformed {kind}: {inner}"));

    Ok(match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Bool(inner.as_bool().ok_or_else(bad)?),
        "integerValue" => {
            // -- int64 travels as a string so JavaScript can't round it. Accept both anyway.
            let parsed = match inner {
                Json::String(s) => s.parse::<i64>().ok(),
                other => other.as_i64(),
            };
            Value::Integer(parsed.ok_or_else(bad)?)
        }
        "doubleValue" => {
            let parsed = match inner {
                Json::String(s) => s.parse::<f64>().ok(),
                other => other.as_f64(),
            };
            Value::Double(parsed.ok_or_else(bad)?)
        }
        "stringValue" => Value::String(inner.as_str().ok_or_else(bad)?.to_string()),
        // -- base64 stays base64; nothing downstream wants raw bytes
        "bytesValue" => Value::String(inner.as_str().ok_or_else(bad)?.to_string()),
        "timestampValue" => {
            let raw = inner.as_str().ok_or_else(bad)?;
            let instant = DateTime::parse_from_rfc3339(raw).map_err(|_| bad())?;
            Value::Timestamp {
                seconds: instant.timestamp(),
                nanos: instant.nanosecond(),
            }
        }
        "geoPointValue" => Value::GeoPoint {
            latitude: inner.get("latitude").and_then(Json::as_f64).unwrap_or(0.0),
            longitude: inner.get("longitude").and_then(Json::as_f64).unwrap_or(0.0),
        },
        "referenceValue" => {
            Value::Reference(DocumentRef::new(relative_path(inner.as_str().ok_or_else(bad)?)))
        }
        "arrayValue" => Value::Array(match inner.get("values") {
            Some(Json::Array(values)) => {
                values.iter().map(decode_value).collect::<Result<_, _>>()?
            }
            _ => Vec::new(),
        }),
        "mapValue" => Value::Map(match inner.get("fields") {
            Some(Json::Object(fields)) => decode_fields(fields)?,
            _ => BTreeMap::new(),
        }),
        other => return Err(StoreError::Decode(format!("unknown value type '{other}'"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_every_wrapper_comes_off() {
        let document = json!({
            "name": "projects/acme/databases/(default)/documents/properties/p1",
            "fields": {
                "title": {"stringValue": "Two-bed flat"},
                "price": {"integerValue": "1450"},
                "rating": {"doubleValue": 4.5},
                "furnished": {"booleanValue": true},
                "deletedAt": {"nullValue": null},
                "createdAt": {"timestampValue": "2021-01-01T00:00:00.250Z"},
                "location": {"geoPointValue": {"latitude": 51.5, "longitude": -0.12}},
                "agency": {"referenceValue": "projects/acme/databases/(default)/documents/agencies/a1"},
                "images": {"arrayValue": {"values": [{"stringValue": "a.jpg"}]}},
                "address": {"mapValue": {"fields": {"city": {"stringValue": "Leeds"}}}},
                "tags": {"arrayValue": {}}
            }
        });

        let record = decode_document(&document).expect("decodes");
        assert_eq!(record.id, "p1");
        assert_eq!(record.fields["price"], Value::Integer(1450));
        assert_eq!(record.fields["rating"], Value::Double(4.5));
        assert_eq!(record.fields["deletedAt"], Value::Null);
        assert_eq!(
            record.fields["createdAt"],
            Value::Timestamp {
                seconds: 1_609_459_200,
                nanos: 250_000_000
            }
        );
        assert_eq!(
            record.fields["agency"],
            Value::Reference(DocumentRef::new("agencies/a1"))
        );
        assert_eq!(record.fields["images"], Value::Array(vec![Value::from("a.jpg")]));
        assert_eq!(
            record.fields["address"].get("city"),
            Some(&Value::from("Leeds"))
        );
        assert_eq!(record.fields["tags"], Value::Array(Vec::new()));
    }

    #[test]
    fn the_one_where_a_mystery_type_is_a_decode_error() {
        let err = decode_value(&json!({"vectorValue": {}})).expect_err("unknown type");
        assert!(matches!(err, StoreError::Decode(_)));
        assert!(decode_value(&json!({"integerValue": "forty"})).is_err());
    }
}
