//! 🔧 Field transforms: one source value in, one target JSON value out. No I/O, no state.
//!
//! Every function here maps null (or absent) to null, because an optional field that
//! was empty in the source should stay empty in the target, not explode.

use chrono::{DateTime, Utc};
use serde_json::{Value as Json, json};
use thiserror::Error;

use crate::catalog::FieldTransform;
use crate::common::{DocumentRef, Value, format_iso_millis};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("cannot convert {got} to {target}")]
    Unsupported { target: &'static str, got: String },
    #[error("timestamp out of range: {0}")]
    OutOfRange(String),
    #[error("element [{index}]: {source}")]
    Element {
        index: usize,
        #[source]
        source: Box<FieldError>,
    },
}

fn unsupported(target: &'static str, value: &Value) -> FieldError {
    FieldError::Unsupported {
        target,
        got: value.type_name().to_string(),
    }
}

/// 🎯 Apply one declared transform.
pub fn apply(transform: &FieldTransform, value: Option<&Value>) -> Result<Json, FieldError> {
    match transform {
        FieldTransform::Timestamp => timestamp_to_iso(value),
        FieldTransform::GeoPoint => geopoint_to_geojson(value),
        FieldTransform::Reference => reference_to_pointer(value),
        FieldTransform::Array(item) => array_passthrough(value, item.as_deref()),
    }
}

/// 🕰️ Store timestamp → `YYYY-MM-DDTHH:MM:SS.mmmZ`.
///
/// Accepts a native timestamp, the serialized `{seconds, nanos}` / `{_seconds,
/// _nanoseconds}` shapes the source's SDKs leave behind, and RFC 3339 strings.
pub fn timestamp_to_iso(value: Option<&Value>) -> Result<Json, FieldError> {
    let instant = match value {
        None | Some(Value::Null) => return Ok(Json::Null),
        Some(Value::Timestamp { seconds, nanos }) => from_parts(*seconds, i64::from(*nanos))?,
        Some(Value::String(raw)) => DateTime::parse_from_rfc3339(raw)
            .map_err(|_| FieldError::Unsupported {
                target: "timestamp",
                got: format!("string '{raw}'"),
            })?
            .with_timezone(&Utc),
        Some(map @ Value::Map(_)) => {
            let seconds = ["seconds", "_seconds"]
                .iter()
                .find_map(|key| map.get(key).and_then(whole_number))
                .ok_or_else(|| unsupported("timestamp", map))?;
            let nanos = ["nanos", "nanoseconds", "_nanoseconds"]
                .iter()
                .find_map(|key| map.get(key).and_then(whole_number))
                .unwrap_or(0);
            from_parts(seconds, nanos)?
        }
        Some(other) => return Err(unsupported("timestamp", other)),
    };
    Ok(Json::String(format_iso_millis(&instant)))
}

fn whole_number(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        // -- SDK dumps sometimes carry seconds as 1609459200.0
        Value::Double(d) if d.is_finite() => Some(d.trunc() as i64),
        _ => None,
    }
}

fn from_parts(seconds: i64, nanos: i64) -> Result<DateTime<Utc>, FieldError> {
    u32::try_from(nanos)
        .ok()
        .and_then(|nanos| DateTime::from_timestamp(seconds, nanos))
        .ok_or_else(|| FieldError::OutOfRange(format!("{seconds}s + {nanos}ns")))
}

/// 📍 Store geopoint → GeoJSON `Point`. GeoJSON is longitude first; the source is
/// latitude first. This function is the entire reason that bug never ships.
pub fn geopoint_to_geojson(value: Option<&Value>) -> Result<Json, FieldError> {
    let (latitude, longitude) = match value {
        None | Some(Value::Null) => return Ok(Json::Null),
        Some(Value::GeoPoint {
            latitude,
            longitude,
        }) => (*latitude, *longitude),
        Some(map @ Value::Map(_)) => {
            let pick = |plain: &str, underscored: &str| {
                map.get(plain)
                    .or_else(|| map.get(underscored))
                    .and_then(Value::as_f64)
            };
            match (pick("latitude", "_latitude"), pick("longitude", "_longitude")) {
                (Some(latitude), Some(longitude)) => (latitude, longitude),
                _ => return Err(unsupported("geopoint", map)),
            }
        }
        Some(other) => return Err(unsupported("geopoint", other)),
    };
    Ok(json!({ "type": "Point", "coordinates": [longitude, latitude] }))
}

/// 🔗 Store reference → `{id, path, collection}`.
pub fn reference_to_pointer(value: Option<&Value>) -> Result<Json, FieldError> {
    let (reference, id, collection) = match value {
        None | Some(Value::Null) => return Ok(Json::Null),
        Some(Value::Reference(reference)) => (reference.clone(), None, None),
        Some(Value::String(path)) if !path.trim_matches('/').is_empty() => {
            (DocumentRef::new(path), None, None)
        }
        Some(map @ Value::Map(_)) => {
            let path = map
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| unsupported("reference", map))?;
            (
                DocumentRef::new(path),
                map.get("id").and_then(Value::as_str).map(str::to_string),
                map.get("collection").and_then(Value::as_str).map(str::to_string),
            )
        }
        Some(other) => return Err(unsupported("reference", other)),
    };
    let id = id.unwrap_or_else(|| reference.id().to_string());
    let collection = collection.or_else(|| reference.collection().map(str::to_string));
    Ok(json!({ "id": id, "path": reference.path, "collection": collection }))
}

/// 📚 Arrays go across element by element, through `item` when one is declared.
pub fn array_passthrough(
    value: Option<&Value>,
    item: Option<&FieldTransform>,
) -> Result<Json, FieldError> {
    let elements = match value {
        None | Some(Value::Null) => return Ok(Json::Null),
        Some(Value::Array(elements)) => elements,
        Some(other) => return Err(unsupported("array", other)),
    };
    elements
        .iter()
        .enumerate()
        .map(|(index, element)| match item {
            Some(transform) => apply(transform, Some(element)).map_err(|e| FieldError::Element {
                index,
                source: Box::new(e),
            }),
            None => Ok(element.to_json()),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Json::Array)
}
