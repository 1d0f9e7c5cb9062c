//! 📦 Common data structures: the building blocks of pmx.
//!
//! 🎬 INT. SOURCE STORE. A tenant record sits in a collection, wrapped in a map of maps,
//! holding a Timestamp it cannot explain and a Reference to a landlord it has never met.
//! It is about to be moved. Nobody asked it. Nobody ever asks the records.
//!
//! This module defines the humble types that ferry records between stages:
//! [`Value`] (the duck-typed source document, now with a type system),
//! [`DocumentRef`], [`SourceRecord`] and [`RecordFailure`].
//!
//! ## Extended JSON 🧾
//! `Value` round-trips through JSON losslessly. Scalars, arrays and maps are plain JSON.
//! The three store-native types get single-key tagged objects:
//!
//! ```text
//! {"$timestamp": {"seconds": 1609459200, "nanos": 0}}
//! {"$geopoint":  {"latitude": 40.7128, "longitude": -74.006}}
//! {"$ref":       "users/u-17"}
//! ```
//!
//! Any other object is a plain `Map`. This is the format of export artifacts and of the
//! file source. 🦆

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value as Json};

pub(crate) const TIMESTAMP_TAG: &str = "$timestamp";
pub(crate) const GEOPOINT_TAG: &str = "$geopoint";
pub(crate) const REF_TAG: &str = "$ref";

/// 🎭 One field value of a source document.
///
/// The source store is duck-typed. We are not. Every shape a source field can take gets
/// a variant, and the schema validator checks them against the static catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    /// 🕰️ Seconds since the epoch plus sub-second nanos. UTC, always.
    Timestamp { seconds: i64, nanos: u32 },
    /// 📍 Latitude first. The target wants longitude first. See `transforms::fields`.
    GeoPoint { latitude: f64, longitude: f64 },
    Reference(DocumentRef),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// 🏷️ The schema-level type name, as used in validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) | Value::Double(_) => "number",
            Value::String(_) => "string",
            Value::Timestamp { .. } => "timestamp",
            Value::GeoPoint { .. } => "geopoint",
            Value::Reference(_) => "reference",
            Value::Array(_) => "array",
            Value::Map(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// 🔍 Map member lookup. Anything that isn't a map has no members. Philosophically sound.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Double(d) if d.fract() == 0.0 => Some(*d as i64),
            _ => None,
        }
    }

    /// 🧾 Encode as extended JSON. Non-finite doubles become `null` because JSON has
    /// no opinion on NaN and neither do we.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Integer(i) => Json::Number(Number::from(*i)),
            Value::Double(d) => Number::from_f64(*d).map(Json::Number).unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Timestamp { seconds, nanos } => tagged(
                TIMESTAMP_TAG,
                serde_json::json!({ "seconds": seconds, "nanos": nanos }),
            ),
            Value::GeoPoint {
                latitude,
                longitude,
            } => tagged(
                GEOPOINT_TAG,
                serde_json::json!({ "latitude": latitude, "longitude": longitude }),
            ),
            Value::Reference(reference) => tagged(REF_TAG, Json::String(reference.path.clone())),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => Json::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }

    /// 🧾 Decode extended JSON. Tag objects with the wrong shape stay plain maps;
    /// we do not guess.
    pub fn from_json(json: Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from_json).collect()),
            Json::Object(map) => match decode_tagged(&map) {
                Some(special) => special,
                None => Value::Map(
                    map.into_iter()
                        .map(|(key, value)| (key, Value::from_json(value)))
                        .collect(),
                ),
            },
        }
    }
}

fn tagged(tag: &str, body: Json) -> Json {
    let mut map = Map::with_capacity(1);
    map.insert(tag.to_string(), body);
    Json::Object(map)
}

fn decode_tagged(map: &Map<String, Json>) -> Option<Value> {
    if map.len() != 1 {
        return None;
    }
    let (tag, body) = map.iter().next()?;
    match tag.as_str() {
        TIMESTAMP_TAG => {
            let seconds = body.get("seconds")?.as_i64()?;
            let nanos = match body.get("nanos") {
                Some(n) => u32::try_from(n.as_u64()?).ok()?,
                None => 0,
            };
            Some(Value::Timestamp { seconds, nanos })
        }
        GEOPOINT_TAG => Some(Value::GeoPoint {
            latitude: body.get("latitude")?.as_f64()?,
            longitude: body.get("longitude")?.as_f64()?,
        }),
        REF_TAG => Some(Value::Reference(DocumentRef::new(body.as_str()?))),
        _ => None,
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Json::deserialize(deserializer).map(Value::from_json)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// 🔗 A pointer to another document, by slash-separated path (`users/u-17`).
///
/// Paths may be nested (`agencies/a1/branches/b2`); the collection is always the parent
/// segment and the id the last one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentRef {
    pub path: String,
}

impl DocumentRef {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self {
            path: path.as_ref().trim_matches('/').to_string(),
        }
    }

    /// 🆔 Last path segment.
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    /// 📂 Parent segment, if the path has one.
    pub fn collection(&self) -> Option<&str> {
        let mut segments = self.path.rsplit('/');
        segments.next()?;
        segments.next().filter(|segment| !segment.is_empty())
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// 📄 A record as read from a source collection. Immutable once read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl SourceRecord {
    pub fn new(id: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|value| !value.is_null())
    }
}

/// 💀 One record that didn't make it through a stage, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub id: String,
    pub reason: String,
}

impl RecordFailure {
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// 🕰️ `2021-01-01T00:00:00.000Z`. Milliseconds, UTC, `Z` suffix. The target's dialect.
pub fn format_iso_millis(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 📁 An ISO timestamp with the filesystem-hostile characters swapped for dashes.
pub fn iso_safe_timestamp(instant: &DateTime<Utc>) -> String {
    format_iso_millis(instant).replace([':', '.'], "-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn the_one_where_extended_json_keeps_the_special_types_special() {
        let raw = serde_json::json!({
            "createdAt": {"$timestamp": {"seconds": 1609459200, "nanos": 5}},
            "location": {"$geopoint": {"latitude": 51.5, "longitude": -0.12}},
            "landlord": {"$ref": "users/u-1"},
            "price": 1250,
            "rating": 4.5,
            "tags": ["garden", "parking"]
        });

        let value = Value::from_json(raw.clone());
        assert_eq!(
            value.get("createdAt"),
            Some(&Value::Timestamp {
                seconds: 1609459200,
                nanos: 5
            })
        );
        assert_eq!(
            value.get("landlord"),
            Some(&Value::Reference(DocumentRef::new("users/u-1")))
        );
        assert_eq!(value.get("price"), Some(&Value::Integer(1250)));
        assert_eq!(value.get("rating"), Some(&Value::Double(4.5)));
        assert_eq!(value.to_json(), raw);
    }

    #[test]
    fn the_one_where_a_tag_with_company_is_just_a_map() {
        // 🧪 two keys means it's not a tag, it's a user who likes dollar signs
        let value = Value::from_json(serde_json::json!({"$ref": "users/u-1", "note": "hi"}));
        assert!(matches!(value, Value::Map(ref m) if m.len() == 2));
    }

    #[test]
    fn the_one_where_references_know_their_family_tree() {
        let nested = DocumentRef::new("/agencies/a1/branches/b2/");
        assert_eq!(nested.path, "agencies/a1/branches/b2");
        assert_eq!(nested.id(), "b2");
        assert_eq!(nested.collection(), Some("branches"));

        let orphan = DocumentRef::new("lonely");
        assert_eq!(orphan.id(), "lonely");
        assert_eq!(orphan.collection(), None);
    }

    #[test]
    fn the_one_where_artifact_names_survive_windows() {
        let instant = Utc.timestamp_opt(1609459200, 0).single().expect("valid instant");
        assert_eq!(format_iso_millis(&instant), "2021-01-01T00:00:00.000Z");
        assert_eq!(iso_safe_timestamp(&instant), "2021-01-01T00-00-00-000Z");
    }
}
