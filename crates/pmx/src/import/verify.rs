//! 🔎 Post-import validation: read it back, compare it, trust nothing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// The pseudo-field reported when the whole document is missing.
pub const MISSING_DOCUMENT_FIELD: &str = "<document>";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationMismatch {
    pub document_id: String,
    pub field: String,
    pub expected: Json,
    pub actual: Json,
}

/// ⚖️ Every field we wrote must come back equal. Fields the store adds on its own
/// (`_etag`, `_ts`, `_rid` and friends) are not ours to judge and are ignored.
pub fn compare_documents(
    document_id: &str,
    expected: &Map<String, Json>,
    stored: Option<&Json>,
) -> Vec<ValidationMismatch> {
    let Some(stored) = stored else {
        return vec![ValidationMismatch {
            document_id: document_id.to_string(),
            field: MISSING_DOCUMENT_FIELD.to_string(),
            expected: Json::Object(expected.clone()),
            actual: Json::Null,
        }];
    };

    expected
        .iter()
        .filter_map(|(field, want)| {
            let got = stored.get(field).unwrap_or(&Json::Null);
            (!deep_equal(want, got)).then(|| ValidationMismatch {
                document_id: document_id.to_string(),
                field: field.clone(),
                expected: want.clone(),
                actual: got.clone(),
            })
        })
        .collect()
}

/// Structural equality, except numbers compare by value: `2` and `2.0` are the same
/// price whatever the store's JSON encoder thinks.
pub fn deep_equal(a: &Json, b: &Json) -> bool {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Json::Array(xs), Json::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
        (Json::Object(xs), Json::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| deep_equal(x, y)))
        }
        _ => a == b,
    }
}
