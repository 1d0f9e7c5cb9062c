//! 🔗 The Reference Checker: every reference in a record must point at a document that
//! exists in the source store, or the record doesn't leave.

use std::collections::{BTreeMap, HashMap};

use tracing::trace;

use crate::backends::SourceStore;
use crate::common::{DocumentRef, SourceRecord, Value};
use crate::retry::{RetryPolicy, with_retry};

/// 📏 Deeper than this and we stop walking. Real documents never get close.
pub const MAX_REFERENCE_DEPTH: usize = 64;

/// A reference found in a record, with the dotted path of the field that holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundReference {
    pub field_path: String,
    pub reference: DocumentRef,
}

/// 🧭 Walk every map member and array element, collecting references in field order.
/// Anything nested beyond [`MAX_REFERENCE_DEPTH`] is reported in `too_deep`.
pub fn collect_references(fields: &BTreeMap<String, Value>) -> (Vec<FoundReference>, Vec<String>) {
    let mut found = Vec::new();
    let mut too_deep = Vec::new();
    for (name, value) in fields {
        walk(name.clone(), value, 1, &mut found, &mut too_deep);
    }
    (found, too_deep)
}

fn walk(
    path: String,
    value: &Value,
    depth: usize,
    found: &mut Vec<FoundReference>,
    too_deep: &mut Vec<String>,
) {
    if depth > MAX_REFERENCE_DEPTH {
        too_deep.push(path);
        return;
    }
    match value {
        Value::Reference(reference) => found.push(FoundReference {
            field_path: path,
            reference: reference.clone(),
        }),
        Value::Map(members) => {
            for (key, member) in members {
                walk(format!("{path}.{key}"), member, depth + 1, found, too_deep);
            }
        }
        Value::Array(elements) => {
            for (index, element) in elements.iter().enumerate() {
                walk(format!("{path}[{index}]"), element, depth + 1, found, too_deep);
            }
        }
        _ => {}
    }
}

/// 🔍 Resolve every reference of `record` against the source. Returns the violations;
/// empty means every target exists. Each distinct reference path is read once.
pub async fn check_references(
    record: &SourceRecord,
    source: &dyn SourceStore,
    retry: &RetryPolicy,
) -> Vec<String> {
    let (found, too_deep) = collect_references(&record.fields);
    let mut errors: Vec<String> = too_deep
        .into_iter()
        .map(|path| {
            format!(
                "Reference check failed at '{path}': nesting deeper than {MAX_REFERENCE_DEPTH} levels"
            )
        })
        .collect();

    // -- path → Ok(exists) | Err(message); the visited set and the answer cache in one
    let mut visited: HashMap<String, Result<bool, String>> = HashMap::new();
    for FoundReference {
        field_path,
        reference,
    } in found
    {
        if !visited.contains_key(&reference.path) {
            let answer = with_retry(retry, "resolve reference", |_| source.get(&reference))
                .await
                .map(|doc| doc.is_some())
                .map_err(|e| e.last_error().to_string());
            trace!(record = %record.id, reference = %reference, ?answer, "🔗 resolved reference");
            visited.insert(reference.path.clone(), answer);
        }
        match visited.get(&reference.path) {
            Some(Ok(true)) => {}
            Some(Ok(false)) => errors.push(format!(
                "Dangling reference at '{field_path}': {reference} does not exist"
            )),
            Some(Err(message)) => errors.push(format!(
                "Reference check failed at '{field_path}': {message}"
            )),
            None => {}
        }
    }
    errors
}
