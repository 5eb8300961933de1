//! Conversion between nested documents and flat key maps
//!
//! Object keys are parsed with the backend's [`KeySyntax`], so `{"max_retries": 1}`
//! and `{"max": {"retries": 1}}` both flatten to the key `max.retries`. Scalars
//! other than strings are kept as their JSON text; nulls are dropped.

use std::path::Path;

use serde_json::{Map, Value};

use crate::backends::RawMap;
use crate::error::{StorageError, StorageResult};
use crate::keys::KeySyntax;
use crate::types::ConfigFormat;

/// Flatten a document whose root must be an object
pub fn flatten(
    doc: &Value,
    syntax: &KeySyntax,
    path: &Path,
    format: ConfigFormat,
) -> StorageResult<RawMap> {
    let mut out = RawMap::new();
    match doc {
        Value::Null => {}
        Value::Object(obj) => walk(&[], obj, syntax, path, format, &mut out)?,
        _ => {
            return Err(StorageError::parse_error(
                path,
                format.as_str(),
                "top-level value must be a mapping",
            ))
        }
    }
    Ok(out)
}

fn walk(
    prefix: &[String],
    obj: &Map<String, Value>,
    syntax: &KeySyntax,
    path: &Path,
    format: ConfigFormat,
    out: &mut RawMap,
) -> StorageResult<()> {
    for (name, value) in obj {
        let key = syntax
            .parse_under(prefix, name)
            .map_err(|e| StorageError::parse_error(path, format.as_str(), e.to_string()))?;
        match value {
            Value::Object(child) => walk(key.segments(), child, syntax, path, format, out)?,
            Value::Null => {}
            Value::String(s) => {
                out.insert(key, s.clone());
            }
            other => {
                out.insert(key, other.to_string());
            }
        }
    }
    Ok(())
}

/// Rebuild nested objects from a flat map
///
/// Fails when one key is a strict prefix of another, since a value and a
/// table cannot share a name.
pub fn unflatten(data: &RawMap) -> StorageResult<Map<String, Value>> {
    let mut root = Map::new();
    for (key, value) in data {
        let (last, parents) = match key.segments().split_last() {
            Some(split) => split,
            None => continue,
        };

        let mut node = &mut root;
        for (depth, segment) in parents.iter().enumerate() {
            let entry = node
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            node = match entry {
                Value::Object(child) => child,
                _ => {
                    return Err(StorageError::structure(format!(
                        "key '{}' cannot be nested under value '{}'",
                        key,
                        parents[..=depth].join(".")
                    )))
                }
            };
        }

        if node.contains_key(last) {
            return Err(StorageError::structure(format!(
                "key '{}' is both a value and a table",
                key
            )));
        }
        node.insert(last.clone(), Value::String(value.clone()));
    }
    Ok(root)
}
