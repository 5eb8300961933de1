//! YAML settings files

use std::path::Path;

use serde_json::{Map, Number, Value};
use serde_yaml::Value as YamlValue;

use crate::backends::flatten::{flatten, unflatten};
use crate::backends::{read_to_string, Backend, RawMap};
use crate::error::{StorageError, StorageResult};
use crate::keys::KeySyntax;
use crate::types::ConfigFormat;

/// Backend for `.yaml` / `.yml` settings files
pub struct YamlBackend {
    syntax: KeySyntax,
}

impl YamlBackend {
    pub fn new(syntax: KeySyntax) -> Self {
        Self { syntax }
    }
}

impl Backend for YamlBackend {
    fn format(&self) -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn load(&self, path: &Path) -> StorageResult<RawMap> {
        let text = match read_to_string(path)? {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Ok(RawMap::new()),
        };
        let doc: YamlValue = serde_yaml::from_str(&text)
            .map_err(|e| StorageError::parse_error(path, "YAML", e.to_string()))?;
        let doc = to_json(doc).map_err(|message| StorageError::parse_error(path, "YAML", message))?;
        flatten(&doc, &self.syntax, path, ConfigFormat::Yaml)
    }

    fn render(&self, data: &RawMap) -> StorageResult<String> {
        let doc = Value::Object(unflatten(data)?);
        serde_yaml::to_string(&doc)
            .map_err(|e| StorageError::internal(format!("YAML serialization failed: {}", e)))
    }
}

/// Convert a YAML value into the JSON data model
fn to_json(value: YamlValue) -> Result<Value, String> {
    Ok(match value {
        YamlValue::Null => Value::Null,
        YamlValue::Bool(b) => Value::Bool(b),
        YamlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Number(u.into())
            } else {
                n.as_f64()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(n.to_string()))
            }
        }
        YamlValue::String(s) => Value::String(s),
        YamlValue::Sequence(items) => {
            Value::Array(items.into_iter().map(to_json).collect::<Result<_, _>>()?)
        }
        YamlValue::Mapping(mapping) => {
            let mut obj = Map::new();
            for (k, v) in mapping {
                let name = match k {
                    YamlValue::String(s) => s,
                    YamlValue::Number(n) => n.to_string(),
                    YamlValue::Bool(b) => b.to_string(),
                    other => return Err(format!("unsupported mapping key {:?}", other)),
                };
                obj.insert(name, to_json(v)?);
            }
            Value::Object(obj)
        }
        YamlValue::Tagged(tagged) => to_json(tagged.value)?,
    })
}
