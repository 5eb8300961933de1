//! JSON settings files

use std::path::Path;

use serde_json::Value;

use crate::backends::flatten::{flatten, unflatten};
use crate::backends::{read_to_string, Backend, RawMap};
use crate::error::{StorageError, StorageResult};
use crate::keys::KeySyntax;
use crate::types::ConfigFormat;

/// Backend for `.json` settings files
pub struct JsonBackend {
    syntax: KeySyntax,
}

impl JsonBackend {
    pub fn new(syntax: KeySyntax) -> Self {
        Self { syntax }
    }
}

impl Backend for JsonBackend {
    fn format(&self) -> ConfigFormat {
        ConfigFormat::Json
    }

    fn load(&self, path: &Path) -> StorageResult<RawMap> {
        let text = match read_to_string(path)? {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Ok(RawMap::new()),
        };
        let doc: Value = serde_json::from_str(&text)
            .map_err(|e| StorageError::parse_error(path, "JSON", e.to_string()))?;
        flatten(&doc, &self.syntax, path, ConfigFormat::Json)
    }

    fn render(&self, data: &RawMap) -> StorageResult<String> {
        let doc = Value::Object(unflatten(data)?);
        let mut text = serde_json::to_string_pretty(&doc)
            .map_err(|e| StorageError::internal(format!("JSON serialization failed: {}", e)))?;
        text.push('\n');
        Ok(text)
    }
}
