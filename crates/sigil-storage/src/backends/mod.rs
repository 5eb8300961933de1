//! Settings file backends
//!
//! Each backend loads and saves one scope's flat `KeyPath -> raw string` map.
//! Saves are deterministic (sorted keys) and atomic: content is staged in a
//! temporary file next to the target and renamed over it.

pub mod flatten;
pub mod ini;
pub mod json;
pub mod yaml;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::{IoOperation, StorageError, StorageResult};
use crate::keys::{KeyPath, KeySyntax};
use crate::types::ConfigFormat;

pub use ini::{IniBackend, IniDocument, IniSection, ROOT_SECTION};
pub use json::JsonBackend;
pub use yaml::YamlBackend;

/// Flat contents of one settings file
pub type RawMap = BTreeMap<KeyPath, String>;

/// Load/save contract for one file format
pub trait Backend: Send + Sync {
    /// Format handled by this backend
    fn format(&self) -> ConfigFormat;

    /// Load a file; a missing file is an empty map
    fn load(&self, path: &Path) -> StorageResult<RawMap>;

    /// Render a map to file content
    fn render(&self, data: &RawMap) -> StorageResult<String>;

    /// Atomically replace `path` with `data`
    fn save(&self, path: &Path, data: &RawMap) -> StorageResult<()> {
        let text = self.render(data)?;
        sigil_common::write_atomic(path, text.as_bytes())
            .map_err(|e| StorageError::io_error(path, IoOperation::Write, e))?;
        debug!(path = %path.display(), keys = data.len(), format = %self.format(), "Settings saved");
        Ok(())
    }
}

/// Read a file, `None` when it does not exist
pub(crate) fn read_to_string(path: &Path) -> StorageResult<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io_error(path, IoOperation::Read, e)),
    }
}

/// Extension-keyed backend lookup
#[derive(Clone)]
pub struct BackendRegistry {
    by_extension: HashMap<String, Arc<dyn Backend>>,
}

impl BackendRegistry {
    /// Registry with no backends
    pub fn empty() -> Self {
        Self {
            by_extension: HashMap::new(),
        }
    }

    /// INI, JSON and YAML backends sharing one key syntax
    pub fn builtin(syntax: &KeySyntax) -> Self {
        let mut registry = Self::empty();
        let ini: Arc<dyn Backend> = Arc::new(IniBackend::new(syntax.clone()));
        let json: Arc<dyn Backend> = Arc::new(JsonBackend::new(syntax.clone()));
        let yaml: Arc<dyn Backend> = Arc::new(YamlBackend::new(syntax.clone()));
        registry.register("ini", ini.clone());
        registry.register("cfg", ini);
        registry.register("json", json);
        registry.register("yaml", yaml.clone());
        registry.register("yml", yaml);
        registry
    }

    /// Register a backend for an extension, replacing any existing one
    pub fn register(&mut self, extension: &str, backend: Arc<dyn Backend>) {
        self.by_extension
            .insert(extension.trim_start_matches('.').to_lowercase(), backend);
    }

    /// Backend for a file, `None` for unknown extensions
    pub fn lookup(&self, path: &Path) -> Option<Arc<dyn Backend>> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        self.by_extension.get(&ext).cloned()
    }

    /// Backend for a file, failing for unknown extensions
    pub fn for_path(&self, path: &Path) -> StorageResult<Arc<dyn Backend>> {
        self.lookup(path).ok_or_else(|| StorageError::UnsupportedFormat {
            path: path.to_path_buf(),
        })
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::builtin(&KeySyntax::default())
    }
}
