//! Development links
//!
//! A package under development can link its in-tree defaults file so that the
//! `default` scope becomes writable and its specification lives beside the
//! defaults. Links are kept in `<user root>/dev-links.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use sigil_common::{load_json_or_default, save_json_atomic, JsonStoreError};

use crate::error::{IoOperation, StorageError, StorageResult};
use crate::provider_id::ProviderId;

/// Registry file name under the user root
pub const DEV_LINKS_FILE: &str = "dev-links.json";

const DEV_LINKS_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct DevLinksFile {
    version: u32,
    #[serde(default)]
    links: BTreeMap<String, PathBuf>,
}

impl Default for DevLinksFile {
    fn default() -> Self {
        Self {
            version: DEV_LINKS_VERSION,
            links: BTreeMap::new(),
        }
    }
}

/// Provider id to writable defaults file
pub struct DevLinks {
    path: PathBuf,
    state: RwLock<DevLinksFile>,
}

impl DevLinks {
    /// Load the registry under `user_root`; a missing file is an empty registry
    pub fn load(user_root: &Path) -> StorageResult<Self> {
        let path = user_root.join(DEV_LINKS_FILE);
        let state: DevLinksFile = load_json_or_default(&path)
            .map_err(|e| map_json_error(&path, IoOperation::Read, e))?;
        if state.version != DEV_LINKS_VERSION {
            return Err(StorageError::parse_error(
                &path,
                "json",
                format!("unsupported dev-links version {}", state.version),
            ));
        }
        debug!(path = %path.display(), links = state.links.len(), "Loaded dev links");
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Registry file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Link `provider` to `defaults_file` and persist
    pub fn link(&self, provider: &ProviderId, defaults_file: impl Into<PathBuf>) -> StorageResult<()> {
        let defaults_file = defaults_file.into();
        let mut state = self.state.write();
        let mut next = state.clone();
        next.links
            .insert(provider.as_str().to_string(), defaults_file.clone());
        save_json_atomic(&self.path, &next)
            .map_err(|e| map_json_error(&self.path, IoOperation::Write, e))?;
        *state = next;
        info!(provider = %provider, defaults = %defaults_file.display(), "Linked provider defaults");
        Ok(())
    }

    /// Remove a link; returns whether one existed
    pub fn unlink(&self, provider: &ProviderId) -> StorageResult<bool> {
        let mut state = self.state.write();
        if !state.links.contains_key(provider.as_str()) {
            return Ok(false);
        }
        let mut next = state.clone();
        next.links.remove(provider.as_str());
        save_json_atomic(&self.path, &next)
            .map_err(|e| map_json_error(&self.path, IoOperation::Write, e))?;
        *state = next;
        info!(provider = %provider, "Unlinked provider defaults");
        Ok(true)
    }

    /// Linked defaults file for `provider`
    pub fn get(&self, provider: &ProviderId) -> Option<PathBuf> {
        self.state.read().links.get(provider.as_str()).cloned()
    }

    /// Every link; entries whose names no longer normalize are skipped
    pub fn all(&self) -> Vec<(ProviderId, PathBuf)> {
        self.state
            .read()
            .links
            .iter()
            .filter_map(|(name, path)| {
                ProviderId::normalize(name)
                    .ok()
                    .map(|id| (id, path.clone()))
            })
            .collect()
    }
}

fn map_json_error(path: &Path, operation: IoOperation, error: JsonStoreError) -> StorageError {
    match error {
        JsonStoreError::Io(e) => StorageError::io_error(path, operation, e),
        JsonStoreError::Serialize(e) => StorageError::parse_error(path, "json", e.to_string()),
        JsonStoreError::NotFound { .. } => StorageError::io_error(
            path,
            IoOperation::Read,
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_link_persists() {
        let dir = tempdir().unwrap();
        let pkg = ProviderId::normalize("pkg").unwrap();

        let links = DevLinks::load(dir.path()).unwrap();
        assert!(links.get(&pkg).is_none());
        links.link(&pkg, "/src/pkg/defaults.ini").unwrap();

        let reloaded = DevLinks::load(dir.path()).unwrap();
        assert_eq!(reloaded.get(&pkg), Some(PathBuf::from("/src/pkg/defaults.ini")));
        assert_eq!(reloaded.all().len(), 1);

        let text = std::fs::read_to_string(dir.path().join(DEV_LINKS_FILE)).unwrap();
        assert!(text.contains("\"version\": 1"));
    }

    #[test]
    fn test_unlink() {
        let dir = tempdir().unwrap();
        let pkg = ProviderId::normalize("pkg").unwrap();
        let links = DevLinks::load(dir.path()).unwrap();

        assert!(!links.unlink(&pkg).unwrap());
        links.link(&pkg, "/src/pkg/defaults.ini").unwrap();
        assert!(links.unlink(&pkg).unwrap());
        assert!(DevLinks::load(dir.path()).unwrap().get(&pkg).is_none());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEV_LINKS_FILE),
            r#"{"version": 9, "links": {}}"#,
        )
        .unwrap();
        assert!(matches!(
            DevLinks::load(dir.path()),
            Err(StorageError::ParseError { .. })
        ));
    }
}
