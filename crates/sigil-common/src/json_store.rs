//! JSON persistence utilities
//!
//! Loading and atomically saving small JSON documents such as the
//! development-links registry and exported provider specifications.

use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::atomic::write_atomic;

/// JSON store errors
#[derive(Debug, Error)]
pub enum JsonStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("File not found: {path}")]
    NotFound { path: String },
}

/// Result type for JSON store operations
pub type JsonStoreResult<T> = Result<T, JsonStoreError>;

/// Load JSON from a file path
pub fn load_json<T, P>(path: P) -> JsonStoreResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(JsonStoreError::NotFound {
            path: path.display().to_string(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    let value = serde_json::from_str(&content)?;
    Ok(value)
}

/// Load JSON from file, returning default if file doesn't exist
pub fn load_json_or_default<T, P>(path: P) -> JsonStoreResult<T>
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    match load_json(path) {
        Ok(value) => Ok(value),
        Err(JsonStoreError::NotFound { .. }) => Ok(T::default()),
        Err(e) => Err(e),
    }
}

/// Save value as pretty JSON atomically (write to temp, then rename)
pub fn save_json_atomic<T, P>(path: P, value: &T) -> JsonStoreResult<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let mut content = serde_json::to_string_pretty(value)?;
    content.push('\n');
    write_atomic(path, content.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::fs;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
    struct TestLinks {
        version: u32,
        links: std::collections::BTreeMap<String, String>,
    }

    #[test]
    fn test_load_save_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("links.json");

        let mut links = TestLinks {
            version: 1,
            ..Default::default()
        };
        links
            .links
            .insert("demo".to_string(), "/tmp/demo/settings.ini".to_string());

        save_json_atomic(&path, &links).unwrap();
        let loaded: TestLinks = load_json(&path).unwrap();

        assert_eq!(links, loaded);
    }

    #[test]
    fn test_load_or_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.json");

        let links: TestLinks = load_json_or_default(&path).unwrap();
        assert_eq!(links, TestLinks::default());
    }

    #[test]
    fn test_load_corrupt_json_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let result: JsonStoreResult<TestLinks> = load_json_or_default(&path);
        assert!(matches!(result, Err(JsonStoreError::Serialize(_))));
    }
}
