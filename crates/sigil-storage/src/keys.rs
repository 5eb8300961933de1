//! Key parsing and canonical key paths
//!
//! `database.max_retries`, `database_max_retries` and `Database.Max.Retries`
//! all parse to the same [`KeyPath`] `["database", "max", "retries"]` under the
//! default [`KeySyntax`]. On disk the path is written joined by `_`.

use std::fmt;
use std::str::FromStr;

use crate::error::{StorageError, StorageResult};

/// Reserved first segment of secret keys
pub const SECRET_SEGMENT: &str = "secret";

/// Letters, digits, `-`, and the delimiter characters a custom syntax leaves free.
/// Everything else (`=`, `[`, `#`, `;`, whitespace ...) has meaning in a
/// settings file and cannot be stored as a key name.
fn is_segment_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Canonical segmented configuration key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    /// Build a path from segments, lowercasing them
    pub fn from_segments<I, S>(segments: I) -> StorageResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments: Vec<String> = segments
            .into_iter()
            .map(|s| s.as_ref().to_lowercase())
            .collect();
        if segments.is_empty() {
            return Err(StorageError::malformed_key("", "key has no segments"));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(StorageError::malformed_key(
                segments.join("."),
                "empty segment",
            ));
        }
        if let Some(bad) = segments
            .iter()
            .flat_map(|s| s.chars())
            .find(|c| !is_segment_char(*c))
        {
            return Err(StorageError::malformed_key(
                segments.join("."),
                format!("character {:?} is not allowed in a key", bad),
            ));
        }
        Ok(Self(segments))
    }

    /// Parse with the default syntax
    pub fn parse(raw: &str) -> StorageResult<Self> {
        KeySyntax::default().parse(raw)
    }

    /// Segments in order
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; a key path has at least one segment
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First segment
    pub fn head(&self) -> &str {
        &self.0[0]
    }

    /// Segments after the first
    pub fn tail(&self) -> &[String] {
        &self.0[1..]
    }

    /// Whether this key lives in the reserved secret namespace
    pub fn is_secret(&self) -> bool {
        self.head() == SECRET_SEGMENT
    }

    /// Whether `prefix` is a strict prefix of this path
    pub fn has_prefix(&self, prefix: &KeyPath) -> bool {
        prefix.0.len() < self.0.len() && self.0.starts_with(&prefix.0)
    }

    /// On-disk form, segments joined by `_`
    pub fn canonical(&self) -> String {
        self.0.join("_")
    }

    /// Dotted form used for display and secret lookups
    pub fn dotted(&self) -> String {
        self.0.join(".")
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

impl FromStr for KeyPath {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyPath::parse(s)
    }
}

/// Delimiters accepted when parsing keys and the join character used on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySyntax {
    delimiters: Vec<char>,
    join: char,
}

impl Default for KeySyntax {
    fn default() -> Self {
        Self {
            delimiters: vec!['.', '_'],
            join: '_',
        }
    }
}

impl KeySyntax {
    /// Create a syntax; the join character must be one of the delimiters
    pub fn new(delimiters: Vec<char>, join: char) -> StorageResult<Self> {
        if delimiters.is_empty() {
            return Err(StorageError::internal("key syntax needs at least one delimiter"));
        }
        if !delimiters.contains(&join) {
            return Err(StorageError::internal(format!(
                "join character '{}' is not a delimiter",
                join
            )));
        }
        Ok(Self { delimiters, join })
    }

    /// Delimiter set
    pub fn delimiters(&self) -> &[char] {
        &self.delimiters
    }

    /// Join character
    pub fn join_char(&self) -> char {
        self.join
    }

    /// Parse raw key text
    pub fn parse(&self, raw: &str) -> StorageResult<KeyPath> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(StorageError::malformed_key(raw, "key is empty"));
        }
        let segments: Vec<&str> = trimmed.split(|c| self.delimiters.contains(&c)).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(StorageError::malformed_key(
                raw,
                "empty segment (leading, trailing or repeated delimiter)",
            ));
        }
        KeyPath::from_segments(segments)
    }

    /// Parse a key continued below an already parsed prefix
    pub fn parse_under(&self, prefix: &[String], raw: &str) -> StorageResult<KeyPath> {
        let rest = self.parse(raw)?;
        KeyPath::from_segments(prefix.iter().chain(rest.segments().iter()))
    }

    /// Join segments with the join character
    pub fn join(&self, segments: &[String]) -> String {
        segments.join(&self.join.to_string())
    }
}

/// Parse a key with the default syntax
pub fn parse_key(raw: &str) -> StorageResult<KeyPath> {
    KeyPath::parse(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spellings_agree() {
        let a = parse_key("database.max_retries").unwrap();
        let b = parse_key("database_max_retries").unwrap();
        let c = parse_key("Database.Max.Retries").unwrap();

        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.segments(), &["database", "max", "retries"]);
        assert_eq!(a.canonical(), "database_max_retries");
        assert_eq!(a.dotted(), "database.max.retries");
    }

    #[test]
    fn test_single_segment_is_valid() {
        let key = parse_key("retries").unwrap();
        assert_eq!(key.len(), 1);
        assert_eq!(key.tail().len(), 0);
    }

    #[test]
    fn test_malformed_keys() {
        for raw in ["", "  ", ".a", "a.", "a..b", "a._b", "_"] {
            assert!(
                matches!(parse_key(raw), Err(StorageError::MalformedKey { .. })),
                "expected {:?} to be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_reserved_characters_rejected() {
        for raw in ["a=b", "#x", ";x", "[x", "x]", "a b.c", "a\"b", "a:b"] {
            assert!(
                matches!(parse_key(raw), Err(StorageError::MalformedKey { .. })),
                "expected {:?} to be rejected",
                raw
            );
        }
        assert!(KeyPath::from_segments(["ok", "a=b"]).is_err());
        assert!(parse_key("db-1.max_retries").is_ok());
    }

    #[test]
    fn test_secret_namespace() {
        assert!(parse_key("secret.token").unwrap().is_secret());
        assert!(parse_key("SECRET_token").unwrap().is_secret());
        assert!(!parse_key("secrets.token").unwrap().is_secret());
    }

    #[test]
    fn test_custom_syntax() {
        let syntax = KeySyntax::new(vec!['.'], '.').unwrap();
        let key = syntax.parse("max_retries.count").unwrap();
        assert_eq!(key.segments(), &["max_retries", "count"]);
        assert_eq!(syntax.join(key.segments()), "max_retries.count");

        assert!(KeySyntax::new(vec!['.'], '_').is_err());
        assert!(KeySyntax::new(vec![], '_').is_err());
    }

    #[test]
    fn test_prefix() {
        let a = parse_key("a").unwrap();
        let ab = parse_key("a.b").unwrap();
        assert!(ab.has_prefix(&a));
        assert!(!a.has_prefix(&ab));
        assert!(!a.has_prefix(&a));
    }
}
