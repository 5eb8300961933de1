//! Provider name normalization

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Normalized provider identifier
///
/// Lowercase, with runs of `.`, `_` and `-` collapsed to a single `-`. Two
/// names refer to the same provider iff their identifiers are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId(String);

impl ProviderId {
    /// Normalize a provider name
    pub fn normalize(name: &str) -> StorageResult<Self> {
        let trimmed = name.trim();
        if trimmed.contains('/') || trimmed.contains('\\') {
            return Err(StorageError::invalid_name(name, "contains a path separator"));
        }
        if trimmed.contains("..") {
            return Err(StorageError::invalid_name(name, "contains '..'"));
        }

        let mut out = String::with_capacity(trimmed.len());
        let mut in_run = false;
        for c in trimmed.chars() {
            if matches!(c, '.' | '_' | '-') {
                if !in_run {
                    out.push('-');
                }
                in_run = true;
            } else if c.is_ascii_alphanumeric() {
                out.push(c.to_ascii_lowercase());
                in_run = false;
            } else {
                return Err(StorageError::invalid_name(
                    name,
                    format!("unsupported character {:?}", c),
                ));
            }
        }

        if out.is_empty() {
            return Err(StorageError::invalid_name(name, "normalizes to an empty name"));
        }
        if out.starts_with('-') || out.ends_with('-') {
            return Err(StorageError::invalid_name(
                name,
                "must start and end with a letter or digit",
            ));
        }
        Ok(Self(out))
    }

    /// The normalized identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix of this provider's environment variables, e.g. `SIGIL_MY_APP_`
    ///
    /// Prefixes are not unique across providers: `SIGIL_DEMO_` is also the
    /// start of every `SIGIL_DEMO_X_` variable, so provider `demo` reads
    /// `SIGIL_DEMO_X_RETRIES` (meant for `demo-x`) as its key `x.retries`.
    pub fn env_prefix(&self) -> String {
        format!("SIGIL_{}_", self.env_token())
    }

    /// Upper-case form with hyphens folded to underscores
    pub fn env_token(&self) -> String {
        self.0.to_uppercase().replace('-', "_")
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProviderId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderId::normalize(s)
    }
}

impl TryFrom<String> for ProviderId {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ProviderId::normalize(&value)
    }
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> Self {
        id.0
    }
}

impl AsRef<str> for ProviderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize a provider name
pub fn normalize_provider_id(name: &str) -> StorageResult<ProviderId> {
    ProviderId::normalize(name)
}
