//! Scope identifiers and file formats

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// One layer of configuration precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScopeId {
    /// Engine-internal defaults, always read-only
    Core,
    /// Package-declared defaults
    Default,
    /// Shared per-project settings
    Project,
    /// Per-project settings for this machine
    ProjectLocal,
    /// Per-user settings
    User,
    /// Per-user settings for this machine
    UserLocal,
    /// Synthesized from process environment variables
    Environment,
    /// Served by the secret chain
    Secret,
}

impl ScopeId {
    /// Every scope
    pub const ALL: [ScopeId; 8] = [
        ScopeId::Core,
        ScopeId::Default,
        ScopeId::Project,
        ScopeId::ProjectLocal,
        ScopeId::User,
        ScopeId::UserLocal,
        ScopeId::Environment,
        ScopeId::Secret,
    ];

    /// Scope name
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeId::Core => "core",
            ScopeId::Default => "default",
            ScopeId::Project => "project",
            ScopeId::ProjectLocal => "project-local",
            ScopeId::User => "user",
            ScopeId::UserLocal => "user-local",
            ScopeId::Environment => "environment",
            ScopeId::Secret => "secret",
        }
    }

    /// Whether the scope is bound to a single machine
    pub fn is_machine_local(&self) -> bool {
        matches!(self, ScopeId::ProjectLocal | ScopeId::UserLocal)
    }

    /// Whether the scope lives under the project root
    pub fn is_project(&self) -> bool {
        matches!(self, ScopeId::Project | ScopeId::ProjectLocal)
    }

    /// Whether the scope is backed by a settings file
    pub fn is_file_backed(&self) -> bool {
        matches!(
            self,
            ScopeId::Default
                | ScopeId::Project
                | ScopeId::ProjectLocal
                | ScopeId::User
                | ScopeId::UserLocal
        )
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "core" => Ok(ScopeId::Core),
            "default" => Ok(ScopeId::Default),
            "project" => Ok(ScopeId::Project),
            "project-local" => Ok(ScopeId::ProjectLocal),
            "user" => Ok(ScopeId::User),
            "user-local" => Ok(ScopeId::UserLocal),
            "environment" | "env" => Ok(ScopeId::Environment),
            "secret" => Ok(ScopeId::Secret),
            _ => Err(StorageError::UnknownScope {
                scope: s.to_string(),
            }),
        }
    }
}

/// Settings file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigFormat {
    Ini,
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "ini" | "cfg" => Some(ConfigFormat::Ini),
            "json" => Some(ConfigFormat::Json),
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            _ => None,
        }
    }

    /// Format name used in error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigFormat::Ini => "INI",
            ConfigFormat::Json => "JSON",
            ConfigFormat::Yaml => "YAML",
        }
    }

    /// Preferred file extension
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Ini => "ini",
            ConfigFormat::Json => "json",
            ConfigFormat::Yaml => "yaml",
        }
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
