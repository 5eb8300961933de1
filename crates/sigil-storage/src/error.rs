//! Storage error types for sigil

use std::path::PathBuf;
use thiserror::Error;

use sigil_secrets::SecretsError;

use crate::types::ScopeId;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// Key text could not be split into segments
    #[error("Malformed key '{key}': {message}")]
    MalformedKey { key: String, message: String },

    /// Provider name cannot be normalized
    #[error("Invalid provider name '{name}': {message}")]
    InvalidName { name: String, message: String },

    /// Settings or specification file content is malformed
    #[error("Failed to parse {} as {format}: {message}", path.display())]
    ParseError {
        path: PathBuf,
        format: String,
        message: String,
    },

    /// No backend registered for the file extension
    #[error("Unsupported settings format for {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    /// Scope name is not one of the known scopes
    #[error("Unknown scope '{scope}'")]
    UnknownScope { scope: String },

    /// Scope cannot be written
    #[error("Scope '{scope}' is read-only: {message}")]
    ReadOnlyScope { scope: ScopeId, message: String },

    /// Project scope used without a project root
    #[error("No project root found for scope '{scope}'")]
    ProjectRootNotFound { scope: ScopeId },

    /// Configuration root could not be determined
    #[error("Path resolution failed: {message}")]
    PathResolutionError { message: String },

    /// Provider has no specification
    #[error("Unknown provider '{provider}'")]
    UnknownProvider { provider: String },

    /// Provider already has a specification
    #[error("Provider '{provider}' already exists")]
    DuplicateProvider { provider: String },

    /// Specification changed since the caller last read it
    #[error("Conflicting update for provider '{provider}': {message}")]
    Conflict { provider: String, message: String },

    /// Value fails its type or bounds check
    #[error("Invalid value for {field}: {message}")]
    ValidationError { field: String, message: String },

    /// Stored value cannot be read as the requested type
    #[error("Value for {key} is not {expected}: {value}")]
    TypeError {
        key: String,
        expected: String,
        value: String,
    },

    /// Type name not present in the type registry
    #[error("Unknown type '{name}'")]
    UnknownType { name: String },

    /// Flat keys cannot be arranged into a nested document
    #[error("Structure error: {message}")]
    Structure { message: String },

    /// Secret chain failure
    #[error("Secrets error: {0}")]
    Secrets(#[from] SecretsError),

    /// File read/write failed
    #[error("IO error on {} ({operation}): {source}", path.display())]
    IoError {
        path: PathBuf,
        operation: IoOperation,
        source: std::io::Error,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// IO operation type for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOperation {
    Read,
    Write,
    Delete,
    Move,
}

impl std::fmt::Display for IoOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoOperation::Read => write!(f, "read"),
            IoOperation::Write => write!(f, "write"),
            IoOperation::Delete => write!(f, "delete"),
            IoOperation::Move => write!(f, "move"),
        }
    }
}

impl StorageError {
    /// Create a malformed key error
    pub fn malformed_key(key: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::MalformedKey {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create an invalid name error
    pub fn invalid_name(name: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::InvalidName {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse_error(
        path: impl Into<PathBuf>,
        format: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        StorageError::ParseError {
            path: path.into(),
            format: format.into(),
            message: message.into(),
        }
    }

    /// Create a read-only scope error
    pub fn read_only(scope: ScopeId, message: impl Into<String>) -> Self {
        StorageError::ReadOnlyScope {
            scope,
            message: message.into(),
        }
    }

    /// Create a path resolution error
    pub fn path_resolution_error(message: impl Into<String>) -> Self {
        StorageError::PathResolutionError {
            message: message.into(),
        }
    }

    /// Create an unknown provider error
    pub fn unknown_provider(provider: impl std::fmt::Display) -> Self {
        StorageError::UnknownProvider {
            provider: provider.to_string(),
        }
    }

    /// Create a conflict error
    pub fn conflict(provider: impl std::fmt::Display, message: impl Into<String>) -> Self {
        StorageError::Conflict {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a structure error
    pub fn structure(message: impl Into<String>) -> Self {
        StorageError::Structure {
            message: message.into(),
        }
    }

    /// Create an IO error
    pub fn io_error(path: impl Into<PathBuf>, operation: IoOperation, source: std::io::Error) -> Self {
        StorageError::IoError {
            path: path.into(),
            operation,
            source,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        StorageError::Internal(message.into())
    }
}
