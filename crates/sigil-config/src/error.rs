//! Configuration error types

use thiserror::Error;

use sigil_common::JsonStoreError;
use sigil_secrets::SecretsError;
use sigil_storage::StorageError;

/// Configuration result type
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Unknown field '{key}' in provider '{provider}'")]
    UnknownField { provider: String, key: String },

    #[error("Field '{key}' already exists in provider '{provider}'")]
    DuplicateField { provider: String, key: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Policy error: {0}")]
    Policy(String),

    #[error("{} of {} writes failed: {}", failed.len(), attempted, message)]
    PartialWrite {
        attempted: usize,
        failed: Vec<String>,
        message: String,
    },

    #[error("Export error: {0}")]
    Export(#[from] JsonStoreError),
}

impl ConfigError {
    pub fn unknown_field(provider: impl std::fmt::Display, key: impl std::fmt::Display) -> Self {
        ConfigError::UnknownField {
            provider: provider.to_string(),
            key: key.to_string(),
        }
    }

    pub fn duplicate_field(provider: impl std::fmt::Display, key: impl std::fmt::Display) -> Self {
        ConfigError::DuplicateField {
            provider: provider.to_string(),
            key: key.to_string(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the caller should re-read the specification and retry
    pub fn is_conflict(&self) -> bool {
        matches!(self, ConfigError::Storage(StorageError::Conflict { .. }))
    }
}

impl From<SecretsError> for ConfigError {
    fn from(error: SecretsError) -> Self {
        ConfigError::Storage(StorageError::Secrets(error))
    }
}
