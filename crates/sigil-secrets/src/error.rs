//! Secret-related error types

use std::path::PathBuf;
use thiserror::Error;

/// Secret provider errors
#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("No write-capable secret provider")]
    NoWritableProvider,

    #[error("Secret provider '{provider}' is read-only")]
    ReadOnly { provider: String },

    #[error("Secret provider '{provider}' is unavailable")]
    Unavailable { provider: String },

    #[error("Vault locked: {}", path.display())]
    Locked { path: PathBuf },

    #[error("Encryption error: {message}")]
    Encryption { message: String },

    #[error("Decryption error: {message}")]
    Decryption { message: String },

    #[error("Key derivation error: {message}")]
    KeyDerivation { message: String },

    #[error("Malformed vault file {}: {message}", path.display())]
    MalformedVault { path: PathBuf, message: String },

    #[error("Key store error: {message}")]
    KeyStore { message: String },

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl SecretsError {
    /// Create a read-only error for the named provider
    pub fn read_only(provider: impl Into<String>) -> Self {
        SecretsError::ReadOnly {
            provider: provider.into(),
        }
    }

    /// Create an unavailable error for the named provider
    pub fn unavailable(provider: impl Into<String>) -> Self {
        SecretsError::Unavailable {
            provider: provider.into(),
        }
    }

    /// Create a malformed vault error
    pub fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        SecretsError::MalformedVault {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a key store error
    pub fn key_store(message: impl Into<String>) -> Self {
        SecretsError::KeyStore {
            message: message.into(),
        }
    }

    /// Wrap an IO error with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SecretsError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for secret operations
pub type SecretsResult<T> = Result<T, SecretsError>;
