//! Secret storage for sigil
//!
//! Keys under the reserved `secret` namespace are never stored in plain
//! settings files. They are served by a [`SecretChain`] of providers:
//!
//! - [`KeyedSecretProvider`]: a service/account credential store
//!   (OS keyring with the `keyring` feature, or [`MemoryKeyStore`])
//! - [`EncryptedFileProvider`]: an Argon2id + AES-256-GCM vault file
//! - [`EnvSecretProvider`]: read-only `SIGIL_SECRET_*` variables

pub mod chain;
pub mod encrypted_file;
pub mod env;
pub mod error;
pub mod provider;
pub mod vault;

pub use chain::SecretChain;
pub use encrypted_file::{EncryptedFileProvider, EncryptedFileProviderBuilder, MASTER_PASSWORD_ENV};
pub use env::{EnvSecretProvider, SECRET_ENV_PREFIX};
pub use error::{SecretsError, SecretsResult};
#[cfg(feature = "keyring")]
pub use provider::KeyringStore;
pub use provider::{
    default_key_store, KeyStore, KeyedSecretProvider, MemoryKeyStore, SecretProvider,
    KEY_STORE_SERVICE,
};
pub use vault::{KdfParams, Vault, VaultFile};
