//! Secret provider contract and the keyed-store provider

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{SecretsError, SecretsResult};

/// Service name used for every keyed-store entry
pub const KEY_STORE_SERVICE: &str = "sigil";

/// A source of secret values
///
/// Keys are dotted secret names such as `secret.api.token`.
pub trait SecretProvider: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    /// Whether the provider can be used at all right now
    fn available(&self) -> bool;

    /// Whether the provider currently accepts writes
    fn can_write(&self) -> bool;

    /// Look up a secret
    fn get(&self, key: &str) -> SecretsResult<Option<String>>;

    /// Store a secret
    fn set(&self, key: &str, value: &str) -> SecretsResult<()>;

    /// Remove a secret; providers without write support refuse
    fn remove(&self, _key: &str) -> SecretsResult<()> {
        Err(SecretsError::read_only(self.name()))
    }

    /// Retry acquiring whatever credential the provider needs
    fn unlock(&self) -> SecretsResult<()> {
        Ok(())
    }
}

/// A service/account keyed credential store
pub trait KeyStore: Send + Sync {
    /// Whether the backing store is usable
    fn available(&self) -> bool;

    /// Read an entry, `None` when absent
    fn get(&self, service: &str, account: &str) -> SecretsResult<Option<String>>;

    /// Create or replace an entry
    fn set(&self, service: &str, account: &str, value: &str) -> SecretsResult<()>;

    /// Delete an entry; deleting a missing entry is not an error
    fn delete(&self, service: &str, account: &str) -> SecretsResult<()>;
}

/// Process-local key store
///
/// Used for embedding and tests; can be constructed in an unavailable state
/// to model a machine without a credential manager.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: RwLock<HashMap<(String, String), String>>,
    disabled: bool,
}

impl MemoryKeyStore {
    /// Create an empty, available store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that reports itself unavailable
    pub fn unavailable() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            disabled: true,
        }
    }
}

impl KeyStore for MemoryKeyStore {
    fn available(&self) -> bool {
        !self.disabled
    }

    fn get(&self, service: &str, account: &str) -> SecretsResult<Option<String>> {
        if self.disabled {
            return Ok(None);
        }
        Ok(self
            .entries
            .read()
            .get(&(service.to_string(), account.to_string()))
            .cloned())
    }

    fn set(&self, service: &str, account: &str, value: &str) -> SecretsResult<()> {
        if self.disabled {
            return Err(SecretsError::key_store("memory key store is disabled"));
        }
        self.entries.write().insert(
            (service.to_string(), account.to_string()),
            value.to_string(),
        );
        Ok(())
    }

    fn delete(&self, service: &str, account: &str) -> SecretsResult<()> {
        if self.disabled {
            return Err(SecretsError::key_store("memory key store is disabled"));
        }
        self.entries
            .write()
            .remove(&(service.to_string(), account.to_string()));
        Ok(())
    }
}

/// Operating-system credential manager
#[cfg(feature = "keyring")]
pub struct KeyringStore;

#[cfg(feature = "keyring")]
impl KeyringStore {
    fn entry(service: &str, account: &str) -> SecretsResult<keyring::Entry> {
        keyring::Entry::new(service, account).map_err(|e| SecretsError::key_store(e.to_string()))
    }
}

#[cfg(feature = "keyring")]
impl KeyStore for KeyringStore {
    fn available(&self) -> bool {
        match Self::entry(KEY_STORE_SERVICE, "__probe__") {
            Ok(entry) => matches!(
                entry.get_password(),
                Ok(_) | Err(keyring::Error::NoEntry)
            ),
            Err(_) => false,
        }
    }

    fn get(&self, service: &str, account: &str) -> SecretsResult<Option<String>> {
        match Self::entry(service, account)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SecretsError::key_store(e.to_string())),
        }
    }

    fn set(&self, service: &str, account: &str, value: &str) -> SecretsResult<()> {
        Self::entry(service, account)?
            .set_password(value)
            .map_err(|e| SecretsError::key_store(e.to_string()))
    }

    fn delete(&self, service: &str, account: &str) -> SecretsResult<()> {
        match Self::entry(service, account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SecretsError::key_store(e.to_string())),
        }
    }
}

/// The platform's preferred key store
///
/// The OS credential manager when built with the `keyring` feature,
/// otherwise an unavailable placeholder.
pub fn default_key_store() -> Arc<dyn KeyStore> {
    #[cfg(feature = "keyring")]
    {
        Arc::new(KeyringStore)
    }
    #[cfg(not(feature = "keyring"))]
    {
        Arc::new(MemoryKeyStore::unavailable())
    }
}

/// Secrets held in a [`KeyStore`], one entry per provider and key
pub struct KeyedSecretProvider {
    store: Arc<dyn KeyStore>,
    provider: String,
}

impl KeyedSecretProvider {
    /// Create a provider storing secrets for `provider` in `store`
    pub fn new(store: Arc<dyn KeyStore>, provider: impl Into<String>) -> Self {
        Self {
            store,
            provider: provider.into(),
        }
    }

    fn account(&self, key: &str) -> String {
        format!("{}:{}", self.provider, key)
    }
}

impl SecretProvider for KeyedSecretProvider {
    fn name(&self) -> &str {
        "keyed-store"
    }

    fn available(&self) -> bool {
        self.store.available()
    }

    fn can_write(&self) -> bool {
        self.store.available()
    }

    fn get(&self, key: &str) -> SecretsResult<Option<String>> {
        if !self.available() {
            return Ok(None);
        }
        self.store.get(KEY_STORE_SERVICE, &self.account(key))
    }

    fn set(&self, key: &str, value: &str) -> SecretsResult<()> {
        if !self.available() {
            return Err(SecretsError::unavailable(self.name()));
        }
        self.store.set(KEY_STORE_SERVICE, &self.account(key), value)
    }

    fn remove(&self, key: &str) -> SecretsResult<()> {
        if !self.available() {
            return Err(SecretsError::unavailable(self.name()));
        }
        self.store.delete(KEY_STORE_SERVICE, &self.account(key))
    }
}
