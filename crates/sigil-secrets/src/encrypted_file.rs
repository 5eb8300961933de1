//! Secrets in a passphrase-encrypted file
//!
//! The provider is locked until a passphrase is found. Discovery tries, in
//! order: an explicit passphrase, `SIGIL_MASTER_PWD`, the key store entry
//! `master::<vault path>`, and finally an interactive prompt when enabled and
//! stdin is a terminal. A locked provider answers reads with `None` and
//! refuses writes.

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::provider::KEY_STORE_SERVICE;
use crate::vault::{KdfParams, Vault, VaultFile};
use crate::{KeyStore, SecretProvider, SecretsError, SecretsResult};

/// Environment variable holding the vault passphrase
pub const MASTER_PASSWORD_ENV: &str = "SIGIL_MASTER_PWD";

/// AES-GCM encrypted vault provider
pub struct EncryptedFileProvider {
    path: PathBuf,
    explicit: Option<String>,
    passphrase: RwLock<Option<String>>,
    key_store: Option<Arc<dyn KeyStore>>,
    prompt: bool,
    params: KdfParams,
}

impl EncryptedFileProvider {
    /// Create a provider for the vault at `path` and run passphrase discovery
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::builder(path).build()
    }

    /// Start configuring a provider
    pub fn builder(path: impl Into<PathBuf>) -> EncryptedFileProviderBuilder {
        EncryptedFileProviderBuilder {
            path: path.into(),
            passphrase: None,
            key_store: None,
            prompt: true,
            params: KdfParams::default(),
        }
    }

    /// Path of the vault file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether no passphrase is known
    pub fn is_locked(&self) -> bool {
        self.passphrase.read().is_none()
    }

    /// Key store account holding the master passphrase for this vault
    pub fn master_account(&self) -> String {
        format!("master::{}", self.path.display())
    }

    fn discover(&self) -> Option<String> {
        if let Some(explicit) = &self.explicit {
            return Some(explicit.clone());
        }

        if let Ok(value) = std::env::var(MASTER_PASSWORD_ENV) {
            if !value.is_empty() {
                debug!("Vault passphrase taken from {}", MASTER_PASSWORD_ENV);
                return Some(value);
            }
        }

        if let Some(store) = &self.key_store {
            if store.available() {
                match store.get(KEY_STORE_SERVICE, &self.master_account()) {
                    Ok(Some(value)) => {
                        debug!("Vault passphrase taken from key store");
                        return Some(value);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Key store lookup for vault passphrase failed: {}", e),
                }
            }
        }

        if self.prompt && std::io::stdin().is_terminal() {
            match rpassword::prompt_password("Master password: ") {
                Ok(value) if !value.is_empty() => return Some(value),
                Ok(_) => {}
                Err(e) => warn!("Passphrase prompt failed: {}", e),
            }
        }

        None
    }

    fn vault(&self) -> SecretsResult<Vault> {
        match self.passphrase.read().as_ref() {
            Some(passphrase) => Ok(Vault::new(passphrase.clone(), self.params)),
            None => Err(SecretsError::Locked {
                path: self.path.clone(),
            }),
        }
    }

    fn read_entries(&self, vault: &Vault) -> SecretsResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let file = VaultFile::load(&self.path)?;
        vault.open(&file, &self.path)
    }

    fn write_entries(&self, vault: &Vault, entries: &BTreeMap<String, String>) -> SecretsResult<()> {
        vault.seal(entries)?.save(&self.path)?;
        info!(path = %self.path.display(), entries = entries.len(), "Vault written");
        Ok(())
    }
}

impl SecretProvider for EncryptedFileProvider {
    fn name(&self) -> &str {
        "encrypted-file"
    }

    fn available(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        !self.is_locked()
    }

    fn get(&self, key: &str) -> SecretsResult<Option<String>> {
        let vault = match self.vault() {
            Ok(vault) => vault,
            Err(_) => {
                debug!("Vault locked; cannot read {}", key);
                return Ok(None);
            }
        };
        Ok(self.read_entries(&vault)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> SecretsResult<()> {
        let vault = self.vault().map_err(|e| {
            warn!("Vault locked when attempting write");
            e
        })?;
        let mut entries = self.read_entries(&vault)?;
        entries.insert(key.to_string(), value.to_string());
        self.write_entries(&vault, &entries)
    }

    fn remove(&self, key: &str) -> SecretsResult<()> {
        let vault = self.vault()?;
        let mut entries = self.read_entries(&vault)?;
        if entries.remove(key).is_some() {
            self.write_entries(&vault, &entries)?;
        }
        Ok(())
    }

    fn unlock(&self) -> SecretsResult<()> {
        if !self.is_locked() {
            return Ok(());
        }
        match self.discover() {
            Some(passphrase) => {
                *self.passphrase.write() = Some(passphrase);
                debug!(path = %self.path.display(), "Vault unlocked");
            }
            None => debug!(path = %self.path.display(), "Vault remains locked"),
        }
        Ok(())
    }
}

/// Builder for [`EncryptedFileProvider`]
pub struct EncryptedFileProviderBuilder {
    path: PathBuf,
    passphrase: Option<String>,
    key_store: Option<Arc<dyn KeyStore>>,
    prompt: bool,
    params: KdfParams,
}

impl EncryptedFileProviderBuilder {
    /// Use an explicit passphrase
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Consult a key store for the master passphrase
    pub fn key_store(mut self, store: Arc<dyn KeyStore>) -> Self {
        self.key_store = Some(store);
        self
    }

    /// Enable or disable the interactive prompt
    pub fn prompt(mut self, prompt: bool) -> Self {
        self.prompt = prompt;
        self
    }

    /// Key derivation cost for newly written files
    pub fn kdf_params(mut self, params: KdfParams) -> Self {
        self.params = params;
        self
    }

    /// Build the provider, attempting passphrase discovery once
    pub fn build(self) -> EncryptedFileProvider {
        let provider = EncryptedFileProvider {
            path: self.path,
            explicit: self.passphrase,
            passphrase: RwLock::new(None),
            key_store: self.key_store,
            prompt: self.prompt,
            params: self.params,
        };
        *provider.passphrase.write() = provider.discover();
        provider
    }
}
