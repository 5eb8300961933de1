//! Ordered fallback over several secret providers

use std::sync::Arc;

use sigil_common::format_error;
use tracing::{debug, warn};

use crate::{
    EncryptedFileProvider, EnvSecretProvider, KeyStore, KeyedSecretProvider, SecretProvider,
    SecretsError, SecretsResult,
};

/// An ordered list of secret providers
///
/// Reads return the first available provider's value; writes go to the first
/// provider that is both available and writable.
#[derive(Clone, Default)]
pub struct SecretChain {
    providers: Vec<Arc<dyn SecretProvider>>,
}

impl SecretChain {
    /// Create a chain from providers in precedence order
    pub fn new(providers: Vec<Arc<dyn SecretProvider>>) -> Self {
        Self { providers }
    }

    /// Keyed store, then encrypted file (when configured), then environment
    pub fn standard(
        provider: &str,
        key_store: Arc<dyn KeyStore>,
        vault: Option<EncryptedFileProvider>,
    ) -> Self {
        let mut providers: Vec<Arc<dyn SecretProvider>> =
            vec![Arc::new(KeyedSecretProvider::new(key_store, provider))];
        if let Some(vault) = vault {
            providers.push(Arc::new(vault));
        }
        providers.push(Arc::new(EnvSecretProvider::new(provider)));
        Self { providers }
    }

    /// A read-only chain backed by environment variables alone
    pub fn environment(provider: &str) -> Self {
        Self {
            providers: vec![Arc::new(EnvSecretProvider::new(provider))],
        }
    }

    /// Append a provider with the lowest precedence
    pub fn push(&mut self, provider: Arc<dyn SecretProvider>) {
        self.providers.push(provider);
    }

    /// Providers in precedence order
    pub fn providers(&self) -> &[Arc<dyn SecretProvider>] {
        &self.providers
    }

    /// Whether any provider is usable
    pub fn available(&self) -> bool {
        self.providers.iter().any(|p| p.available())
    }

    /// Whether any usable provider accepts writes
    pub fn can_write(&self) -> bool {
        self.providers.iter().any(|p| p.available() && p.can_write())
    }

    /// Look up a secret
    pub fn get(&self, key: &str) -> SecretsResult<Option<String>> {
        for provider in &self.providers {
            if !provider.available() {
                debug!("Secret provider {} unavailable", provider.name());
                continue;
            }
            if let Some(value) = provider.get(key)? {
                debug!(key = %key, provider = provider.name(), "Secret resolved");
                return Ok(Some(value));
            }
        }
        debug!("Secret {} not found", key);
        Ok(None)
    }

    /// Look up a secret among the providers that accept writes
    ///
    /// Values supplied only by read-only providers such as the environment
    /// are not returned.
    pub fn get_stored(&self, key: &str) -> SecretsResult<Option<String>> {
        for provider in &self.providers {
            if !provider.available() || !provider.can_write() {
                continue;
            }
            if let Some(value) = provider.get(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Store a secret in the first writable provider
    pub fn set(&self, key: &str, value: &str) -> SecretsResult<()> {
        let provider = self.writer()?;
        provider.set(key, value)
    }

    /// Remove a secret from the first writable provider
    pub fn remove(&self, key: &str) -> SecretsResult<()> {
        let provider = self.writer()?;
        provider.remove(key)
    }

    /// Ask every provider to retry credential discovery
    ///
    /// Failures are logged and otherwise ignored.
    pub fn unlock(&self) {
        for provider in &self.providers {
            if let Err(e) = provider.unlock() {
                warn!("Unlock failed for {}: {}", provider.name(), format_error(&e));
            }
        }
    }

    fn writer(&self) -> SecretsResult<&Arc<dyn SecretProvider>> {
        self.providers
            .iter()
            .find(|p| p.available() && p.can_write())
            .ok_or(SecretsError::NoWritableProvider)
    }
}

impl std::fmt::Debug for SecretChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.name()))
            .finish()
    }
}
