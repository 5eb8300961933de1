//! Config backend seam
//!
//! The provider manager never touches files directly. It asks a
//! [`ConfigBackend`] for the provider's [`MergeResolver`] and performs every
//! read and write through it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use sigil_secrets::{default_key_store, EncryptedFileProvider, SecretChain};
use sigil_storage::{DevLinks, EnvSource, MergeResolver, ProviderId, ScopeLayout};

use crate::error::ConfigResult;

/// Vault file name under each provider's user directory
pub const VAULT_FILE: &str = "secrets.enc.json";

/// Builds secret chains for providers
pub type SecretsFactory = Arc<dyn Fn(&ProviderId, &ScopeLayout) -> SecretChain + Send + Sync>;

/// Source of per-provider resolvers
pub trait ConfigBackend: Send + Sync {
    /// Resolver bound to `provider`
    fn resolver(&self, provider: &ProviderId) -> ConfigResult<Arc<MergeResolver>>;

    /// Drop any cached resolver so the next call rebuilds it
    fn forget(&self, provider: &ProviderId);

    /// Register read-only package defaults for `provider`
    fn set_defaults_file(&self, provider: &ProviderId, path: PathBuf);
}

/// Keyed store, then a per-provider vault, then `SIGIL_SECRET_*` variables
pub fn standard_secrets() -> SecretsFactory {
    Arc::new(|provider: &ProviderId, layout: &ScopeLayout| {
        let vault = EncryptedFileProvider::builder(
            layout.user_dir(provider).join(VAULT_FILE),
        )
        .key_store(default_key_store())
        .build();
        SecretChain::standard(provider.as_str(), default_key_store(), Some(vault))
    })
}

/// [`ConfigBackend`] building one cached [`MergeResolver`] per provider
pub struct ResolverBackend {
    layout: ScopeLayout,
    links: Arc<DevLinks>,
    secrets: SecretsFactory,
    env: Option<EnvSource>,
    defaults: Mutex<HashMap<ProviderId, PathBuf>>,
    resolvers: Mutex<HashMap<ProviderId, Arc<MergeResolver>>>,
}

impl ResolverBackend {
    pub fn new(layout: ScopeLayout, links: Arc<DevLinks>) -> Self {
        Self {
            layout,
            links,
            secrets: standard_secrets(),
            env: None,
            defaults: Mutex::new(HashMap::new()),
            resolvers: Mutex::new(HashMap::new()),
        }
    }

    /// Use `factory` for every provider's secret chain
    pub fn with_secrets(mut self, factory: SecretsFactory) -> Self {
        self.secrets = factory;
        self
    }

    /// Read environment overrides from `env` instead of the process
    pub fn with_env_source(mut self, env: EnvSource) -> Self {
        self.env = Some(env);
        self
    }

    pub fn layout(&self) -> &ScopeLayout {
        &self.layout
    }

    pub fn links(&self) -> &Arc<DevLinks> {
        &self.links
    }

    fn build(&self, provider: &ProviderId) -> ConfigResult<MergeResolver> {
        let mut builder = MergeResolver::builder(provider.clone(), self.layout.clone())
            .secrets((self.secrets)(provider, &self.layout));
        if let Some(env) = &self.env {
            builder = builder.env_source(env.clone());
        }
        // A development link wins over registered package defaults
        if let Some(linked) = self.links.get(provider) {
            builder = builder.defaults_file(linked, true);
        } else if let Some(path) = self.defaults.lock().get(provider) {
            builder = builder.defaults_file(path.clone(), false);
        }
        Ok(builder.build()?)
    }
}

impl ConfigBackend for ResolverBackend {
    fn resolver(&self, provider: &ProviderId) -> ConfigResult<Arc<MergeResolver>> {
        let mut resolvers = self.resolvers.lock();
        if let Some(resolver) = resolvers.get(provider) {
            return Ok(resolver.clone());
        }
        let resolver = Arc::new(self.build(provider)?);
        debug!(provider = %provider, "Created resolver");
        resolvers.insert(provider.clone(), resolver.clone());
        Ok(resolver)
    }

    fn forget(&self, provider: &ProviderId) {
        self.resolvers.lock().remove(provider);
    }

    fn set_defaults_file(&self, provider: &ProviderId, path: PathBuf) {
        self.defaults.lock().insert(provider.clone(), path);
        self.forget(provider);
    }
}
