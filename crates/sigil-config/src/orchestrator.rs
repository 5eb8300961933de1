//! Orchestrator
//!
//! Top-level entry point over every provider: registration, development
//! links, spec export and one [`ProviderManager`] per provider.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use sigil_common::save_json_atomic;
use sigil_storage::{
    DevLinks, IniSpecStore, IoOperation, MergeResolver, ProviderId, ProviderSpec, ScopeId,
    ScopeLayout, SpecDocument, SpecStore, StorageError, TypeRegistry,
};

use crate::backend::{ConfigBackend, ResolverBackend};
use crate::error::{ConfigError, ConfigResult};
use crate::manager::ProviderManager;
use crate::types::PERSISTENT_SCOPES;

/// Registry of providers and their managers
pub struct Orchestrator {
    store: Arc<dyn SpecStore>,
    backend: Arc<dyn ConfigBackend>,
    links: Arc<DevLinks>,
    types: TypeRegistry,
    managers: Mutex<HashMap<ProviderId, Arc<ProviderManager>>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SpecStore>,
        backend: Arc<dyn ConfigBackend>,
        links: Arc<DevLinks>,
    ) -> Self {
        Self {
            store,
            backend,
            links,
            types: TypeRegistry::builtin(),
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// Orchestrator over the INI spec store and resolver backend for `layout`
    ///
    /// Specs live beside each provider's user settings; development links are
    /// read from the user root.
    pub fn open(layout: ScopeLayout) -> ConfigResult<Self> {
        let links = Arc::new(DevLinks::load(layout.user_root())?);
        let store = Arc::new(IniSpecStore::new(layout.user_root(), links.clone()));
        let backend = Arc::new(ResolverBackend::new(layout, links.clone()));
        Ok(Self::new(store, backend, links))
    }

    /// Like [`Orchestrator::open`] with a caller-configured backend
    pub fn with_backend(layout: &ScopeLayout, backend: ResolverBackend) -> Self {
        let links = backend.links().clone();
        let store = Arc::new(IniSpecStore::new(layout.user_root(), links.clone()));
        Self::new(store, Arc::new(backend), links)
    }

    pub fn store(&self) -> &Arc<dyn SpecStore> {
        &self.store
    }

    pub fn links(&self) -> &Arc<DevLinks> {
        &self.links
    }

    fn id(name: &str) -> ConfigResult<ProviderId> {
        Ok(ProviderId::normalize(name)?)
    }

    /// Every provider with a spec or a development link
    pub fn list_providers(&self) -> ConfigResult<Vec<ProviderId>> {
        Ok(self.store.provider_ids()?)
    }

    /// Create an empty spec for a new provider
    ///
    /// # Errors
    ///
    /// Fails with a duplicate provider error when a spec already exists.
    pub fn register_provider(
        &self,
        name: &str,
        title: Option<String>,
        description: Option<String>,
    ) -> ConfigResult<ProviderSpec> {
        let provider = Self::id(name)?;
        let mut spec = ProviderSpec::new(provider.clone());
        spec.title = title;
        spec.description = description;
        self.store.create_spec(&spec)?;
        self.managers.lock().remove(&provider);
        info!(provider = %provider, "Provider registered");
        Ok(spec)
    }

    /// Manager for a registered provider
    pub fn provider(&self, name: &str) -> ConfigResult<Arc<ProviderManager>> {
        let provider = Self::id(name)?;
        let mut managers = self.managers.lock();
        if let Some(manager) = managers.get(&provider) {
            return Ok(manager.clone());
        }

        let manager = Arc::new(ProviderManager::new(
            provider.clone(),
            self.store.clone(),
            self.backend.resolver(&provider)?,
            self.types,
        ));
        // Surface unknown providers here rather than on first use
        manager.spec()?;
        debug!(provider = %provider, "Created provider manager");
        managers.insert(provider, manager.clone());
        Ok(manager)
    }

    /// Resolver for ad-hoc reads and writes; the provider need not have a spec
    pub fn resolver(&self, name: &str) -> ConfigResult<Arc<MergeResolver>> {
        self.backend.resolver(&Self::id(name)?)
    }

    /// Remove a provider's spec; with `remove_settings` its user and project
    /// settings files are deleted too
    pub fn delete_provider(&self, name: &str, remove_settings: bool) -> ConfigResult<()> {
        let provider = Self::id(name)?;
        let resolver = self.backend.resolver(&provider)?;
        self.store.delete_spec(&provider)?;

        if remove_settings {
            // Package defaults belong to the package, not to its settings
            for scope in PERSISTENT_SCOPES {
                if scope == ScopeId::Default || !resolver.policy().allows(scope) {
                    continue;
                }
                let path = match resolver.target_path(scope) {
                    Ok(path) => path,
                    Err(StorageError::ProjectRootNotFound { .. }) => continue,
                    Err(e) => return Err(e.into()),
                };
                remove_file(&path)?;
            }
        }

        if self.links.unlink(&provider)? {
            debug!(provider = %provider, "Removed development link");
        }
        self.forget(&provider);
        info!(provider = %provider, "Provider deleted");
        Ok(())
    }

    fn forget(&self, provider: &ProviderId) {
        self.managers.lock().remove(provider);
        self.backend.forget(provider);
    }

    /// Register read-only package defaults for a provider
    pub fn set_defaults_file(&self, name: &str, path: impl Into<PathBuf>) -> ConfigResult<()> {
        let provider = Self::id(name)?;
        self.backend.set_defaults_file(&provider, path.into());
        self.managers.lock().remove(&provider);
        Ok(())
    }

    /// Link a provider to a writable package-defaults file
    ///
    /// The provider's spec is copied next to the linked file unless the
    /// package already ships one there, in which case the package's spec is
    /// used as is.
    ///
    /// # Errors
    ///
    /// Fails when `defaults_file` is not an existing file.
    pub fn link_provider(&self, name: &str, defaults_file: impl Into<PathBuf>) -> ConfigResult<()> {
        let provider = Self::id(name)?;
        let defaults_file = defaults_file.into();
        if !defaults_file.is_file() {
            return Err(StorageError::io_error(
                &defaults_file,
                IoOperation::Read,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "linked defaults file does not exist",
                ),
            )
            .into());
        }
        self.relocate(&provider, |links| links.link(&provider, defaults_file))?;
        info!(provider = %provider, "Provider linked");
        Ok(())
    }

    /// Remove a development link; returns whether one existed
    pub fn unlink_provider(&self, name: &str) -> ConfigResult<bool> {
        let provider = Self::id(name)?;
        let mut removed = false;
        self.relocate(&provider, |links| {
            removed = links.unlink(&provider)?;
            Ok(())
        })?;
        if removed {
            info!(provider = %provider, "Provider unlinked");
        }
        Ok(removed)
    }

    /// Apply a link change, copying the current spec to its new location
    ///
    /// A spec already present at the new location is never replaced, and the
    /// old copy stays where it was.
    fn relocate<F>(&self, provider: &ProviderId, change: F) -> ConfigResult<()>
    where
        F: FnOnce(&DevLinks) -> Result<(), StorageError>,
    {
        let before = self.store.spec_path(provider);
        let existing = match self.store.get_spec(provider) {
            Ok(spec) => Some(spec),
            Err(StorageError::UnknownProvider { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        change(&self.links)?;

        let after = self.store.spec_path(provider);
        if let (Some(spec), true) = (existing, after != before) {
            if after.exists() {
                debug!(provider = %provider, path = %after.display(), "Keeping spec found at link target");
            } else {
                self.store.create_spec(&spec)?;
                debug!(provider = %provider, path = %after.display(), "Copied provider spec");
            }
        }
        self.forget(provider);
        Ok(())
    }

    /// Write a provider's spec as JSON
    pub fn export_spec(&self, name: &str, path: &Path) -> ConfigResult<()> {
        let spec = self.provider(name)?.spec()?;
        save_json_atomic(path, &SpecDocument::from(&spec))?;
        debug!(provider = %spec.provider_id, path = %path.display(), "Spec exported");
        Ok(())
    }

    /// Re-read a provider's spec from disk
    pub fn reload_spec(&self, name: &str) -> ConfigResult<ProviderSpec> {
        self.provider(name)?.reload_spec()
    }

    /// Environment variables for every provider
    ///
    /// Providers without a spec export their merged values only.
    pub fn export_env(
        &self,
        prefix: &str,
        include_secrets: bool,
    ) -> ConfigResult<BTreeMap<String, String>> {
        let mut vars = BTreeMap::new();
        for provider in self.list_providers()? {
            let exported = match self.provider(provider.as_str()) {
                Ok(manager) => manager.export_env(prefix, include_secrets)?,
                Err(ConfigError::Storage(StorageError::UnknownProvider { .. })) => {
                    self.backend
                        .resolver(&provider)?
                        .export_env(prefix, include_secrets)?
                }
                Err(e) => return Err(e),
            };
            vars.extend(exported);
        }
        Ok(vars)
    }
}

fn remove_file(path: &Path) -> ConfigResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed settings file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!(path = %path.display(), "Could not remove settings file: {}", e);
            Err(StorageError::io_error(path, IoOperation::Delete, e).into())
        }
    }
}
