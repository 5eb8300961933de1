//! Lightweight consumer handle
//!
//! [`Settings`] reads and writes one provider's values without loading its
//! spec. Values are typed by inference or by an explicit cast.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use sigil_storage::{DevLinks, MergeResolver, ProviderId, ScopeId, ScopeLayout, TypeName};

use crate::backend::{ConfigBackend, ResolverBackend};
use crate::error::ConfigResult;

/// Ad-hoc access to one provider's settings
#[derive(Clone)]
pub struct Settings {
    resolver: Arc<MergeResolver>,
}

impl Settings {
    /// Handle over the environment-derived layout with the standard secret chain
    ///
    /// # Errors
    ///
    /// Fails when `provider` is not a valid provider name or the user
    /// configuration directory cannot be determined.
    pub fn open(provider: &str) -> ConfigResult<Self> {
        let layout = ScopeLayout::from_env()?;
        let links = Arc::new(DevLinks::load(layout.user_root())?);
        let backend = ResolverBackend::new(layout, links);
        Ok(Self::new(backend.resolver(&ProviderId::normalize(provider)?)?))
    }

    pub fn new(resolver: Arc<MergeResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Arc<MergeResolver> {
        &self.resolver
    }

    /// Effective value of `key`, or `default` when no scope holds it
    ///
    /// With `cast`, the raw text is parsed as that type and a mismatch is an
    /// error; otherwise the type is inferred.
    pub fn get(
        &self,
        key: &str,
        default: Option<Value>,
        cast: Option<TypeName>,
    ) -> ConfigResult<Option<Value>> {
        let value = match cast {
            Some(type_name) => self.resolver.get_as(key, type_name)?,
            None => self.resolver.get(key)?,
        };
        Ok(value.or(default))
    }

    /// Store a value in `scope`, or the default write scope
    pub fn set(&self, key: &str, value: &Value, scope: Option<ScopeId>) -> ConfigResult<()> {
        Ok(self.resolver.set_value(key, value, scope)?)
    }

    /// Remove a value from `scope`, or the default write scope
    pub fn remove(&self, key: &str, scope: Option<ScopeId>) -> ConfigResult<()> {
        Ok(self.resolver.remove(key, scope)?)
    }

    /// Raw values per scope
    pub fn layers(&self) -> ConfigResult<BTreeMap<ScopeId, BTreeMap<String, String>>> {
        Ok(self.resolver.scoped_values()?)
    }

    /// Merged non-secret values as environment variables
    pub fn export_env(&self, prefix: &str) -> ConfigResult<BTreeMap<String, String>> {
        Ok(self.resolver.export_env(prefix, false)?)
    }
}
