//! Merge resolver
//!
//! Answers "what is the effective value of this key" for one provider by
//! walking the scope precedence order, and writes values back into a chosen
//! scope. Loaded scopes and the merged view are cached until the next write
//! or an explicit [`MergeResolver::invalidate`].
//!
//! Precedence, highest first, with the default `project_over_user` order:
//! secret > environment > project-local > project > user-local > user > default > core

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use serde_json::Value;
use tracing::{debug, warn};

use sigil_secrets::SecretChain;

use crate::adapters::{FieldOptions, TypeName, TypeRegistry};
use crate::backends::{BackendRegistry, RawMap};
use crate::env::{env_var_name, process_env, read_env, EnvSource};
use crate::error::{StorageError, StorageResult};
use crate::keys::{KeyPath, KeySyntax};
use crate::policy::{PrecedenceOrder, ScopeLayout, ScopePolicy, POLICY_ORDER_KEY};
use crate::provider_id::ProviderId;
use crate::types::ScopeId;

/// Scopes a resolver may use when `set` is called without a scope
pub const DEFAULT_SCOPE_CHOICES: [ScopeId; 3] = [ScopeId::User, ScopeId::Project, ScopeId::Default];

/// Raw value and the scope that supplied it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub raw: String,
    pub source: ScopeId,
}

/// One generation of loaded scopes
#[derive(Debug)]
struct Snapshot {
    order: PrecedenceOrder,
    layers: BTreeMap<ScopeId, RawMap>,
    merged: BTreeMap<KeyPath, Resolved>,
}

#[derive(Debug)]
struct ResolverState {
    default_scope: ScopeId,
    cache: Option<Arc<Snapshot>>,
}

/// Builder for [`MergeResolver`]
pub struct MergeResolverBuilder {
    provider: ProviderId,
    policy: ScopePolicy,
    syntax: KeySyntax,
    backends: Option<BackendRegistry>,
    types: TypeRegistry,
    secrets: Option<SecretChain>,
    env: Option<EnvSource>,
    default_scope: ScopeId,
}

impl MergeResolverBuilder {
    /// Key syntax for parsing keys and file contents
    pub fn syntax(mut self, syntax: KeySyntax) -> Self {
        self.syntax = syntax;
        self
    }

    /// Backend registry; defaults to the built-in formats with this syntax
    pub fn backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = Some(backends);
        self
    }

    pub fn types(mut self, types: TypeRegistry) -> Self {
        self.types = types;
        self
    }

    /// Secret chain; defaults to environment variables only
    pub fn secrets(mut self, secrets: SecretChain) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Environment snapshot source; defaults to the process environment
    pub fn env_source(mut self, env: EnvSource) -> Self {
        self.env = Some(env);
        self
    }

    /// Read package defaults from `path`, writable when linked for development
    pub fn defaults_file(mut self, path: impl Into<PathBuf>, writable: bool) -> Self {
        self.policy = self.policy.with_defaults_file(path, writable);
        self
    }

    /// Scope used by `set` when none is given
    pub fn default_scope(mut self, scope: ScopeId) -> Self {
        self.default_scope = scope;
        self
    }

    pub fn build(self) -> StorageResult<MergeResolver> {
        check_default_scope(&self.policy, self.default_scope)?;
        let backends = self
            .backends
            .unwrap_or_else(|| BackendRegistry::builtin(&self.syntax));
        let secrets = self
            .secrets
            .unwrap_or_else(|| SecretChain::environment(self.provider.as_str()));

        let mut core = RawMap::new();
        core.insert(
            KeyPath::parse(POLICY_ORDER_KEY)?,
            PrecedenceOrder::default().as_str().to_string(),
        );

        Ok(MergeResolver {
            provider: self.provider,
            policy: self.policy,
            syntax: self.syntax,
            backends,
            types: self.types,
            secrets,
            env: self.env.unwrap_or_else(process_env),
            core,
            state: ReentrantMutex::new(RefCell::new(ResolverState {
                default_scope: self.default_scope,
                cache: None,
            })),
        })
    }
}

fn check_default_scope(policy: &ScopePolicy, scope: ScopeId) -> StorageResult<()> {
    if !DEFAULT_SCOPE_CHOICES.contains(&scope) {
        return Err(StorageError::validation_error(
            "default_scope",
            format!("'{}' cannot be the default write scope", scope),
        ));
    }
    if !policy.allows(scope) {
        return Err(StorageError::read_only(
            scope,
            "package defaults are not linked for editing",
        ));
    }
    Ok(())
}

/// Layered read/write façade for one provider
pub struct MergeResolver {
    provider: ProviderId,
    policy: ScopePolicy,
    syntax: KeySyntax,
    backends: BackendRegistry,
    types: TypeRegistry,
    secrets: SecretChain,
    env: EnvSource,
    core: RawMap,
    state: ReentrantMutex<RefCell<ResolverState>>,
}

impl MergeResolver {
    /// Start building a resolver for `provider` over `layout`
    pub fn builder(provider: ProviderId, layout: ScopeLayout) -> MergeResolverBuilder {
        MergeResolverBuilder {
            provider,
            policy: ScopePolicy::new(layout),
            syntax: KeySyntax::default(),
            backends: None,
            types: TypeRegistry::builtin(),
            secrets: None,
            env: None,
            default_scope: ScopeId::User,
        }
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn policy(&self) -> &ScopePolicy {
        &self.policy
    }

    pub fn syntax(&self) -> &KeySyntax {
        &self.syntax
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn secrets(&self) -> &SecretChain {
        &self.secrets
    }

    /// Parse a key with this resolver's syntax
    pub fn key(&self, raw: &str) -> StorageResult<KeyPath> {
        self.syntax.parse(raw)
    }

    /// Drop cached scopes; the next read reloads from disk
    pub fn invalidate(&self) {
        let guard = self.state.lock();
        guard.borrow_mut().cache = None;
        debug!(provider = %self.provider, "Resolver cache invalidated");
    }

    fn snapshot(&self) -> StorageResult<Arc<Snapshot>> {
        let guard = self.state.lock();
        let cached = guard.borrow().cache.clone();
        if let Some(snapshot) = cached {
            return Ok(snapshot);
        }

        let snapshot = Arc::new(self.load_snapshot()?);
        guard.borrow_mut().cache = Some(snapshot.clone());
        Ok(snapshot)
    }

    fn load_snapshot(&self) -> StorageResult<Snapshot> {
        let mut layers = BTreeMap::new();
        for scope in ScopeId::ALL {
            let data = self.load_layer(scope)?;
            layers.insert(scope, data);
        }

        // policy.order is itself resolved through the precedence it selects
        let bootstrap = PrecedenceOrder::default();
        let mut order = self.order_from(&layers, bootstrap);
        if order != bootstrap {
            order = self.order_from(&layers, order);
        }

        let mut merged = BTreeMap::new();
        for scope in self.policy.precedence(order).iter().rev() {
            if let Some(layer) = layers.get(scope) {
                for (key, raw) in layer {
                    merged.insert(
                        key.clone(),
                        Resolved {
                            raw: raw.clone(),
                            source: *scope,
                        },
                    );
                }
            }
        }

        debug!(
            provider = %self.provider,
            order = %order,
            keys = merged.len(),
            "Resolver cache rebuilt"
        );
        Ok(Snapshot {
            order,
            layers,
            merged,
        })
    }

    fn load_layer(&self, scope: ScopeId) -> StorageResult<RawMap> {
        match scope {
            ScopeId::Core => Ok(self.core.clone()),
            ScopeId::Environment => Ok(read_env(&self.provider, &self.syntax, &(self.env)())),
            ScopeId::Secret => Ok(RawMap::new()),
            _ => match self.policy.locate(scope, &self.provider)? {
                Some(path) => self.backends.for_path(&path)?.load(&path),
                None => Ok(RawMap::new()),
            },
        }
    }

    fn order_from(
        &self,
        layers: &BTreeMap<ScopeId, RawMap>,
        order: PrecedenceOrder,
    ) -> PrecedenceOrder {
        let key = match KeyPath::parse(POLICY_ORDER_KEY) {
            Ok(key) => key,
            Err(_) => return order,
        };
        let raw = self
            .policy
            .precedence(order)
            .iter()
            .find_map(|scope| layers.get(scope).and_then(|layer| layer.get(&key)));
        match raw.map(|raw| raw.parse::<PrecedenceOrder>()) {
            Some(Ok(parsed)) => parsed,
            Some(Err(e)) => {
                warn!(provider = %self.provider, "Ignoring invalid precedence order: {}", e);
                PrecedenceOrder::default()
            }
            None => order,
        }
    }

    /// Active precedence order
    pub fn order(&self) -> StorageResult<PrecedenceOrder> {
        Ok(self.snapshot()?.order)
    }

    /// Scopes from highest to lowest precedence under the active order
    pub fn precedence(&self) -> StorageResult<Vec<ScopeId>> {
        Ok(self.policy.precedence(self.order()?).to_vec())
    }

    /// Effective raw value and its source
    ///
    /// Keys under `secret` are looked up in the secret chain first.
    pub fn get_with_source(&self, key: &str) -> StorageResult<Option<Resolved>> {
        let key = self.key(key)?;
        self.resolve(&key)
    }

    /// Effective raw value and its source for a parsed key
    pub fn resolve(&self, key: &KeyPath) -> StorageResult<Option<Resolved>> {
        if key.is_secret() {
            if let Some(raw) = self.secrets.get(&key.dotted())? {
                return Ok(Some(Resolved {
                    raw,
                    source: ScopeId::Secret,
                }));
            }
        }
        Ok(self.snapshot()?.merged.get(key).cloned())
    }

    /// Effective raw text
    pub fn get_raw(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.get_with_source(key)?.map(|r| r.raw))
    }

    /// Effective value with inferred type; secrets are always strings
    pub fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.get_with_source(key)?.map(|r| match r.source {
            ScopeId::Secret => Value::String(r.raw),
            _ => self.types.infer(&r.raw),
        }))
    }

    /// Effective value, or `default` when unset
    pub fn get_or(&self, key: &str, default: Value) -> StorageResult<Value> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Effective value parsed as `type_name`
    pub fn get_as(&self, key: &str, type_name: TypeName) -> StorageResult<Option<Value>> {
        let raw = match self.get_raw(key)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        self.types
            .parse(type_name, &raw, &FieldOptions::new())
            .map(Some)
            .map_err(|_| type_error(key, type_name.as_str(), &raw))
    }

    /// Effective value as an integer; integral floats such as `3.0` are accepted
    pub fn get_int(&self, key: &str) -> StorageResult<Option<i64>> {
        let raw = match self.get_raw(key)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let text = raw.trim();
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Some(n));
        }
        match text.parse::<f64>() {
            Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Ok(Some(f as i64))
            }
            _ => Err(type_error(key, "integer", &raw)),
        }
    }

    pub fn get_float(&self, key: &str) -> StorageResult<Option<f64>> {
        let raw = match self.get_raw(key)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        raw.trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| type_error(key, "number", &raw))
    }

    /// Effective value as a boolean; `true`/`false` in any case, or `1`/`0`
    pub fn get_bool(&self, key: &str) -> StorageResult<Option<bool>> {
        let raw = match self.get_raw(key)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        match raw.trim().to_lowercase().as_str() {
            "true" | "1" => Ok(Some(true)),
            "false" | "0" => Ok(Some(false)),
            _ => Err(type_error(key, "boolean", &raw)),
        }
    }

    /// Scope supplying the effective value of `key`
    pub fn effective_scope_for(&self, key: &str) -> StorageResult<Option<ScopeId>> {
        Ok(self.get_with_source(key)?.map(|r| r.source))
    }

    /// Write raw text into a scope, or delete the key when `value` is `None`
    ///
    /// # Errors
    ///
    /// Fails for `core`, for `default` unless it is linked for editing, for
    /// project scopes without a project root, and when storing a secret with
    /// no writable secret provider.
    pub fn set(&self, key: &str, value: Option<&str>, scope: Option<ScopeId>) -> StorageResult<()> {
        let key = self.key(key)?;
        self.set_many_raw(scope, &[(key, value.map(str::to_string))])
    }

    /// Write a typed value; strings are stored verbatim, other values as JSON
    /// text and `null` deletes
    pub fn set_value(&self, key: &str, value: &Value, scope: Option<ScopeId>) -> StorageResult<()> {
        let raw = match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        };
        self.set(key, raw.as_deref(), scope)
    }

    /// Delete a key from a scope
    pub fn remove(&self, key: &str, scope: Option<ScopeId>) -> StorageResult<()> {
        self.set(key, None, scope)
    }

    /// Apply several writes to one scope with a single load and save
    pub fn set_many_raw(
        &self,
        scope: Option<ScopeId>,
        updates: &[(KeyPath, Option<String>)],
    ) -> StorageResult<()> {
        let _guard = self.state.lock();

        let (secret, plain): (Vec<_>, Vec<_>) = updates.iter().partition(|(k, _)| k.is_secret());
        if !secret.is_empty() && !matches!(scope, None | Some(ScopeId::Secret)) {
            return Err(StorageError::validation_error(
                secret[0].0.dotted(),
                "secret keys can only be stored in the secret chain",
            ));
        }

        let scope = scope.unwrap_or_else(|| self.default_scope());
        if !plain.is_empty() {
            self.check_writable(scope)?;
            for (key, value) in &plain {
                if key.dotted() == POLICY_ORDER_KEY {
                    if let Some(value) = value {
                        value.parse::<PrecedenceOrder>()?;
                    }
                }
            }
        }

        for (key, value) in &secret {
            match value {
                Some(value) => self.secrets.set(&key.dotted(), value)?,
                None => self.secrets.remove(&key.dotted())?,
            }
            debug!(provider = %self.provider, key = %key, "Secret updated");
        }

        if !plain.is_empty() {
            match scope {
                ScopeId::Environment => self.write_env(&plain),
                _ => self.write_file(scope, &plain)?,
            }
        }

        self.invalidate();
        Ok(())
    }

    fn check_writable(&self, scope: ScopeId) -> StorageResult<()> {
        match scope {
            ScopeId::Secret => Err(StorageError::validation_error(
                scope.as_str(),
                "only keys under 'secret' are stored in the secret chain",
            )),
            ScopeId::Environment => Ok(()),
            _ if !self.policy.allows(scope) => Err(StorageError::read_only(
                scope,
                match scope {
                    ScopeId::Core => "engine defaults cannot be modified",
                    _ => "package defaults are not linked for editing",
                },
            )),
            _ => Ok(()),
        }
    }

    fn write_env(&self, updates: &[&(KeyPath, Option<String>)]) {
        for (key, value) in updates {
            let name = env_var_name(&self.provider, key);
            match value {
                Some(value) => std::env::set_var(&name, value),
                None => std::env::remove_var(&name),
            }
            debug!(provider = %self.provider, var = %name, "Environment override updated");
        }
    }

    fn write_file(&self, scope: ScopeId, updates: &[&(KeyPath, Option<String>)]) -> StorageResult<()> {
        let path = self.policy.path_for(scope, &self.provider)?;
        let backend = self.backends.for_path(&path)?;
        let mut data = backend.load(&path)?;
        for (key, value) in updates {
            match value {
                Some(value) => {
                    data.insert(key.clone(), value.clone());
                }
                None => {
                    data.remove(key);
                }
            }
        }
        backend.save(&path, &data)?;
        debug!(
            provider = %self.provider,
            scope = %scope,
            keys = updates.len(),
            "Scope updated"
        );
        Ok(())
    }

    /// Raw contents of one scope
    pub fn layer(&self, scope: ScopeId) -> StorageResult<RawMap> {
        Ok(self
            .snapshot()?
            .layers
            .get(&scope)
            .cloned()
            .unwrap_or_default())
    }

    /// Every scope's contents keyed by canonical key name
    pub fn scoped_values(&self) -> StorageResult<BTreeMap<ScopeId, BTreeMap<String, String>>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot
            .layers
            .iter()
            .map(|(scope, layer)| {
                let values = layer
                    .iter()
                    .map(|(k, v)| (self.syntax.join(k.segments()), v.clone()))
                    .collect();
                (*scope, values)
            })
            .collect())
    }

    /// Merged view of every non-secret scope
    pub fn merged(&self) -> StorageResult<BTreeMap<KeyPath, Resolved>> {
        Ok(self.snapshot()?.merged.clone())
    }

    /// Sorted keys of one scope, or of the merged view
    pub fn list_keys(&self, scope: Option<ScopeId>) -> StorageResult<Vec<KeyPath>> {
        let snapshot = self.snapshot()?;
        Ok(match scope {
            Some(scope) => snapshot
                .layers
                .get(&scope)
                .map(|layer| layer.keys().cloned().collect())
                .unwrap_or_default(),
            None => snapshot.merged.keys().cloned().collect(),
        })
    }

    /// Render the merged view as environment variables
    ///
    /// Names are `<prefix><PROVIDER>_<KEY>`; with the `SIGIL_` prefix they
    /// are exactly the override variables read back by the environment scope.
    /// Secret keys are left out unless `include_secrets` is set.
    pub fn export_env(&self, prefix: &str, include_secrets: bool) -> StorageResult<BTreeMap<String, String>> {
        let snapshot = self.snapshot()?;
        let mut out = BTreeMap::new();
        for (key, resolved) in &snapshot.merged {
            if key.dotted() == POLICY_ORDER_KEY && resolved.source == ScopeId::Core {
                continue;
            }
            if key.is_secret() && !include_secrets {
                continue;
            }
            out.insert(self.export_name(prefix, key), resolved.raw.clone());
        }
        Ok(out)
    }

    /// Exported variable name for `key`
    pub fn export_name(&self, prefix: &str, key: &KeyPath) -> String {
        format!(
            "{}{}_{}",
            prefix,
            self.provider.env_token(),
            key.segments().join("_").to_uppercase()
        )
    }

    /// Scope used by `set` when none is given
    pub fn default_scope(&self) -> ScopeId {
        self.state.lock().borrow().default_scope
    }

    /// Change the default write scope to `user`, `project` or a writable `default`
    pub fn set_default_scope(&self, scope: ScopeId) -> StorageResult<()> {
        check_default_scope(&self.policy, scope)?;
        self.state.lock().borrow_mut().default_scope = scope;
        Ok(())
    }

    /// Settings file written for `scope`
    pub fn target_path(&self, scope: ScopeId) -> StorageResult<PathBuf> {
        self.policy.path_for(scope, &self.provider)
    }

    /// Create the settings file for `scope` if it does not exist
    pub fn ensure_scope(&self, scope: ScopeId) -> StorageResult<PathBuf> {
        let _guard = self.state.lock();
        let path = self.target_path(scope)?;
        if !path.exists() {
            self.backends.for_path(&path)?.save(&path, &RawMap::new())?;
            debug!(provider = %self.provider, scope = %scope, path = %path.display(), "Scope initialized");
            self.invalidate();
        }
        Ok(path)
    }
}

fn type_error(key: &str, expected: &str, raw: &str) -> StorageError {
    StorageError::TypeError {
        key: key.to_string(),
        expected: expected.to_string(),
        value: raw.to_string(),
    }
}
