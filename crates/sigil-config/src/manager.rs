//! Provider manager
//!
//! Ties one provider's [`ProviderSpec`] to its [`MergeResolver`]. Field
//! definitions are edited replace-whole-and-save against the spec store's
//! entry tag; values are validated through the type registry before any
//! write reaches a settings file.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use serde_json::Value;
use sigil_common::format_error;
use tracing::{debug, info, warn};

use sigil_storage::{
    EntryTag, FieldSpec, KeyPath, MergeResolver, ProviderId, ProviderSpec, ScopeId, SpecStore,
    TypeName, TypeRegistry, POLICY_ORDER_KEY,
};

use crate::error::{ConfigError, ConfigResult};
use crate::types::{FieldEdit, FieldValue, OnTypeChange, PERSISTENT_SCOPES};

#[derive(Debug, Clone)]
struct Loaded {
    spec: ProviderSpec,
    tag: EntryTag,
}

/// Field and value management for one provider
pub struct ProviderManager {
    provider: ProviderId,
    store: Arc<dyn SpecStore>,
    resolver: Arc<MergeResolver>,
    types: TypeRegistry,
    state: ReentrantMutex<RefCell<Option<Loaded>>>,
}

impl ProviderManager {
    pub fn new(
        provider: ProviderId,
        store: Arc<dyn SpecStore>,
        resolver: Arc<MergeResolver>,
        types: TypeRegistry,
    ) -> Self {
        Self {
            provider,
            store,
            resolver,
            types,
            state: ReentrantMutex::new(RefCell::new(None)),
        }
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// Resolver used for every read and write
    pub fn resolver(&self) -> &Arc<MergeResolver> {
        &self.resolver
    }

    fn loaded(&self) -> ConfigResult<Loaded> {
        let guard = self.state.lock();
        let cached = guard.borrow().clone();
        if let Some(loaded) = cached {
            return Ok(loaded);
        }
        let (spec, tag) = self.store.read_spec(&self.provider)?;
        let loaded = Loaded { spec, tag };
        *guard.borrow_mut() = Some(loaded.clone());
        Ok(loaded)
    }

    /// Current specification
    pub fn spec(&self) -> ConfigResult<ProviderSpec> {
        Ok(self.loaded()?.spec)
    }

    /// Tag of the specification last read or saved
    pub fn etag(&self) -> ConfigResult<EntryTag> {
        Ok(self.loaded()?.tag)
    }

    /// Re-read the specification from the store and drop cached values
    pub fn reload_spec(&self) -> ConfigResult<ProviderSpec> {
        let guard = self.state.lock();
        guard.replace(None);
        self.resolver.invalidate();
        self.spec()
    }

    /// Save `spec` against the tag last read; a conflict drops the cached
    /// copy so the next call re-reads
    fn commit(&self, spec: ProviderSpec) -> ConfigResult<()> {
        let guard = self.state.lock();
        let expected = self.loaded()?.tag;
        match self.store.save_spec(&spec, Some(&expected)) {
            Ok(tag) => {
                *guard.borrow_mut() = Some(Loaded { spec, tag });
                Ok(())
            }
            Err(e) => {
                if matches!(e, sigil_storage::StorageError::Conflict { .. }) {
                    *guard.borrow_mut() = None;
                }
                Err(e.into())
            }
        }
    }

    fn key(&self, raw: &str) -> ConfigResult<KeyPath> {
        Ok(self.resolver.key(raw)?)
    }

    fn field(&self, spec: &ProviderSpec, key: &KeyPath) -> ConfigResult<FieldSpec> {
        spec.field(key)
            .cloned()
            .ok_or_else(|| ConfigError::unknown_field(&self.provider, key))
    }

    /// Update package title and description; `None` keeps the current text
    pub fn edit_provider(
        &self,
        title: Option<String>,
        description: Option<String>,
    ) -> ConfigResult<ProviderSpec> {
        let _guard = self.state.lock();
        let mut spec = self.spec()?;
        if title.is_some() {
            spec.title = title;
        }
        if description.is_some() {
            spec.description = description;
        }
        self.commit(spec.clone())?;
        Ok(spec)
    }

    /// Declared fields in order
    pub fn list_fields(&self) -> ConfigResult<Vec<FieldSpec>> {
        Ok(self.spec()?.fields().to_vec())
    }

    /// Declare a new field
    pub fn add_field(&self, field: FieldSpec) -> ConfigResult<FieldSpec> {
        let _guard = self.state.lock();
        let spec = self.spec()?;
        if spec.field(&field.key).is_some() {
            return Err(ConfigError::duplicate_field(&self.provider, &field.key));
        }
        if field.key.dotted() == POLICY_ORDER_KEY {
            return Err(ConfigError::Policy(format!(
                "'{}' is reserved for the precedence policy",
                POLICY_ORDER_KEY
            )));
        }
        self.commit(spec.adding(field.clone())?)?;
        info!(provider = %self.provider, key = %field.key, field_type = %field.type_name, "Field added");
        Ok(field)
    }

    /// Declare a new field from a key and type name
    pub fn add(&self, key: &str, type_name: &str) -> ConfigResult<FieldSpec> {
        let field = FieldSpec::new(self.key(key)?, self.types.type_for(type_name)?);
        self.add_field(field)
    }

    /// Rename, retype or relabel a field, migrating stored values
    ///
    /// On a type change, `Convert` re-parses each stored value under the old
    /// type and serializes it under the new one; `Clear` drops it. Renames
    /// move values within the scope they were found in. Every conversion is
    /// computed before anything is written.
    pub fn edit_field(
        &self,
        key: &str,
        edit: FieldEdit,
        on_type_change: OnTypeChange,
    ) -> ConfigResult<FieldSpec> {
        let _guard = self.state.lock();
        let spec = self.spec()?;
        let old_key = self.key(key)?;
        let old = self.field(&spec, &old_key)?;

        let new_key = match &edit.new_key {
            Some(raw) => self.key(raw)?,
            None => old_key.clone(),
        };
        let renamed = new_key != old_key;
        if renamed && spec.field(&new_key).is_some() {
            return Err(ConfigError::duplicate_field(&self.provider, &new_key));
        }
        if renamed && new_key.is_secret() != old_key.is_secret() {
            return Err(ConfigError::Policy(
                "fields cannot move into or out of the secret namespace".to_string(),
            ));
        }

        let new_field = FieldSpec {
            key: new_key.clone(),
            type_name: edit.new_type.unwrap_or(old.type_name),
            label: edit.label.or(old.label.clone()),
            description: edit.description.or(old.description.clone()),
            options: edit.options.unwrap_or_else(|| old.options.clone()),
        };
        let retyped = new_field.type_name != old.type_name;

        let plan = self.migration_plan(&old, &new_field, retyped, on_type_change)?;

        self.commit(spec.replacing(&old_key, new_field.clone())?)?;

        for (scope, updates) in plan {
            self.resolver.set_many_raw(scope, &updates)?;
        }
        info!(
            provider = %self.provider,
            key = %old_key,
            new_key = %new_key,
            "Field edited"
        );
        Ok(new_field)
    }

    fn migration_plan(
        &self,
        old: &FieldSpec,
        new: &FieldSpec,
        retyped: bool,
        on_type_change: OnTypeChange,
    ) -> ConfigResult<Vec<(Option<ScopeId>, Vec<(KeyPath, Option<String>)>)>> {
        let renamed = new.key != old.key;
        if !renamed && !retyped {
            return Ok(Vec::new());
        }

        let migrate = |raw: &str| -> ConfigResult<Option<String>> {
            if !retyped {
                return Ok(Some(raw.to_string()));
            }
            match on_type_change {
                OnTypeChange::Clear => Ok(None),
                OnTypeChange::Convert => self
                    .types
                    .convert(raw, old.type_name, new.type_name, &new.options)
                    .map(Some)
                    .map_err(|e| ConfigError::validation(new.key.dotted(), e.to_string())),
            }
        };

        let mut plan = Vec::new();
        let mut push = |scope: Option<ScopeId>, raw: Option<String>| {
            let mut updates = Vec::new();
            if renamed {
                updates.push((old.key.clone(), None));
                if raw.is_some() {
                    updates.push((new.key.clone(), raw));
                }
            } else {
                updates.push((new.key.clone(), raw));
            }
            plan.push((scope, updates));
        };

        if old.key.is_secret() {
            let secrets = self.resolver.secrets();
            match secrets.get_stored(&old.key.dotted())? {
                Some(raw) => push(None, migrate(&raw)?),
                None if secrets.get(&old.key.dotted())?.is_some() => {
                    debug!(key = %old.key, "Leaving secret supplied by a read-only provider");
                }
                None => {}
            }
            return Ok(plan);
        }

        for scope in PERSISTENT_SCOPES {
            let raw = match self.resolver.layer(scope)?.get(&old.key) {
                Some(raw) => raw.clone(),
                None => continue,
            };
            if !self.resolver.policy().allows(scope) {
                debug!(scope = %scope, key = %old.key, "Leaving value in read-only scope");
                continue;
            }
            push(Some(scope), migrate(&raw)?);
        }
        Ok(plan)
    }

    /// Remove a field; with `remove_values` its values are purged from `scopes`
    pub fn delete_field(
        &self,
        key: &str,
        remove_values: bool,
        scopes: &[ScopeId],
    ) -> ConfigResult<()> {
        let _guard = self.state.lock();
        let spec = self.spec()?;
        let key = self.key(key)?;
        self.field(&spec, &key)?;

        self.commit(spec.removing(&key))?;

        if remove_values {
            if key.is_secret() {
                if self.resolver.secrets().can_write() {
                    self.resolver.set_many_raw(None, &[(key.clone(), None)])?;
                }
            } else {
                for scope in scopes {
                    if self.resolver.layer(*scope)?.contains_key(&key) {
                        self.resolver
                            .set_many_raw(Some(*scope), &[(key.clone(), None)])?;
                    }
                }
            }
        }
        info!(provider = %self.provider, key = %key, "Field deleted");
        Ok(())
    }

    fn resolve_field(&self, field: &FieldSpec) -> ConfigResult<FieldValue> {
        let resolved = match self.resolver.resolve(&field.key)? {
            Some(resolved) => resolved,
            None => return Ok(FieldValue::default()),
        };
        let mut value = FieldValue {
            value: None,
            source: Some(resolved.source),
            raw: Some(resolved.raw.clone()),
            error: None,
        };
        match self.types.parse(field.type_name, &resolved.raw, &field.options) {
            Ok(parsed) => value.value = Some(parsed),
            Err(e) => {
                debug!(provider = %self.provider, key = %field.key, "Stored value rejected: {}", e);
                value.error = Some(e.to_string());
            }
        }
        Ok(value)
    }

    /// Every declared field's effective value keyed by dotted key
    ///
    /// A value that fails to parse is reported in its `error` and does not
    /// affect the other fields.
    pub fn effective(&self) -> ConfigResult<BTreeMap<String, FieldValue>> {
        let spec = self.spec()?;
        let mut values = BTreeMap::new();
        for field in spec.fields() {
            values.insert(field.key.dotted(), self.resolve_field(field)?);
        }
        Ok(values)
    }

    /// Effective value of one declared field
    pub fn get(&self, key: &str) -> ConfigResult<FieldValue> {
        let spec = self.spec()?;
        let field = self.field(&spec, &self.key(key)?)?;
        self.resolve_field(&field)
    }

    /// Raw values per scope keyed by dotted key; secrets are not listed
    pub fn layers(&self) -> ConfigResult<BTreeMap<ScopeId, BTreeMap<String, String>>> {
        let mut out = BTreeMap::new();
        for scope in ScopeId::ALL {
            if scope == ScopeId::Secret {
                continue;
            }
            let layer = self.resolver.layer(scope)?;
            out.insert(
                scope,
                layer
                    .into_iter()
                    .filter(|(k, _)| !k.is_secret())
                    .map(|(k, v)| (k.dotted(), v))
                    .collect(),
            );
        }
        Ok(out)
    }

    /// Check a value against its field and return the text that would be stored
    pub fn validate_value(&self, key: &str, value: &Value) -> ConfigResult<String> {
        let spec = self.spec()?;
        let field = self.field(&spec, &self.key(key)?)?;
        self.serialize(&field, value)
    }

    fn serialize(&self, field: &FieldSpec, value: &Value) -> ConfigResult<String> {
        self.types
            .serialize(field.type_name, value, &field.options)
            .map_err(|e| ConfigError::validation(field.key.dotted(), e.to_string()))
    }

    /// Parse errors of every field whose stored value is invalid
    pub fn validate_all(&self) -> ConfigResult<BTreeMap<String, String>> {
        Ok(self
            .effective()?
            .into_iter()
            .filter_map(|(key, value)| value.error.map(|e| (key, e)))
            .collect())
    }

    /// Validate and store a value; `scope` defaults to the resolver's default
    pub fn set(&self, key: &str, value: &Value, scope: Option<ScopeId>) -> ConfigResult<()> {
        self.set_many(&[(key.to_string(), value.clone())], scope, true)
    }

    /// Parse raw text as the field's type and store its canonical form
    pub fn set_raw(&self, key: &str, raw: &str, scope: Option<ScopeId>) -> ConfigResult<()> {
        let spec = self.spec()?;
        let field = self.field(&spec, &self.key(key)?)?;
        let value = self
            .types
            .parse(field.type_name, raw, &field.options)
            .map_err(|e| ConfigError::validation(field.key.dotted(), e.to_string()))?;
        self.set(key, &value, scope)
    }

    /// Remove a field's stored value from one scope
    pub fn clear_value(&self, key: &str, scope: Option<ScopeId>) -> ConfigResult<()> {
        let spec = self.spec()?;
        let field = self.field(&spec, &self.key(key)?)?;
        self.resolver.set_many_raw(scope, &[(field.key, None)])?;
        Ok(())
    }

    /// Write several values
    ///
    /// With `atomic`, every value is validated before the first write and a
    /// single failure leaves storage untouched. Without it, each value is
    /// validated and written on its own and failures are collected into
    /// [`ConfigError::PartialWrite`].
    pub fn set_many(
        &self,
        updates: &[(String, Value)],
        scope: Option<ScopeId>,
        atomic: bool,
    ) -> ConfigResult<()> {
        let _guard = self.state.lock();
        let spec = self.spec()?;

        if atomic {
            let mut raw_updates = Vec::with_capacity(updates.len());
            for (key, value) in updates {
                let field = self.field(&spec, &self.key(key)?)?;
                let raw = match value {
                    Value::Null => None,
                    value => Some(self.serialize(&field, value)?),
                };
                raw_updates.push((field.key, raw));
            }
            self.resolver.set_many_raw(scope, &raw_updates)?;
            debug!(provider = %self.provider, count = updates.len(), "Values written");
            return Ok(());
        }

        let mut failed = Vec::new();
        let mut first_error = None;
        for (key, value) in updates {
            let result = self.key(key).and_then(|key| self.field(&spec, &key)).and_then(|field| {
                let raw = match value {
                    Value::Null => None,
                    value => Some(self.serialize(&field, value)?),
                };
                Ok(self.resolver.set_many_raw(scope, &[(field.key, raw)])?)
            });
            if let Err(e) = result {
                warn!(provider = %self.provider, key = %key, "Write failed: {}", format_error(&e));
                failed.push(key.clone());
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            None => Ok(()),
            Some(e) => Err(ConfigError::PartialWrite {
                attempted: updates.len(),
                failed,
                message: e.to_string(),
            }),
        }
    }

    /// Stored keys with no declared field, with the highest scope holding each
    pub fn find_untracked_keys(&self) -> ConfigResult<BTreeMap<KeyPath, ScopeId>> {
        let spec = self.spec()?;
        let mut out = BTreeMap::new();
        for scope in self.resolver.precedence()? {
            if !scope.is_file_backed() {
                continue;
            }
            for key in self.resolver.list_keys(Some(scope))? {
                if spec.field(&key).is_none() && key.dotted() != POLICY_ORDER_KEY {
                    out.entry(key).or_insert(scope);
                }
            }
        }
        Ok(out)
    }

    /// Declare fields for untracked keys
    ///
    /// A type of `None` is inferred from the effective raw value.
    pub fn adopt_untracked(
        &self,
        keys: &BTreeMap<String, Option<TypeName>>,
    ) -> ConfigResult<Vec<FieldSpec>> {
        let _guard = self.state.lock();
        let untracked = self.find_untracked_keys()?;
        let mut spec = self.spec()?;
        let mut adopted = Vec::new();

        for (raw_key, type_name) in keys {
            let key = self.key(raw_key)?;
            if spec.field(&key).is_some() {
                return Err(ConfigError::duplicate_field(&self.provider, &key));
            }
            if !untracked.contains_key(&key) {
                return Err(ConfigError::unknown_field(&self.provider, &key));
            }
            let type_name = match type_name {
                Some(type_name) => *type_name,
                None => {
                    let raw = self.resolver.resolve(&key)?.map(|r| r.raw).unwrap_or_default();
                    infer_type(&self.types.infer(&raw))
                }
            };
            let field = FieldSpec::new(key, type_name);
            spec = spec.adding(field.clone())?;
            adopted.push(field);
        }

        self.commit(spec)?;
        info!(provider = %self.provider, count = adopted.len(), "Adopted untracked keys");
        Ok(adopted)
    }

    /// Create the settings file for `scope` if it is missing
    pub fn init(&self, scope: ScopeId) -> ConfigResult<PathBuf> {
        Ok(self.resolver.ensure_scope(scope)?)
    }

    /// Settings file written for `scope`
    pub fn target_path(&self, scope: ScopeId) -> ConfigResult<PathBuf> {
        Ok(self.resolver.target_path(scope)?)
    }

    /// Environment variables for the merged view plus declared secrets
    pub fn export_env(
        &self,
        prefix: &str,
        include_secrets: bool,
    ) -> ConfigResult<BTreeMap<String, String>> {
        let mut vars = self.resolver.export_env(prefix, include_secrets)?;
        if include_secrets {
            for field in self.spec()?.fields() {
                if !field.key.is_secret() {
                    continue;
                }
                if let Some(raw) = self.resolver.secrets().get(&field.key.dotted())? {
                    vars.insert(self.resolver.export_name(prefix, &field.key), raw);
                }
            }
        }
        Ok(vars)
    }
}

fn infer_type(value: &Value) -> TypeName {
    match value {
        Value::Bool(_) => TypeName::Boolean,
        Value::Number(n) if n.is_i64() || n.is_u64() => TypeName::Integer,
        Value::Number(_) => TypeName::Number,
        _ => TypeName::String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sigil_storage::{
        fixed_env, DevLinks, IniSpecStore, ScopeLayout,
    };
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        manager: ProviderManager,
        store: Arc<IniSpecStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let root = dir.path().join("user");
        let provider = ProviderId::normalize("pkg").unwrap();
        let store = Arc::new(IniSpecStore::new(
            &root,
            Arc::new(DevLinks::load(&root).unwrap()),
        ));
        store.create_spec(&ProviderSpec::new(provider.clone())).unwrap();

        let resolver = MergeResolver::builder(
            provider.clone(),
            ScopeLayout::new(&root)
                .with_project_root(dir.path().join("project"))
                .with_host("box"),
        )
        .env_source(fixed_env(Vec::<(String, String)>::new()))
        .build()
        .unwrap();

        let manager = ProviderManager::new(
            provider,
            store.clone(),
            Arc::new(resolver),
            TypeRegistry::builtin(),
        );
        Fixture {
            _dir: dir,
            manager,
            store,
        }
    }

    #[test]
    fn test_add_field_twice() {
        let f = fixture();
        f.manager.add("retries", "integer").unwrap();
        assert!(matches!(
            f.manager.add("retries", "string"),
            Err(ConfigError::DuplicateField { .. })
        ));
        assert!(matches!(
            f.manager.add("x", "decimal"),
            Err(ConfigError::Storage(sigil_storage::StorageError::UnknownType { .. }))
        ));
        assert!(matches!(
            f.manager.add("policy.order", "string"),
            Err(ConfigError::Policy(_))
        ));
    }

    #[test]
    fn test_set_validates() {
        let f = fixture();
        f.manager
            .add_field(
                FieldSpec::parse("retries", "integer")
                    .unwrap()
                    .with_option("maximum", json!(10)),
            )
            .unwrap();

        f.manager.set("retries", &json!(3), None).unwrap();
        assert_eq!(f.manager.get("retries").unwrap().value, Some(json!(3)));

        assert!(matches!(
            f.manager.set("retries", &json!(11), None),
            Err(ConfigError::Validation { .. })
        ));
        assert!(matches!(
            f.manager.set("retries", &json!("3"), None),
            Err(ConfigError::Validation { .. })
        ));
        assert!(matches!(
            f.manager.set("unknown", &json!(1), None),
            Err(ConfigError::UnknownField { .. })
        ));

        f.manager.set_raw("retries", "4", None).unwrap();
        assert_eq!(f.manager.get("retries").unwrap().value, Some(json!(4)));
    }

    #[test]
    fn test_effective_reports_bad_values() {
        let f = fixture();
        f.manager.add("retries", "integer").unwrap();
        f.manager.add("name", "string").unwrap();
        f.manager
            .resolver()
            .set("retries", Some("not-a-number"), None)
            .unwrap();
        f.manager.resolver().set("name", Some("demo"), None).unwrap();

        let effective = f.manager.effective().unwrap();
        assert_eq!(effective["retries"].value, None);
        assert!(effective["retries"].error.is_some());
        assert_eq!(effective["retries"].source, Some(ScopeId::User));
        assert_eq!(effective["name"].value, Some(json!("demo")));

        let errors = f.manager.validate_all().unwrap();
        assert_eq!(errors.keys().collect::<Vec<_>>(), vec!["retries"]);
    }

    #[test]
    fn test_retype_convert_and_clear() {
        let f = fixture();
        f.manager.add("count", "string").unwrap();
        f.manager.add("label", "string").unwrap();
        f.manager.set("count", &json!("12"), None).unwrap();
        f.manager.set("label", &json!("abc"), None).unwrap();

        f.manager
            .edit_field("count", FieldEdit::retype(TypeName::Integer), OnTypeChange::Convert)
            .unwrap();
        assert_eq!(f.manager.get("count").unwrap().value, Some(json!(12)));

        assert!(matches!(
            f.manager.edit_field("label", FieldEdit::retype(TypeName::Integer), OnTypeChange::Convert),
            Err(ConfigError::Validation { .. })
        ));
        // Failed conversion leaves the field untouched
        assert_eq!(
            f.manager.spec().unwrap().field(&KeyPath::parse("label").unwrap()).unwrap().type_name,
            TypeName::String
        );

        f.manager
            .edit_field("label", FieldEdit::retype(TypeName::Integer), OnTypeChange::Clear)
            .unwrap();
        assert!(!f.manager.get("label").unwrap().is_set());
    }

    #[test]
    fn test_rename_moves_value_within_scope() {
        let f = fixture();
        f.manager.add("alpha", "string").unwrap();
        f.manager.set("alpha", &json!("one"), Some(ScopeId::Project)).unwrap();

        f.manager
            .edit_field("alpha", FieldEdit::rename("beta"), OnTypeChange::Convert)
            .unwrap();

        let effective = f.manager.effective().unwrap();
        assert_eq!(effective["beta"].value, Some(json!("one")));
        assert_eq!(effective["beta"].source, Some(ScopeId::Project));
        assert!(!effective.contains_key("alpha"));
        assert!(!f
            .manager
            .resolver()
            .layer(ScopeId::Project)
            .unwrap()
            .contains_key(&KeyPath::parse("alpha").unwrap()));
    }

    #[test]
    fn test_delete_field_purges_values() {
        let f = fixture();
        f.manager.add("a", "string").unwrap();
        f.manager.set("a", &json!("x"), Some(ScopeId::User)).unwrap();
        f.manager.set("a", &json!("y"), Some(ScopeId::Project)).unwrap();

        f.manager.delete_field("a", true, &[ScopeId::User]).unwrap();
        assert!(f.manager.spec().unwrap().fields().is_empty());
        assert_eq!(f.manager.resolver().get_raw("a").unwrap().as_deref(), Some("y"));
        assert_eq!(
            f.manager.find_untracked_keys().unwrap().get(&KeyPath::parse("a").unwrap()),
            Some(&ScopeId::Project)
        );

        assert!(matches!(
            f.manager.delete_field("a", false, &[]),
            Err(ConfigError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_atomic_set_many() {
        let f = fixture();
        f.manager.add("a", "integer").unwrap();
        f.manager.add("b", "integer").unwrap();

        let err = f
            .manager
            .set_many(
                &[("a".to_string(), json!(1)), ("b".to_string(), json!("bad"))],
                None,
                true,
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
        assert!(!f.manager.get("a").unwrap().is_set());
        assert!(!f.manager.get("b").unwrap().is_set());

        let err = f
            .manager
            .set_many(
                &[("a".to_string(), json!(1)), ("b".to_string(), json!("bad"))],
                None,
                false,
            )
            .unwrap_err();
        match err {
            ConfigError::PartialWrite { failed, attempted, .. } => {
                assert_eq!(failed, vec!["b".to_string()]);
                assert_eq!(attempted, 2);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(f.manager.get("a").unwrap().value, Some(json!(1)));
    }

    #[test]
    fn test_adopt_untracked() {
        let f = fixture();
        f.manager.resolver().set("port", Some("8080"), None).unwrap();
        f.manager.resolver().set("host", Some("local"), None).unwrap();

        let untracked = f.manager.find_untracked_keys().unwrap();
        assert_eq!(untracked.len(), 2);

        let mut adopt = BTreeMap::new();
        adopt.insert("port".to_string(), None);
        adopt.insert("host".to_string(), Some(TypeName::String));
        let adopted = f.manager.adopt_untracked(&adopt).unwrap();
        assert_eq!(adopted.len(), 2);

        let spec = f.manager.spec().unwrap();
        assert_eq!(
            spec.field(&KeyPath::parse("port").unwrap()).unwrap().type_name,
            TypeName::Integer
        );
        assert!(f.manager.find_untracked_keys().unwrap().is_empty());

        let mut missing = BTreeMap::new();
        missing.insert("nothing".to_string(), None);
        assert!(matches!(
            f.manager.adopt_untracked(&missing),
            Err(ConfigError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_conflict_then_reload() {
        let f = fixture();
        f.manager.spec().unwrap();

        // Another writer saves behind the manager's back
        let other = f.store.get_spec(f.manager.provider()).unwrap().with_title("Other");
        f.store.save_spec(&other, None).unwrap();

        let err = f.manager.add("a", "string").unwrap_err();
        assert!(err.is_conflict());

        // The failed save dropped the cached spec; retrying re-reads
        f.manager.add("a", "string").unwrap();
        assert_eq!(f.manager.spec().unwrap().title.as_deref(), Some("Other"));
    }

    #[test]
    fn test_init_creates_scope_file() {
        let f = fixture();
        let path = f.manager.target_path(ScopeId::ProjectLocal).unwrap();
        assert!(path.ends_with("settings-local-box.ini"));
        assert!(!path.exists());
        assert_eq!(f.manager.init(ScopeId::ProjectLocal).unwrap(), path);
        assert!(path.is_file());
        assert!(f.manager.init(ScopeId::Core).is_err());
    }

    #[test]
    fn test_edit_provider() {
        let f = fixture();
        let spec = f
            .manager
            .edit_provider(Some("Package".to_string()), None)
            .unwrap();
        assert_eq!(spec.title.as_deref(), Some("Package"));
        assert_eq!(f.manager.reload_spec().unwrap().title.as_deref(), Some("Package"));
    }
}
