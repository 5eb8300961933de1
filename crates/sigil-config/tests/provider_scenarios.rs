//! End-to-end provider scenarios
//! Exercises the orchestrator and provider manager against real files.

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;
use serial_test::serial;
use sigil_config::{ConfigError, FieldEdit, OnTypeChange, Orchestrator, ResolverBackend};
use sigil_secrets::{
    EncryptedFileProvider, KdfParams, MemoryKeyStore, SecretChain, SecretsError,
    MASTER_PASSWORD_ENV,
};
use sigil_storage::{
    fixed_env, DevLinks, KeyPath, ProviderId, ScopeId, ScopeLayout, StorageError,
};
use tempfile::TempDir;

fn layout(temp_dir: &TempDir) -> ScopeLayout {
    ScopeLayout::new(temp_dir.path().join("user"))
        .with_project_root(temp_dir.path().join("project"))
        .with_host("box")
}

fn backend(layout: &ScopeLayout) -> ResolverBackend {
    let links = Arc::new(DevLinks::load(layout.user_root()).expect("Should load links"));
    ResolverBackend::new(layout.clone(), links)
        .with_secrets(Arc::new(|p: &ProviderId, _: &ScopeLayout| {
            SecretChain::environment(p.as_str())
        }))
}

fn hermetic(temp_dir: &TempDir) -> Orchestrator {
    let layout = layout(temp_dir);
    let backend = backend(&layout).with_env_source(fixed_env(Vec::<(String, String)>::new()));
    Orchestrator::with_backend(&layout, backend)
}

#[test]
fn test_rename_with_migration() {
    let temp_dir = TempDir::new().expect("Should create temp directory");
    let orchestrator = hermetic(&temp_dir);
    orchestrator.register_provider("pkg", None, None).unwrap();
    let pkg = orchestrator.provider("pkg").unwrap();

    pkg.add("alpha", "string").unwrap();
    pkg.set("alpha", &json!("one"), Some(ScopeId::User)).unwrap();

    pkg.edit_field("alpha", FieldEdit::rename("beta"), OnTypeChange::Convert)
        .unwrap();

    let effective = pkg.effective().unwrap();
    assert_eq!(effective["beta"].value, Some(json!("one")));
    assert_eq!(effective["beta"].source, Some(ScopeId::User));

    let alpha = KeyPath::parse("alpha").unwrap();
    for scope in ScopeId::ALL {
        assert!(!pkg.resolver().layer(scope).unwrap().contains_key(&alpha));
    }
}

#[test]
#[serial]
fn test_environment_overrides_user_value() {
    std::env::remove_var("SIGIL_DEMO_RETRIES");
    let temp_dir = TempDir::new().expect("Should create temp directory");
    let layout = layout(&temp_dir);
    let orchestrator = Orchestrator::with_backend(&layout, backend(&layout));
    orchestrator.register_provider("demo", None, None).unwrap();
    let demo = orchestrator.provider("demo").unwrap();

    demo.add("retries", "integer").unwrap();
    demo.set("retries", &json!(5), Some(ScopeId::User)).unwrap();
    assert_eq!(demo.get("retries").unwrap().value, Some(json!(5)));

    std::env::set_var("SIGIL_DEMO_RETRIES", "7");
    demo.resolver().invalidate();
    let retries = demo.get("retries").unwrap();
    let on_disk = demo.resolver().layer(ScopeId::User).unwrap();
    std::env::remove_var("SIGIL_DEMO_RETRIES");

    assert_eq!(retries.value, Some(json!(7)));
    assert_eq!(retries.source, Some(ScopeId::Environment));
    assert_eq!(
        on_disk.get(&KeyPath::parse("retries").unwrap()).map(String::as_str),
        Some("5")
    );
}

#[test]
#[serial]
fn test_secret_falls_back_to_environment() {
    std::env::remove_var(MASTER_PASSWORD_ENV);
    let temp_dir = TempDir::new().expect("Should create temp directory");
    let layout = layout(&temp_dir);
    let links = Arc::new(DevLinks::load(layout.user_root()).unwrap());
    let backend = ResolverBackend::new(layout.clone(), links)
        .with_env_source(fixed_env(Vec::<(String, String)>::new()))
        .with_secrets(Arc::new(|p: &ProviderId, l: &ScopeLayout| {
            let vault = EncryptedFileProvider::builder(l.user_dir(p).join("secrets.enc.json"))
                .prompt(false)
                .kdf_params(KdfParams::light())
                .build();
            SecretChain::standard(
                p.as_str(),
                Arc::new(MemoryKeyStore::unavailable()),
                Some(vault),
            )
        }));
    let orchestrator = Orchestrator::with_backend(&layout, backend);
    orchestrator.register_provider("demo", None, None).unwrap();
    let demo = orchestrator.provider("demo").unwrap();
    demo.add("secret.token", "string").unwrap();

    std::env::set_var("SIGIL_SECRET_DEMO_TOKEN", "abc");
    let token = demo.get("secret.token");
    let raw = demo.resolver().get("secret.token");
    let write = demo.set("secret.token", &json!("x"), None);
    std::env::remove_var("SIGIL_SECRET_DEMO_TOKEN");

    let token = token.unwrap();
    assert_eq!(token.value, Some(json!("abc")));
    assert_eq!(token.source, Some(ScopeId::Secret));
    assert_eq!(raw.unwrap(), Some(json!("abc")));
    assert!(matches!(
        write,
        Err(ConfigError::Storage(StorageError::Secrets(
            SecretsError::NoWritableProvider
        )))
    ));
    // Nothing leaks into plaintext settings
    assert!(!demo
        .resolver()
        .target_path(ScopeId::User)
        .unwrap()
        .exists());
}

#[test]
#[serial]
fn test_rename_secret_supplied_by_environment() {
    std::env::remove_var("SIGIL_SECRET_DEMO_TOKEN");
    let temp_dir = TempDir::new().expect("Should create temp directory");
    let orchestrator = hermetic(&temp_dir);
    orchestrator.register_provider("demo", None, None).unwrap();
    let demo = orchestrator.provider("demo").unwrap();
    demo.add("secret.token", "string").unwrap();

    std::env::set_var("SIGIL_SECRET_DEMO_TOKEN", "abc");
    let edited = demo.edit_field(
        "secret.token",
        FieldEdit::rename("secret.api_token"),
        OnTypeChange::Convert,
    );
    let old_value = demo.resolver().get("secret.token");
    std::env::remove_var("SIGIL_SECRET_DEMO_TOKEN");

    assert_eq!(edited.unwrap().key.dotted(), "secret.api.token");
    let fields: Vec<String> = demo
        .reload_spec()
        .unwrap()
        .fields()
        .iter()
        .map(|f| f.key.dotted())
        .collect();
    assert_eq!(fields, vec!["secret.api.token".to_string()]);
    // The environment variable is left alone
    assert_eq!(old_value.unwrap(), Some(json!("abc")));
}

#[test]
fn test_rename_stored_secret_moves_value() {
    let temp_dir = TempDir::new().expect("Should create temp directory");
    let layout = layout(&temp_dir);
    let key_store = Arc::new(MemoryKeyStore::new());
    let links = Arc::new(DevLinks::load(layout.user_root()).unwrap());
    let backend = ResolverBackend::new(layout.clone(), links)
        .with_env_source(fixed_env(Vec::<(String, String)>::new()))
        .with_secrets(Arc::new(move |p: &ProviderId, _: &ScopeLayout| {
            SecretChain::standard(p.as_str(), key_store.clone(), None)
        }));
    let orchestrator = Orchestrator::with_backend(&layout, backend);
    orchestrator.register_provider("vaulted", None, None).unwrap();
    let vaulted = orchestrator.provider("vaulted").unwrap();
    vaulted.add("secret.token", "string").unwrap();
    vaulted.set("secret.token", &json!("s3cr3t"), None).unwrap();

    vaulted
        .edit_field("secret.token", FieldEdit::rename("secret.key"), OnTypeChange::Convert)
        .unwrap();

    assert_eq!(vaulted.get("secret.key").unwrap().value, Some(json!("s3cr3t")));
    assert_eq!(vaulted.resolver().get("secret.token").unwrap(), None);
}

#[test]
fn test_atomic_multi_write_rejects_all() {
    let temp_dir = TempDir::new().expect("Should create temp directory");
    let orchestrator = hermetic(&temp_dir);
    orchestrator.register_provider("pkg", None, None).unwrap();
    let pkg = orchestrator.provider("pkg").unwrap();
    pkg.add("a", "integer").unwrap();
    pkg.add("b", "integer").unwrap();
    pkg.set("a", &json!(10), None).unwrap();

    let result = pkg.set_many(
        &[("a".to_string(), json!(1)), ("b".to_string(), json!("bad"))],
        None,
        true,
    );

    assert!(matches!(result, Err(ConfigError::Validation { .. })));
    assert_eq!(pkg.get("a").unwrap().value, Some(json!(10)));
    assert!(!pkg.get("b").unwrap().is_set());
}

#[test]
fn test_bad_stored_value_is_reported() {
    let temp_dir = TempDir::new().expect("Should create temp directory");
    let orchestrator = hermetic(&temp_dir);
    orchestrator.register_provider("pkg", None, None).unwrap();
    let pkg = orchestrator.provider("pkg").unwrap();
    pkg.add("retries", "integer").unwrap();
    pkg.add("name", "string").unwrap();
    pkg.set("name", &json!("ok"), None).unwrap();

    orchestrator
        .resolver("pkg")
        .unwrap()
        .set("retries", Some("not-a-number"), None)
        .unwrap();

    let effective = pkg.effective().unwrap();
    assert_eq!(effective["retries"].value, None);
    assert!(effective["retries"].error.is_some());
    assert_eq!(effective["retries"].raw.as_deref(), Some("not-a-number"));
    assert_eq!(effective["name"].value, Some(json!("ok")));
}

#[test]
fn test_concurrent_spec_edit_conflicts() {
    let temp_dir = TempDir::new().expect("Should create temp directory");
    let first = hermetic(&temp_dir);
    let second = hermetic(&temp_dir);
    first.register_provider("pkg", None, None).unwrap();

    let a = first.provider("pkg").unwrap();
    let b = second.provider("pkg").unwrap();
    a.add("one", "string").unwrap();

    // `b` read the spec before `a` saved
    let err = b.add("two", "string").unwrap_err();
    assert!(err.is_conflict());

    b.add("two", "string").unwrap();
    let fields: Vec<String> = b
        .list_fields()
        .unwrap()
        .iter()
        .map(|f| f.key.dotted())
        .collect();
    assert_eq!(fields, vec!["one".to_string(), "two".to_string()]);
}

#[test]
fn test_retype_converts_every_scope() {
    let temp_dir = TempDir::new().expect("Should create temp directory");
    let orchestrator = hermetic(&temp_dir);
    orchestrator.register_provider("pkg", None, None).unwrap();
    let pkg = orchestrator.provider("pkg").unwrap();
    pkg.add("limit", "string").unwrap();
    pkg.set("limit", &json!("3"), Some(ScopeId::User)).unwrap();
    pkg.set("limit", &json!("4"), Some(ScopeId::ProjectLocal)).unwrap();

    pkg.edit_field("limit", FieldEdit::retype(sigil_storage::TypeName::Number), OnTypeChange::Convert)
        .unwrap();

    let layers = pkg.layers().unwrap();
    assert_eq!(layers[&ScopeId::User]["limit"], "3");
    assert_eq!(layers[&ScopeId::ProjectLocal]["limit"], "4");
    assert_eq!(pkg.get("limit").unwrap().value, Some(json!(4)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_atomic_write_is_all_or_nothing(
        values in prop::collection::vec(prop_oneof![
            (0i64..100).prop_map(|i| json!(i)),
            "[a-z]{1,4}".prop_map(|s| json!(s)),
        ], 1..5)
    ) {
        let temp_dir = TempDir::new().expect("Should create temp directory");
        let orchestrator = hermetic(&temp_dir);
        orchestrator.register_provider("pkg", None, None).unwrap();
        let pkg = orchestrator.provider("pkg").unwrap();

        let updates: Vec<(String, serde_json::Value)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("k{}", i), v.clone()))
            .collect();
        for (key, _) in &updates {
            pkg.add(key, "integer").unwrap();
        }

        let all_valid = values.iter().all(|v| v.is_i64());
        let result = pkg.set_many(&updates, None, true);
        prop_assert_eq!(result.is_ok(), all_valid);

        let effective = pkg.effective().unwrap();
        for (key, value) in &updates {
            if all_valid {
                prop_assert_eq!(effective[key].value.as_ref(), Some(value));
            } else {
                prop_assert!(!effective[key].is_set());
            }
        }
    }
}
