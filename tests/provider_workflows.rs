//! Provider workflows across crates
//! Registration, precedence policy, hand-edited files, development links and
//! environment export through the public API.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use sigil_common::LogOptions;
use sigil_config::{Orchestrator, ResolverBackend, Settings};
use sigil_secrets::{MemoryKeyStore, SecretChain};
use sigil_storage::{
    fixed_env, DevLinks, KeyPath, PrecedenceOrder, ProviderId, ScopeId, ScopeLayout, TypeName,
};
use tempfile::TempDir;

struct Workspace {
    _temp_dir: TempDir,
    layout: ScopeLayout,
    orchestrator: Orchestrator,
}

fn workspace(env: Vec<(&'static str, &'static str)>) -> Workspace {
    sigil_common::init_logging(LogOptions::default()).expect("Should install subscriber");
    let temp_dir = TempDir::new().expect("Should create temp directory");
    let layout = ScopeLayout::new(temp_dir.path().join("config"))
        .with_project_root(temp_dir.path().join("repo"))
        .with_host("workstation");
    let links = Arc::new(DevLinks::load(layout.user_root()).expect("Should load links"));
    let key_store = Arc::new(MemoryKeyStore::new());
    let backend = ResolverBackend::new(layout.clone(), links)
        .with_env_source(fixed_env(env))
        .with_secrets(Arc::new(move |p: &ProviderId, _: &ScopeLayout| {
            SecretChain::standard(p.as_str(), key_store.clone(), None)
        }));
    let orchestrator = Orchestrator::with_backend(&layout, backend);
    Workspace {
        _temp_dir: temp_dir,
        layout,
        orchestrator,
    }
}

#[test]
fn test_precedence_policy_switch() {
    let ws = workspace(vec![]);
    ws.orchestrator.register_provider("app", None, None).unwrap();
    let app = ws.orchestrator.provider("app").unwrap();
    app.add("theme", "string").unwrap();

    app.set("theme", &json!("from-user"), Some(ScopeId::User)).unwrap();
    app.set("theme", &json!("from-project"), Some(ScopeId::Project))
        .unwrap();
    assert_eq!(app.get("theme").unwrap().value, Some(json!("from-project")));

    let resolver = app.resolver();
    resolver
        .set("policy.order", Some("user_over_project"), Some(ScopeId::User))
        .unwrap();
    assert_eq!(resolver.order().unwrap(), PrecedenceOrder::UserOverProject);
    assert_eq!(app.get("theme").unwrap().value, Some(json!("from-user")));

    // The reserved key never shows up as an untracked field
    assert!(app.find_untracked_keys().unwrap().is_empty());
}

#[test]
fn test_environment_outranks_files() {
    let ws = workspace(vec![("SIGIL_APP_RETRIES", "9")]);
    ws.orchestrator.register_provider("app", None, None).unwrap();
    let app = ws.orchestrator.provider("app").unwrap();
    app.add("retries", "integer").unwrap();
    app.set("retries", &json!(2), Some(ScopeId::ProjectLocal)).unwrap();

    let retries = app.get("retries").unwrap();
    assert_eq!(retries.value, Some(json!(9)));
    assert_eq!(retries.source, Some(ScopeId::Environment));
}

#[test]
fn test_hand_edited_keys_are_adopted() {
    let ws = workspace(vec![]);
    ws.orchestrator.register_provider("app", None, None).unwrap();
    let app = ws.orchestrator.provider("app").unwrap();

    let settings = app.resolver().target_path(ScopeId::User).unwrap();
    std::fs::create_dir_all(settings.parent().unwrap()).unwrap();
    std::fs::write(
        &settings,
        "[__root__]\nport = 8080\n\n[server]\nhost = \"local host\"\n",
    )
    .unwrap();
    app.resolver().invalidate();

    let untracked = app.find_untracked_keys().unwrap();
    let port = KeyPath::parse("port").unwrap();
    let host = KeyPath::parse("server.host").unwrap();
    assert_eq!(untracked.get(&port), Some(&ScopeId::User));
    assert_eq!(untracked.get(&host), Some(&ScopeId::User));

    let mut adopt = BTreeMap::new();
    adopt.insert("port".to_string(), None);
    adopt.insert("server.host".to_string(), Some(TypeName::String));
    app.adopt_untracked(&adopt).unwrap();

    let effective = app.effective().unwrap();
    assert_eq!(effective["port"].value, Some(json!(8080)));
    assert_eq!(effective["server.host"].value, Some(json!("local host")));
    assert!(app.validate_all().unwrap().is_empty());
}

#[test]
fn test_linked_defaults_are_editable() {
    let ws = workspace(vec![]);
    let defaults = ws.layout.user_root().join("..").join("src").join("defaults.ini");
    std::fs::create_dir_all(defaults.parent().unwrap()).unwrap();
    std::fs::write(&defaults, "").unwrap();
    ws.orchestrator.register_provider("plugin", None, None).unwrap();
    ws.orchestrator.provider("plugin").unwrap().add("level", "integer").unwrap();

    ws.orchestrator.set_defaults_file("plugin", &defaults).unwrap();
    let plugin = ws.orchestrator.provider("plugin").unwrap();
    assert!(plugin.set("level", &json!(1), Some(ScopeId::Default)).is_err());

    ws.orchestrator.link_provider("plugin", &defaults).unwrap();
    let plugin = ws.orchestrator.provider("plugin").unwrap();
    plugin.set("level", &json!(1), Some(ScopeId::Default)).unwrap();
    assert_eq!(plugin.get("level").unwrap().source, Some(ScopeId::Default));

    plugin.set("level", &json!(4), Some(ScopeId::User)).unwrap();
    assert_eq!(plugin.get("level").unwrap().value, Some(json!(4)));
    assert!(ws
        .orchestrator
        .list_providers()
        .unwrap()
        .contains(&ProviderId::normalize("plugin").unwrap()));
}

#[test]
fn test_export_environment_with_secrets() {
    let ws = workspace(vec![]);
    ws.orchestrator.register_provider("svc", None, None).unwrap();
    let svc = ws.orchestrator.provider("svc").unwrap();
    svc.add("url", "string").unwrap();
    svc.add("secret.key", "string").unwrap();
    svc.set("url", &json!("https://example.test"), None).unwrap();
    svc.set("secret.key", &json!("s3cr3t"), None).unwrap();

    let public = ws.orchestrator.export_env("", false).unwrap();
    assert_eq!(
        public.get("SVC_URL").map(String::as_str),
        Some("https://example.test")
    );
    assert!(!public.values().any(|v| v == "s3cr3t"));

    let full = ws.orchestrator.export_env("", true).unwrap();
    assert_eq!(full.get("SVC_SECRET_KEY").map(String::as_str), Some("s3cr3t"));

    // The secret went to the keyed store, not to a settings file
    let layers = svc.layers().unwrap();
    assert!(layers.values().all(|layer| !layer.contains_key("secret.key")));
}

#[test]
fn test_settings_handle_shares_resolver() {
    let ws = workspace(vec![]);
    ws.orchestrator.register_provider("cli", None, None).unwrap();
    let cli = ws.orchestrator.provider("cli").unwrap();
    cli.add("verbose", "boolean").unwrap();

    let settings = Settings::new(ws.orchestrator.resolver("cli").unwrap());
    settings.set("verbose", &json!(true), None).unwrap();

    assert_eq!(cli.get("verbose").unwrap().value, Some(json!(true)));
    assert_eq!(
        settings.get("verbose", None, Some(TypeName::Boolean)).unwrap(),
        Some(json!(true))
    );
    assert_eq!(
        settings.get("missing", Some(json!("fallback")), None).unwrap(),
        Some(json!("fallback"))
    );
}
