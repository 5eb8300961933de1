//! Layered settings storage for sigil
//!
//! One provider's settings are spread across scopes (core, package defaults,
//! user, project, their machine-local variants, the environment and the
//! secret chain). This crate provides:
//!
//! - [`keys`] and [`provider_id`]: canonical key paths and provider names
//! - [`policy`]: precedence orders, write permissions and file locations
//! - [`backends`]: INI, JSON and YAML files with atomic saves
//! - [`adapters`]: string, integer, number and boolean type adapters
//! - [`spec`] and [`spec_store`]: provider specifications with entry tags
//! - [`resolver`]: the cached merge over all scopes
//! - [`links`]: development links making package defaults writable

pub mod adapters;
pub mod backends;
pub mod env;
pub mod error;
pub mod keys;
pub mod links;
pub mod policy;
pub mod provider_id;
pub mod resolver;
pub mod spec;
pub mod spec_store;
pub mod types;

pub use adapters::{AdapterError, FieldOptions, TypeAdapter, TypeName, TypeRegistry};
pub use backends::{
    Backend, BackendRegistry, IniBackend, IniDocument, JsonBackend, RawMap, YamlBackend,
};
pub use env::{env_var_name, fixed_env, process_env, read_env, EnvSource};
pub use error::{IoOperation, StorageError, StorageResult};
pub use keys::{parse_key, KeyPath, KeySyntax, SECRET_SEGMENT};
pub use links::{DevLinks, DEV_LINKS_FILE};
pub use policy::{
    find_project_root, host_id, PrecedenceOrder, ScopeLayout, ScopePolicy, CONFIG_HOME_ENV,
    POLICY_ORDER_KEY, PROJECT_ROOT_ENV,
};
pub use provider_id::{normalize_provider_id, ProviderId};
pub use resolver::{MergeResolver, MergeResolverBuilder, Resolved};
pub use spec::{FieldDocument, FieldSpec, ProviderSpec, SpecDocument, SCHEMA_VERSION};
pub use spec_store::{EntryTag, IniSpecStore, SpecStore, SPEC_FILE};
pub use types::{ConfigFormat, ScopeId};
