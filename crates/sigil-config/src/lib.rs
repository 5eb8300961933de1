//! Provider-level configuration management for sigil
//!
//! - [`backend`]: the seam between managers and per-provider resolvers
//! - [`manager`]: field definitions, validated writes and value migration
//! - [`orchestrator`]: provider registration, development links, spec export
//! - [`handle`]: spec-free `get`/`set` access for lightweight consumers
//!
//! ```no_run
//! use serde_json::json;
//! use sigil_config::Orchestrator;
//! use sigil_storage::ScopeLayout;
//!
//! # fn main() -> sigil_config::ConfigResult<()> {
//! let orchestrator = Orchestrator::open(ScopeLayout::from_env()?)?;
//! orchestrator.register_provider("demo", None, None)?;
//! let demo = orchestrator.provider("demo")?;
//! demo.add("retries", "integer")?;
//! demo.set("retries", &json!(5), None)?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod handle;
pub mod manager;
pub mod orchestrator;
pub mod types;

pub use backend::{standard_secrets, ConfigBackend, ResolverBackend, SecretsFactory, VAULT_FILE};
pub use error::{ConfigError, ConfigResult};
pub use handle::Settings;
pub use manager::ProviderManager;
pub use orchestrator::Orchestrator;
pub use types::{FieldEdit, FieldValue, OnTypeChange, PERSISTENT_SCOPES};
