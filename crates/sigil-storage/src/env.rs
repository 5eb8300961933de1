//! Environment variable overrides
//!
//! `SIGIL_<PROVIDER>_<KEY>` overrides `<key>` for `<provider>`. The remainder
//! after the prefix is lowercased and parsed with the key syntax, so
//! `SIGIL_DEMO_DB_HOST` addresses `db.host`. Secret keys are never read from
//! these variables; they have their own `SIGIL_SECRET_` namespace.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backends::RawMap;
use crate::keys::{KeyPath, KeySyntax};
use crate::provider_id::ProviderId;

/// Snapshot source for environment variables
pub type EnvSource = Arc<dyn Fn() -> Vec<(String, String)> + Send + Sync>;

/// The live process environment
pub fn process_env() -> EnvSource {
    Arc::new(|| std::env::vars().collect())
}

/// A fixed set of variables, for tests and embedding
pub fn fixed_env<I, K, V>(vars: I) -> EnvSource
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let vars: Vec<(String, String)> = vars
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    Arc::new(move || vars.clone())
}

/// Variable overriding `key` for `provider`
pub fn env_var_name(provider: &ProviderId, key: &KeyPath) -> String {
    format!(
        "{}{}",
        provider.env_prefix(),
        key.segments().join("_").to_uppercase()
    )
}

/// Collect a provider's overrides from a variable snapshot
///
/// Every variable starting with the provider's prefix is taken, including
/// those of a provider whose name extends this one (see
/// [`ProviderId::env_prefix`]).
pub fn read_env(provider: &ProviderId, syntax: &KeySyntax, vars: &[(String, String)]) -> RawMap {
    let prefix = provider.env_prefix();
    let mut out = RawMap::new();

    for (name, value) in vars {
        let rest = match name.strip_prefix(&prefix) {
            Some(rest) => rest,
            None => continue,
        };
        match syntax.parse(&rest.to_lowercase()) {
            Ok(key) if key.is_secret() => {
                debug!(var = %name, "Ignoring secret key in plain environment variable");
            }
            Ok(key) => {
                out.insert(key, value.clone());
            }
            Err(e) => warn!(var = %name, "Skipping malformed environment override: {}", e),
        }
    }

    out
}
