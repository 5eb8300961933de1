//! Read-only secrets from the process environment
//!
//! `secret.api.token` for provider `my-app` is read from
//! `SIGIL_SECRET_MY_APP_API_TOKEN`: the leading `secret` segment is implied by
//! the `SIGIL_SECRET_` prefix and is not repeated.

use crate::{SecretProvider, SecretsError, SecretsResult};

/// Prefix shared by every secret environment variable
pub const SECRET_ENV_PREFIX: &str = "SIGIL_SECRET_";

/// Environment-variable secret provider
pub struct EnvSecretProvider {
    prefix: String,
}

impl EnvSecretProvider {
    /// Create a provider reading variables for `provider`
    pub fn new(provider: &str) -> Self {
        Self {
            prefix: format!(
                "{}{}_",
                SECRET_ENV_PREFIX,
                provider.to_uppercase().replace('-', "_")
            ),
        }
    }

    /// Variable name consulted for `key`, `None` for the bare `secret` namespace
    pub fn var_name(&self, key: &str) -> Option<String> {
        let segments: Vec<&str> = key.split('.').filter(|s| !s.is_empty()).collect();
        let rest = match segments.split_first() {
            Some((first, rest)) if first.eq_ignore_ascii_case("secret") => rest,
            _ => &segments[..],
        };
        if rest.is_empty() {
            return None;
        }
        Some(format!("{}{}", self.prefix, rest.join("_").to_uppercase()))
    }
}

impl SecretProvider for EnvSecretProvider {
    fn name(&self) -> &str {
        "environment"
    }

    fn available(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        false
    }

    fn get(&self, key: &str) -> SecretsResult<Option<String>> {
        Ok(self.var_name(key).and_then(|name| std::env::var(name).ok()))
    }

    fn set(&self, _key: &str, _value: &str) -> SecretsResult<()> {
        Err(SecretsError::read_only(self.name()))
    }
}
