//! Types shared by the provider manager and orchestrator

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sigil_storage::{FieldOptions, ScopeId, TypeName};

/// Resolved state of one declared field
///
/// `value` is `None` with `error` set when the stored text does not parse as
/// the field's type. `source` is `None` when no scope holds the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: Option<Value>,
    pub source: Option<ScopeId>,
    pub raw: Option<String>,
    pub error: Option<String>,
}

impl FieldValue {
    pub fn is_set(&self) -> bool {
        self.source.is_some()
    }
}

/// What happens to stored values when a field's type changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnTypeChange {
    /// Re-parse under the old type and re-serialize under the new one
    #[default]
    Convert,
    /// Discard stored values
    Clear,
}

/// Changes applied by `edit_field`; `None` keeps the current setting
#[derive(Debug, Clone, Default)]
pub struct FieldEdit {
    pub new_key: Option<String>,
    pub new_type: Option<TypeName>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub options: Option<FieldOptions>,
}

impl FieldEdit {
    pub fn rename(key: impl Into<String>) -> Self {
        Self {
            new_key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn retype(type_name: TypeName) -> Self {
        Self {
            new_type: Some(type_name),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_options(mut self, options: FieldOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Scopes that hold persisted values and may be purged or migrated
pub const PERSISTENT_SCOPES: [ScopeId; 5] = [
    ScopeId::ProjectLocal,
    ScopeId::Project,
    ScopeId::UserLocal,
    ScopeId::User,
    ScopeId::Default,
];
