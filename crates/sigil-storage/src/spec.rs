//! Provider specifications: declared fields and their types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::{FieldOptions, TypeName};
use crate::error::{StorageError, StorageResult};
use crate::keys::KeyPath;
use crate::provider_id::ProviderId;

/// Schema version written for new specifications
pub const SCHEMA_VERSION: &str = "0";

/// Declared metadata for one key
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub key: KeyPath,
    pub type_name: TypeName,
    pub label: Option<String>,
    pub description: Option<String>,
    pub options: FieldOptions,
}

impl FieldSpec {
    /// Field of the given type with no metadata
    pub fn new(key: KeyPath, type_name: TypeName) -> Self {
        Self {
            key,
            type_name,
            label: None,
            description: None,
            options: FieldOptions::new(),
        }
    }

    /// Parse key and type name
    pub fn parse(key: &str, type_name: &str) -> StorageResult<Self> {
        Ok(Self::new(KeyPath::parse(key)?, type_name.parse()?))
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: Value) -> Self {
        self.options.insert(name.into(), value);
        self
    }

    pub fn with_options(mut self, options: FieldOptions) -> Self {
        self.options = options;
        self
    }
}

/// Every declared field of one provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSpec {
    pub provider_id: ProviderId,
    pub schema_version: String,
    pub title: Option<String>,
    pub description: Option<String>,
    fields: Vec<FieldSpec>,
}

impl ProviderSpec {
    /// Specification with no fields
    pub fn new(provider_id: ProviderId) -> Self {
        Self {
            provider_id,
            schema_version: SCHEMA_VERSION.to_string(),
            title: None,
            description: None,
            fields: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replace the field list; keys must be unique
    pub fn with_fields(mut self, fields: Vec<FieldSpec>) -> StorageResult<Self> {
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.key == field.key) {
                return Err(StorageError::validation_error(
                    field.key.dotted(),
                    format!("duplicate field in provider '{}'", self.provider_id),
                ));
            }
        }
        self.fields = fields;
        Ok(self)
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Look up a field
    pub fn field(&self, key: &KeyPath) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| &f.key == key)
    }

    /// Copy with `field` appended
    pub fn adding(&self, field: FieldSpec) -> StorageResult<Self> {
        let mut fields = self.fields.clone();
        fields.push(field);
        self.clone().with_fields(fields)
    }

    /// Copy with the field at `key` replaced in place
    pub fn replacing(&self, key: &KeyPath, field: FieldSpec) -> StorageResult<Self> {
        let fields = self
            .fields
            .iter()
            .map(|f| if &f.key == key { field.clone() } else { f.clone() })
            .collect();
        self.clone().with_fields(fields)
    }

    /// Copy without the field at `key`
    pub fn removing(&self, key: &KeyPath) -> Self {
        let mut spec = self.clone();
        spec.fields.retain(|f| &f.key != key);
        spec
    }
}

/// JSON export form of a specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecDocument {
    pub provider_id: ProviderId,
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<FieldDocument>,
}

/// JSON export form of a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDocument {
    pub key: String,
    #[serde(rename = "type")]
    pub type_name: TypeName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "FieldOptions::is_empty")]
    pub options: FieldOptions,
}

impl From<&ProviderSpec> for SpecDocument {
    fn from(spec: &ProviderSpec) -> Self {
        Self {
            provider_id: spec.provider_id.clone(),
            schema_version: spec.schema_version.clone(),
            title: spec.title.clone(),
            description: spec.description.clone(),
            fields: spec
                .fields
                .iter()
                .map(|f| FieldDocument {
                    key: f.key.dotted(),
                    type_name: f.type_name,
                    label: f.label.clone(),
                    description: f.description.clone(),
                    options: f.options.clone(),
                })
                .collect(),
        }
    }
}

impl TryFrom<SpecDocument> for ProviderSpec {
    type Error = StorageError;

    fn try_from(doc: SpecDocument) -> Result<Self, Self::Error> {
        let fields = doc
            .fields
            .into_iter()
            .map(|f| {
                Ok(FieldSpec {
                    key: KeyPath::parse(&f.key)?,
                    type_name: f.type_name,
                    label: f.label,
                    description: f.description,
                    options: f.options,
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;
        let mut spec = ProviderSpec::new(doc.provider_id).with_fields(fields)?;
        spec.schema_version = doc.schema_version;
        spec.title = doc.title;
        spec.description = doc.description;
        Ok(spec)
    }
}
