//! Scalar type adapters
//!
//! Every place that turns raw setting text into a typed value, or checks a
//! value against a field's options, goes through [`TypeRegistry`]. That
//! includes the resolver's untyped inference.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

use crate::error::StorageError;

/// Field options such as `minimum`, `maximum` and `choices`
pub type FieldOptions = BTreeMap<String, Value>;

/// Built-in scalar types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeName {
    String,
    Integer,
    Number,
    Boolean,
}

impl TypeName {
    /// Every built-in type
    pub const ALL: [TypeName; 4] = [
        TypeName::String,
        TypeName::Integer,
        TypeName::Number,
        TypeName::Boolean,
    ];

    /// Type name as written in specification files
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeName::String => "string",
            TypeName::Integer => "integer",
            TypeName::Number => "number",
            TypeName::Boolean => "boolean",
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TypeName {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "string" => Ok(TypeName::String),
            "integer" => Ok(TypeName::Integer),
            "number" => Ok(TypeName::Number),
            "boolean" => Ok(TypeName::Boolean),
            _ => Err(StorageError::UnknownType {
                name: s.to_string(),
            }),
        }
    }
}

/// Adapter failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    /// Raw text is not a valid literal of the type
    #[error("cannot parse {raw:?} as {type_name}")]
    Parse { type_name: TypeName, raw: String },

    /// Value has the wrong JSON type
    #[error("expected {type_name}, got {value}")]
    Type { type_name: TypeName, value: String },

    /// Value is well-typed but violates a field option
    #[error("{0}")]
    Validation(String),
}

/// Parse/serialize/validate contract for one scalar type
pub trait TypeAdapter: Send + Sync {
    /// Type handled by this adapter
    fn type_name(&self) -> TypeName;

    /// Raw text to value
    fn parse(&self, raw: &str) -> Result<Value, AdapterError>;

    /// Value to raw text
    fn serialize(&self, value: &Value) -> Result<String, AdapterError>;

    /// Check a value against field options
    fn validate(&self, _value: &Value, _options: &FieldOptions) -> Result<(), AdapterError> {
        Ok(())
    }
}

fn type_error(type_name: TypeName, value: &Value) -> AdapterError {
    AdapterError::Type {
        type_name,
        value: value.to_string(),
    }
}

fn check_choices(value: &Value, options: &FieldOptions) -> Result<(), AdapterError> {
    if let Some(Value::Array(choices)) = options.get("choices") {
        if !choices.contains(value) {
            return Err(AdapterError::Validation(format!(
                "{} is not one of {}",
                value,
                Value::Array(choices.clone())
            )));
        }
    }
    Ok(())
}

fn check_bounds(value: f64, options: &FieldOptions) -> Result<(), AdapterError> {
    if let Some(min) = options.get("minimum").and_then(Value::as_f64) {
        if value < min {
            return Err(AdapterError::Validation(format!(
                "{} is less than the minimum {}",
                value, min
            )));
        }
    }
    if let Some(max) = options.get("maximum").and_then(Value::as_f64) {
        if value > max {
            return Err(AdapterError::Validation(format!(
                "{} is greater than the maximum {}",
                value, max
            )));
        }
    }
    Ok(())
}

struct StringAdapter;

impl TypeAdapter for StringAdapter {
    fn type_name(&self) -> TypeName {
        TypeName::String
    }

    fn parse(&self, raw: &str) -> Result<Value, AdapterError> {
        Ok(Value::String(raw.to_string()))
    }

    fn serialize(&self, value: &Value) -> Result<String, AdapterError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(type_error(TypeName::String, other)),
        }
    }

    fn validate(&self, value: &Value, options: &FieldOptions) -> Result<(), AdapterError> {
        check_choices(value, options)
    }
}

struct IntegerAdapter;

impl TypeAdapter for IntegerAdapter {
    fn type_name(&self) -> TypeName {
        TypeName::Integer
    }

    fn parse(&self, raw: &str) -> Result<Value, AdapterError> {
        raw.trim()
            .parse::<i64>()
            .map(|i| Value::Number(i.into()))
            .map_err(|_| AdapterError::Parse {
                type_name: TypeName::Integer,
                raw: raw.to_string(),
            })
    }

    fn serialize(&self, value: &Value) -> Result<String, AdapterError> {
        value
            .as_i64()
            .map(|i| i.to_string())
            .ok_or_else(|| type_error(TypeName::Integer, value))
    }

    fn validate(&self, value: &Value, options: &FieldOptions) -> Result<(), AdapterError> {
        let i = value
            .as_i64()
            .ok_or_else(|| type_error(TypeName::Integer, value))?;
        check_bounds(i as f64, options)?;
        check_choices(value, options)
    }
}

struct NumberAdapter;

impl TypeAdapter for NumberAdapter {
    fn type_name(&self) -> TypeName {
        TypeName::Number
    }

    fn parse(&self, raw: &str) -> Result<Value, AdapterError> {
        let err = || AdapterError::Parse {
            type_name: TypeName::Number,
            raw: raw.to_string(),
        };
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Ok(Value::Number(i.into()));
        }
        let f = trimmed.parse::<f64>().map_err(|_| err())?;
        Number::from_f64(f).map(Value::Number).ok_or_else(err)
    }

    fn serialize(&self, value: &Value) -> Result<String, AdapterError> {
        match value {
            Value::Number(n) => Ok(n.to_string()),
            other => Err(type_error(TypeName::Number, other)),
        }
    }

    fn validate(&self, value: &Value, options: &FieldOptions) -> Result<(), AdapterError> {
        let f = value
            .as_f64()
            .ok_or_else(|| type_error(TypeName::Number, value))?;
        check_bounds(f, options)?;
        check_choices(value, options)
    }
}

struct BooleanAdapter;

impl TypeAdapter for BooleanAdapter {
    fn type_name(&self) -> TypeName {
        TypeName::Boolean
    }

    fn parse(&self, raw: &str) -> Result<Value, AdapterError> {
        match raw.trim().to_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(AdapterError::Parse {
                type_name: TypeName::Boolean,
                raw: raw.to_string(),
            }),
        }
    }

    fn serialize(&self, value: &Value) -> Result<String, AdapterError> {
        match value {
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(type_error(TypeName::Boolean, other)),
        }
    }
}

static STRING: StringAdapter = StringAdapter;
static INTEGER: IntegerAdapter = IntegerAdapter;
static NUMBER: NumberAdapter = NumberAdapter;
static BOOLEAN: BooleanAdapter = BooleanAdapter;

/// The fixed table of type adapters
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeRegistry;

impl TypeRegistry {
    /// Registry of the built-in types
    pub fn builtin() -> Self {
        TypeRegistry
    }

    /// Adapter for a type
    pub fn adapter(&self, type_name: TypeName) -> &'static dyn TypeAdapter {
        match type_name {
            TypeName::String => &STRING,
            TypeName::Integer => &INTEGER,
            TypeName::Number => &NUMBER,
            TypeName::Boolean => &BOOLEAN,
        }
    }

    /// Look up a type by name
    pub fn type_for(&self, name: &str) -> Result<TypeName, StorageError> {
        name.parse()
    }

    /// Parse raw text and check it against options
    pub fn parse(
        &self,
        type_name: TypeName,
        raw: &str,
        options: &FieldOptions,
    ) -> Result<Value, AdapterError> {
        let adapter = self.adapter(type_name);
        let value = adapter.parse(raw)?;
        adapter.validate(&value, options)?;
        Ok(value)
    }

    /// Check a value against options and serialize it
    pub fn serialize(
        &self,
        type_name: TypeName,
        value: &Value,
        options: &FieldOptions,
    ) -> Result<String, AdapterError> {
        let adapter = self.adapter(type_name);
        adapter.validate(value, options)?;
        adapter.serialize(value)
    }

    /// Re-express raw text of one type as raw text of another
    pub fn convert(
        &self,
        raw: &str,
        from: TypeName,
        to: TypeName,
        options: &FieldOptions,
    ) -> Result<String, AdapterError> {
        let source = self.adapter(from);
        let text = source.serialize(&source.parse(raw)?)?;
        let value = self.parse(to, &text, options)?;
        self.adapter(to).serialize(&value)
    }

    /// Best-effort typing of untyped raw text
    ///
    /// Boolean literal, then integer, then number, then JSON array/object,
    /// else the text itself.
    pub fn infer(&self, raw: &str) -> Value {
        for type_name in [TypeName::Boolean, TypeName::Integer, TypeName::Number] {
            if let Ok(value) = self.adapter(type_name).parse(raw) {
                return value;
            }
        }
        let trimmed = raw.trim_start();
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            if let Ok(value) = serde_json::from_str::<Value>(raw) {
                return value;
            }
        }
        Value::String(raw.to_string())
    }
}
