// SPDX-License-Identifier: MIT

//! Record schema definitions, used for both run state and run config

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::sdk::error::SchemaValidationError;
use crate::sdk::task::Record;

/// Schema defining the shape of a typed record
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct RecordSchema {
    /// Field definitions
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldDef>,
}

/// Shape of the shared state document of a run
pub type StateSchema = RecordSchema;

/// Shape of the read-only config document of a run
pub type ConfigSchema = RecordSchema;

/// Definition of a single field
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FieldDef {
    /// Type of the field
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Reducer for merging values
    #[serde(default)]
    pub reducer: ReducerType,
    /// Default value
    pub default: Option<Value>,
    /// Must be present when validating a record (config only)
    #[serde(default)]
    pub required: bool,
}

impl FieldDef {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            reducer: ReducerType::default(),
            default: None,
            required: false,
        }
    }

    pub fn reducer(mut self, reducer: ReducerType) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Supported field types
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    /// Any JSON value
    Any,
}

impl FieldType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Any => "any",
        }
    }
}

/// Reducer types for merging values into state
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReducerType {
    /// Replace the value (default, last write wins)
    #[default]
    Overwrite,
    /// Append to array
    Append,
    /// Keep maximum value
    Max,
    /// Keep minimum value
    Min,
    /// Shallow-merge objects
    Merge,
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl RecordSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field definition
    pub fn field(mut self, name: impl Into<String>, def: FieldDef) -> Self {
        self.fields.insert(name.into(), def);
        self
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn reducer(&self, field: &str) -> ReducerType {
        self.fields
            .get(field)
            .map(|def| def.reducer)
            .unwrap_or_default()
    }

    /// Record holding every declared default
    pub fn defaults(&self) -> Record {
        self.fields
            .iter()
            .filter_map(|(name, def)| def.default.clone().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Validate a raw value into a typed record, filling in defaults
    pub fn validate(&self, raw: &Value) -> Result<Record, SchemaValidationError> {
        let obj = match raw {
            Value::Object(obj) => obj,
            Value::Null => return self.validate(&Value::Object(Record::new())),
            other => {
                return Err(SchemaValidationError::NotAnObject {
                    found: json_type_name(other).to_string(),
                })
            }
        };

        if let Some(unknown) = obj.keys().find(|k| !self.fields.contains_key(*k)) {
            return Err(SchemaValidationError::UnknownField(unknown.clone()));
        }

        let mut record = Record::new();
        for (name, def) in &self.fields {
            match obj.get(name) {
                Some(value) => {
                    self.check_type(name, def, value)?;
                    record.insert(name.clone(), value.clone());
                }
                None if def.required => {
                    return Err(SchemaValidationError::MissingField(name.clone()))
                }
                None => {
                    if let Some(default) = &def.default {
                        record.insert(name.clone(), default.clone());
                    }
                }
            }
        }
        Ok(record)
    }

    /// Check a value a step wants to merge into `field`.
    ///
    /// Append fields accept single elements as well as arrays.
    pub fn check_update(&self, field: &str, value: &Value) -> Result<(), SchemaValidationError> {
        let def = self
            .fields
            .get(field)
            .ok_or_else(|| SchemaValidationError::UnknownField(field.to_string()))?;
        if def.reducer == ReducerType::Append {
            return Ok(());
        }
        self.check_type(field, def, value)
    }

    fn check_type(
        &self,
        field: &str,
        def: &FieldDef,
        value: &Value,
    ) -> Result<(), SchemaValidationError> {
        if def.field_type.matches(value) {
            Ok(())
        } else {
            Err(SchemaValidationError::TypeMismatch {
                field: field.to_string(),
                expected: def.field_type.as_str().to_string(),
                found: json_type_name(value).to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_deserialize() {
        let yaml = r#"
            intent:
              type: string
            confidence:
              type: number
              default: 0.0
            findings:
              type: array
              reducer: append
        "#;
        let schema: RecordSchema = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(schema.fields.len(), 3);
        assert_eq!(schema.fields["intent"].field_type, FieldType::String);
        assert_eq!(schema.fields["confidence"].default, Some(json!(0.0)));
        assert_eq!(schema.fields["findings"].reducer, ReducerType::Append);
        assert!(!schema.fields["intent"].required);
    }

    #[test]
    fn test_all_reducers() {
        let yaml = r#"
            f1: { type: string, reducer: overwrite }
            f2: { type: array, reducer: append }
            f3: { type: number, reducer: max }
            f4: { type: number, reducer: min }
            f5: { type: object, reducer: merge }
        "#;
        let schema: RecordSchema = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(schema.reducer("f1"), ReducerType::Overwrite);
        assert_eq!(schema.reducer("f2"), ReducerType::Append);
        assert_eq!(schema.reducer("f3"), ReducerType::Max);
        assert_eq!(schema.reducer("f4"), ReducerType::Min);
        assert_eq!(schema.reducer("f5"), ReducerType::Merge);
        assert_eq!(schema.reducer("missing"), ReducerType::Overwrite);
    }

    fn config_schema() -> RecordSchema {
        RecordSchema::new()
            .field("mode", FieldDef::new(FieldType::String).required())
            .field(
                "depth",
                FieldDef::new(FieldType::Integer).default_value(json!(2)),
            )
    }

    #[test]
    fn test_validate_fills_defaults() {
        let record = config_schema().validate(&json!({"mode": "fast"})).unwrap();
        assert_eq!(record["mode"], json!("fast"));
        assert_eq!(record["depth"], json!(2));
    }

    #[test]
    fn test_validate_rejects_missing_required() {
        let err = config_schema().validate(&json!({})).unwrap_err();
        assert_eq!(err, SchemaValidationError::MissingField("mode".into()));
    }

    #[test]
    fn test_validate_rejects_unknown_field() {
        let err = config_schema()
            .validate(&json!({"mode": "fast", "extra": 1}))
            .unwrap_err();
        assert_eq!(err, SchemaValidationError::UnknownField("extra".into()));
    }

    #[test]
    fn test_validate_rejects_type_mismatch() {
        let err = config_schema()
            .validate(&json!({"mode": "fast", "depth": 1.5}))
            .unwrap_err();
        assert!(matches!(err, SchemaValidationError::TypeMismatch { .. }));
    }

    #[test]
    fn test_validate_rejects_non_object() {
        let err = config_schema().validate(&json!([1, 2])).unwrap_err();
        assert_eq!(
            err,
            SchemaValidationError::NotAnObject {
                found: "array".into()
            }
        );
    }

    #[test]
    fn test_null_config_is_empty_record() {
        let record = RecordSchema::new().validate(&Value::Null).unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn test_check_update_allows_append_elements() {
        let schema = RecordSchema::new()
            .field(
                "items",
                FieldDef::new(FieldType::Array).reducer(ReducerType::Append),
            )
            .field("count", FieldDef::new(FieldType::Integer));

        assert!(schema.check_update("items", &json!("one")).is_ok());
        assert!(schema.check_update("count", &json!(3)).is_ok());
        assert!(schema.check_update("count", &json!("3")).is_err());
        assert!(schema.check_update("nope", &json!(3)).is_err());
    }
}
