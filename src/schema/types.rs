//! Field declarations and the object <-> row codec
//!
//! Records are persisted as JSON arrays in declaration order. The schema is
//! fixed when the database is opened; field order never changes afterwards.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::{SchemaError, SchemaResult, ValidationDetails};

/// Supported field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "number", alias = "int", alias = "float")]
    Number,
    #[serde(rename = "boolean", alias = "bool")]
    Boolean,
    #[serde(rename = "array:string")]
    StringArray,
    #[serde(rename = "array:number")]
    NumberArray,
    #[serde(rename = "object")]
    Object,
    #[serde(rename = "any")]
    Any,
}

impl FieldType {
    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::StringArray => "array:string",
            FieldType::NumberArray => "array:number",
            FieldType::Object => "object",
            FieldType::Any => "any",
        }
    }

    /// Whether values of this type can be term-mapped
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldType::String | FieldType::StringArray)
    }

    /// Checks a value against this type. `null` is accepted for every type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::Any, _) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Number, Value::Number(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Object, Value::Object(_)) => true,
            (FieldType::StringArray, Value::Array(items)) => items.iter().all(Value::is_string),
            (FieldType::NumberArray, Value::Array(items)) => items.iter().all(Value::is_number),
            _ => false,
        }
    }
}

/// A single declared field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }
}

/// Ordered field declarations for one database.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    fields: Vec<FieldDef>,
    positions: HashMap<String, usize>,
}

impl Schema {
    /// Builds a schema, rejecting empty or duplicate field names.
    pub fn new(fields: Vec<FieldDef>) -> SchemaResult<Self> {
        let mut positions = HashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(SchemaError::invalid("Field name must not be empty"));
            }
            if field.name.starts_with('$') {
                return Err(SchemaError::invalid(format!(
                    "Field name '{}' must not start with '$'",
                    field.name
                )));
            }
            if positions.insert(field.name.clone(), i).is_some() {
                return Err(SchemaError::invalid(format!(
                    "Duplicate field name '{}'",
                    field.name
                )));
            }
        }
        Ok(Self { fields, positions })
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of a field in the persisted row
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.position(name).map(|i| &self.fields[i])
    }

    /// Encodes a record object into a positional row.
    ///
    /// Missing fields become `null`. Undeclared fields and type mismatches
    /// are rejected. The input is never mutated.
    pub fn to_row(&self, record: &Value) -> SchemaResult<Vec<Value>> {
        let object = match record {
            Value::Object(map) => map,
            other => return Err(SchemaError::not_an_object(json_type_name(other))),
        };

        for key in object.keys() {
            if !self.positions.contains_key(key) {
                return Err(SchemaError::validation_failed(ValidationDetails::unknown_field(
                    key.as_str(),
                )));
            }
        }

        let mut row = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = object.get(&field.name).cloned().unwrap_or(Value::Null);
            check_type(field, &value)?;
            row.push(value);
        }
        Ok(row)
    }

    /// Decodes a positional row into a record object.
    ///
    /// Rows shorter than the schema (written before a field was appended to
    /// the declaration) yield `null` for the missing tail.
    pub fn to_object(&self, row: &[Value]) -> Value {
        let mut map = Map::with_capacity(self.fields.len());
        for (i, field) in self.fields.iter().enumerate() {
            let value = row.get(i).cloned().unwrap_or(Value::Null);
            map.insert(field.name.clone(), value);
        }
        Value::Object(map)
    }

    /// Returns the value of `name` inside a positional row.
    pub fn value_in<'a>(&self, row: &'a [Value], name: &str) -> Option<&'a Value> {
        self.position(name).and_then(|i| row.get(i))
    }

    /// Applies a partial object of changes to an existing row.
    pub fn apply_changes(&self, row: &[Value], changes: &Value) -> SchemaResult<Vec<Value>> {
        let object = match changes {
            Value::Object(map) => map,
            other => return Err(SchemaError::not_an_object(json_type_name(other))),
        };

        let mut updated: Vec<Value> = row.to_vec();
        updated.resize(self.fields.len(), Value::Null);

        for (key, value) in object {
            let pos = self.position(key).ok_or_else(|| {
                SchemaError::validation_failed(ValidationDetails::unknown_field(key.as_str()))
            })?;
            check_type(&self.fields[pos], value)?;
            updated[pos] = value.clone();
        }
        Ok(updated)
    }
}

fn check_type(field: &FieldDef, value: &Value) -> SchemaResult<()> {
    if field.field_type.accepts(value) {
        Ok(())
    } else {
        Err(SchemaError::validation_failed(ValidationDetails::new(
            field.name.as_str(),
            field.field_type.type_name(),
            json_type_name(value),
        )))
    }
}

/// JSON type name used in error messages
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn people() -> Schema {
        Schema::new(vec![
            FieldDef::string("id"),
            FieldDef::string("name"),
            FieldDef::number("age"),
            FieldDef::new("tags", FieldType::StringArray),
        ])
        .unwrap()
    }

    #[test]
    fn test_row_order_follows_declaration_not_key_order() {
        let schema = people();
        let row = schema
            .to_row(&json!({"tags": ["a"], "age": 30, "name": "Ann", "id": "1"}))
            .unwrap();
        assert_eq!(row, vec![json!("1"), json!("Ann"), json!(30), json!(["a"])]);
    }

    #[test]
    fn test_missing_fields_become_null() {
        let schema = people();
        let row = schema.to_row(&json!({"id": "1"})).unwrap();
        assert_eq!(row[2], Value::Null);
        assert_eq!(schema.to_object(&row)["age"], Value::Null);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = people().to_row(&json!({"id": "1", "title": "x"})).unwrap_err();
        assert_eq!(err.details().unwrap().field, "title");
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let err = people().to_row(&json!({"age": "thirty"})).unwrap_err();
        assert_eq!(err.details().unwrap().expected, "number");
        assert!(people().to_row(&json!({"tags": ["a", 1]})).is_err());
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(people().to_row(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = Schema::new(vec![FieldDef::string("a"), FieldDef::number("a")]).unwrap_err();
        assert!(err.message().contains("Duplicate"));
    }

    #[test]
    fn test_apply_changes() {
        let schema = people();
        let row = schema.to_row(&json!({"id": "1", "name": "Ann", "age": 30})).unwrap();
        let updated = schema.apply_changes(&row, &json!({"age": 31})).unwrap();
        assert_eq!(updated[2], json!(31));
        assert_eq!(updated[1], json!("Ann"));
        assert!(schema.apply_changes(&row, &json!({"nope": 1})).is_err());
    }

    #[test]
    fn test_field_type_serde_names() {
        let def: FieldDef = serde_json::from_value(json!({"name": "t", "type": "array:string"})).unwrap();
        assert_eq!(def.field_type, FieldType::StringArray);
        let def: FieldDef = serde_json::from_value(json!({"name": "n", "type": "int"})).unwrap();
        assert_eq!(def.field_type, FieldType::Number);
    }
}
