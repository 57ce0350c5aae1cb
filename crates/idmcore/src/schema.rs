//! Structural validation of entity attributes.
//!
//! The core depends only on [`SchemaValidator`]. [`SchemaRegistry`] is the
//! built-in implementation over declarative schemas using a small subset of
//! JSON Schema:
//!
//! | Keyword                | Meaning                                         |
//! |------------------------|-------------------------------------------------|
//! | `type`                 | `object`, `string`, `number`, `integer`, `boolean`, `array`, `null` |
//! | `properties`           | per-key sub-schemas                             |
//! | `required`             | keys that must be present                       |
//! | `additionalProperties` | `false` rejects keys not in `properties`        |
//! | `items`                | sub-schema for every array element              |
//!
//! Types without a schema accept any attributes.

use std::collections::BTreeMap;
use std::fmt;

use idmcore_types::{Attributes, EntityType};
use serde::Deserialize;
use serde_json::Value;

/// One schema violation, located by dotted path (`""` for the root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Validates the attribute map of an entity of a given type.
pub trait SchemaValidator: Send + Sync {
    fn validate(
        &self,
        entity_type: &EntityType,
        attributes: &Attributes,
    ) -> Result<(), Vec<SchemaViolation>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Object,
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Null,
}

impl SchemaType {
    fn admits(self, value: &Value) -> bool {
        match self {
            SchemaType::Object => value.is_object(),
            SchemaType::String => value.is_string(),
            SchemaType::Number => value.is_number(),
            SchemaType::Integer => value.is_i64() || value.is_u64(),
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Array => value.is_array(),
            SchemaType::Null => value.is_null(),
        }
    }
}

/// A parsed structural schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Schema {
    #[serde(rename = "type")]
    pub kind: Option<SchemaType>,
    pub properties: BTreeMap<String, Schema>,
    pub required: Vec<String>,
    #[serde(
        rename = "additionalProperties",
        alias = "additional_properties",
        alias = "additionalproperties"
    )]
    pub additional_properties: Option<bool>,
    pub items: Option<Box<Schema>>,
}

impl Schema {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Schema::deserialize(value)
    }

    fn check(&self, value: &Value, path: &str, out: &mut Vec<SchemaViolation>) {
        if let Some(kind) = self.kind {
            if !kind.admits(value) {
                out.push(SchemaViolation {
                    path: path.to_string(),
                    message: format!("expected {kind:?}").to_lowercase(),
                });
                return;
            }
        }
        match value {
            Value::Object(map) => self.check_object(map, path, out),
            Value::Array(items) => {
                if let Some(schema) = &self.items {
                    for (i, item) in items.iter().enumerate() {
                        schema.check(item, &join(path, &i.to_string()), out);
                    }
                }
            }
            _ => {}
        }
    }

    fn check_object(&self, map: &Attributes, path: &str, out: &mut Vec<SchemaViolation>) {
        for key in &self.required {
            if !map.contains_key(key) {
                out.push(SchemaViolation {
                    path: join(path, key),
                    message: "required attribute missing".to_string(),
                });
            }
        }
        for (key, value) in map {
            match self.properties.get(key) {
                Some(schema) => schema.check(value, &join(path, key), out),
                None if self.additional_properties == Some(false) => out.push(SchemaViolation {
                    path: join(path, key),
                    message: "attribute not allowed".to_string(),
                }),
                None => {}
            }
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Schemas keyed by entity type.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<EntityType, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, entity_type: impl Into<EntityType>, schema: Schema) -> Self {
        self.schemas.insert(entity_type.into(), schema);
        self
    }

    /// Builds a registry from declarative schemas keyed by type name (with
    /// or without the leading `/`).
    pub fn from_values(values: &BTreeMap<String, Value>) -> Result<Self, SchemaViolation> {
        let mut registry = Self::new();
        for (entity_type, value) in values {
            let schema = Schema::from_value(value).map_err(|e| SchemaViolation {
                path: entity_type.clone(),
                message: format!("invalid schema: {e}"),
            })?;
            registry = registry.with_schema(entity_type.as_str(), schema);
        }
        Ok(registry)
    }

    pub fn contains(&self, entity_type: &EntityType) -> bool {
        self.schemas.contains_key(entity_type)
    }
}

impl SchemaValidator for SchemaRegistry {
    fn validate(
        &self,
        entity_type: &EntityType,
        attributes: &Attributes,
    ) -> Result<(), Vec<SchemaViolation>> {
        let Some(schema) = self.schemas.get(entity_type) else {
            return Ok(());
        };
        let mut violations = Vec::new();
        schema.check_object(attributes, "", &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}
