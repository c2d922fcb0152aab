//! Declarative JSON schemas for plugin settings and operation inputs.
//!
//! A [`Schema`] is plain data carried in plugin metadata. Before use it is
//! compiled into a [`CompiledSchema`] once, so pattern constraints are parsed
//! a single time and malformed schemas are rejected up front.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// JSON value types a property may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    /// UTF-8 string
    String,
    /// Any JSON number
    Number,
    /// Whole number
    Integer,
    /// `true` / `false`
    Boolean,
    /// JSON array
    Array,
    /// JSON object
    Object,
}

impl PropertyType {
    /// Check whether a JSON value has this type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => {
                value.is_i64() || value.is_u64() || value.as_f64().map_or(false, |n| n.fract() == 0.0)
            }
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// Constraints for a single property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// Expected JSON type
    #[serde(rename = "type")]
    pub kind: PropertyType,

    /// Default value seeded into fresh configurations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Inclusive lower bound for numbers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    /// Inclusive upper bound for numbers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    /// Minimum length for strings and arrays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    /// Maximum length for strings and arrays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    /// Regex that string values must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Allowed values
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl PropertySchema {
    /// Create an unconstrained property of the given type.
    pub fn new(kind: PropertyType) -> Self {
        Self {
            kind,
            default: None,
            description: None,
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
            pattern: None,
            enum_values: None,
        }
    }

    /// Set the default value.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Set numeric bounds.
    pub fn with_range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    /// Set length bounds.
    pub fn with_length(mut self, min_length: Option<usize>, max_length: Option<usize>) -> Self {
        self.min_length = min_length;
        self.max_length = max_length;
        self
    }

    /// Set the string pattern.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Restrict to an enumerated set.
    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// Object schema: named properties plus required keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Property constraints by key
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,

    /// Keys that must be present
    #[serde(default)]
    pub required: Vec<String>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property.
    pub fn property(mut self, name: impl Into<String>, property: PropertySchema) -> Self {
        self.properties.insert(name.into(), property);
        self
    }

    /// Mark a key as required.
    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Check if the schema declares nothing.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.required.is_empty()
    }

    /// Collect the declared default values.
    pub fn defaults(&self) -> Map<String, Value> {
        self.properties
            .iter()
            .filter_map(|(key, property)| property.default.clone().map(|value| (key.clone(), value)))
            .collect()
    }

    /// Compile pattern constraints.
    ///
    /// # Errors
    /// Returns [`SchemaError`] for the first pattern that is not a valid regex.
    pub fn compile(&self) -> Result<CompiledSchema, SchemaError> {
        let mut patterns = HashMap::new();
        for (key, property) in &self.properties {
            if let Some(pattern) = &property.pattern {
                let regex = Regex::new(pattern).map_err(|e| SchemaError {
                    property: key.clone(),
                    reason: format!("invalid pattern: {e}"),
                })?;
                patterns.insert(key.clone(), regex);
            }
        }

        Ok(CompiledSchema {
            schema: self.clone(),
            patterns,
        })
    }
}

/// Schema definition error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid schema for property {property}: {reason}")]
pub struct SchemaError {
    /// Offending property
    pub property: String,
    /// Failure reason
    pub reason: String,
}

/// A schema with its patterns compiled, ready for repeated validation.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    schema: Schema,
    patterns: HashMap<String, Regex>,
}

impl CompiledSchema {
    /// Get the source schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Validate an object against every constraint.
    ///
    /// All violations are collected; the result is `Ok` only when there are none.
    pub fn validate(&self, values: &Map<String, Value>) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();

        for key in &self.schema.required {
            if values.get(key).map_or(true, Value::is_null) {
                violations.push(format!("{key}: required field is missing"));
            }
        }

        for (key, property) in &self.schema.properties {
            let Some(value) = values.get(key) else { continue };
            if value.is_null() {
                continue;
            }
            self.check_property(key, property, value, &mut violations);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Validate an arbitrary JSON value, which must be an object when the
    /// schema declares anything.
    pub fn validate_value(&self, value: &Value) -> Result<(), Vec<String>> {
        match value {
            Value::Object(map) => self.validate(map),
            _ if self.schema.is_empty() => Ok(()),
            other => Err(vec![format!("input: expected object, got {}", json_type_name(other))]),
        }
    }

    fn check_property(
        &self,
        key: &str,
        property: &PropertySchema,
        value: &Value,
        violations: &mut Vec<String>,
    ) {
        if !property.kind.matches(value) {
            violations.push(format!(
                "{key}: expected {}, got {}",
                property.kind,
                json_type_name(value)
            ));
            return;
        }

        if let Some(number) = value.as_f64() {
            if let Some(minimum) = property.minimum {
                if number < minimum {
                    violations.push(format!("{key}: {number} is below minimum {minimum}"));
                }
            }
            if let Some(maximum) = property.maximum {
                if number > maximum {
                    violations.push(format!("{key}: {number} is above maximum {maximum}"));
                }
            }
        }

        let length = match value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            _ => None,
        };
        if let Some(length) = length {
            if let Some(min_length) = property.min_length {
                if length < min_length {
                    violations.push(format!("{key}: length {length} is below minimum {min_length}"));
                }
            }
            if let Some(max_length) = property.max_length {
                if length > max_length {
                    violations.push(format!("{key}: length {length} is above maximum {max_length}"));
                }
            }
        }

        if let (Some(regex), Value::String(s)) = (self.patterns.get(key), value) {
            if !regex.is_match(s) {
                violations.push(format!("{key}: does not match pattern {}", regex.as_str()));
            }
        }

        if let Some(allowed) = &property.enum_values {
            if !allowed.contains(value) {
                violations.push(format!("{key}: value is not one of the allowed values"));
            }
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
