//! Accessors and a small validator over JSON-schema values.
//!
//! Schemas are kept as raw [`serde_json::Value`]s exactly as the catalog carries
//! them; this module only reads the keywords the engine cares about.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::{Map, Value};

/// Primitive schema type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Null,
    /// No usable type information.
    Any,
}

impl SchemaType {
    pub fn name(&self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Integer => "integer",
            SchemaType::Number => "number",
            SchemaType::Boolean => "boolean",
            SchemaType::Array => "array",
            SchemaType::Object => "object",
            SchemaType::Null => "null",
            SchemaType::Any => "any",
        }
    }

    fn from_name(name: &str) -> Self {
        match name {
            "string" => SchemaType::String,
            "integer" => SchemaType::Integer,
            "number" => SchemaType::Number,
            "boolean" => SchemaType::Boolean,
            "array" => SchemaType::Array,
            "object" => SchemaType::Object,
            "null" => SchemaType::Null,
            _ => SchemaType::Any,
        }
    }

    /// The type a concrete JSON value has.
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Null => SchemaType::Null,
            Value::Bool(_) => SchemaType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => SchemaType::Integer,
            Value::Number(_) => SchemaType::Number,
            Value::String(_) => SchemaType::String,
            Value::Array(_) => SchemaType::Array,
            Value::Object(_) => SchemaType::Object,
        }
    }
}

/// Resolve the declared type of a schema.
///
/// `type` may be a string or an array (`["string", "null"]`); when absent the
/// type is inferred from `properties`, `items` or the first `enum` member.
pub fn schema_type(schema: &Value) -> SchemaType {
    match schema.get("type") {
        Some(Value::String(t)) => SchemaType::from_name(t),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(|t| t.as_str())
            .find(|t| *t != "null")
            .map(SchemaType::from_name)
            .unwrap_or(SchemaType::Null),
        _ => {
            if schema.get("properties").is_some() {
                SchemaType::Object
            } else if schema.get("items").is_some() {
                SchemaType::Array
            } else if let Some(first) = enum_values(schema).and_then(|e| e.first()) {
                SchemaType::of_value(first)
            } else {
                SchemaType::Any
            }
        }
    }
}

/// Static example or default value declared by the schema.
pub fn static_value(schema: &Value) -> Option<&Value> {
    schema
        .get("example")
        .or_else(|| schema.get("default"))
        .or_else(|| {
            schema
                .get("examples")
                .and_then(|e| e.as_array())
                .and_then(|e| e.first())
        })
}

pub fn enum_values(schema: &Value) -> Option<&Vec<Value>> {
    schema.get("enum").and_then(|e| e.as_array())
}

pub fn properties(schema: &Value) -> Option<&Map<String, Value>> {
    schema.get("properties").and_then(|p| p.as_object())
}

pub fn required(schema: &Value) -> BTreeSet<String> {
    schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|r| {
            r.iter()
                .filter_map(|n| n.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

pub fn items(schema: &Value) -> Option<&Value> {
    schema.get("items")
}

pub fn format(schema: &Value) -> Option<&str> {
    schema.get("format").and_then(|f| f.as_str())
}

pub fn pattern(schema: &Value) -> Option<&str> {
    schema.get("pattern").and_then(|f| f.as_str())
}

pub fn is_read_only(schema: &Value) -> bool {
    schema
        .get("readOnly")
        .and_then(|r| r.as_bool())
        .unwrap_or(false)
}

pub fn is_nullable(schema: &Value) -> bool {
    schema
        .get("nullable")
        .and_then(|r| r.as_bool())
        .unwrap_or(false)
        || matches!(schema.get("type"), Some(Value::Array(t)) if t.iter().any(|x| x == "null"))
}

/// Inclusive lower bound, folding `exclusiveMinimum` in both its boolean
/// (OpenAPI 3.0) and numeric (JSON Schema 2019+) forms.
///
/// Exclusive bounds step by 1 for integers and to the adjacent representable
/// float otherwise.
pub fn minimum(schema: &Value) -> Option<f64> {
    let integer = schema_type(schema) == SchemaType::Integer;
    let step_up = |n: f64| if integer { n + 1.0 } else { next_up(n) };
    match (
        schema.get("minimum").and_then(|m| m.as_f64()),
        schema.get("exclusiveMinimum"),
    ) {
        (_, Some(Value::Number(n))) => n.as_f64().map(step_up),
        (Some(min), Some(Value::Bool(true))) => Some(step_up(min)),
        (min, _) => min,
    }
}

/// Inclusive upper bound, see [`minimum`].
pub fn maximum(schema: &Value) -> Option<f64> {
    let integer = schema_type(schema) == SchemaType::Integer;
    let step_down = |n: f64| if integer { n - 1.0 } else { next_down(n) };
    match (
        schema.get("maximum").and_then(|m| m.as_f64()),
        schema.get("exclusiveMaximum"),
    ) {
        (_, Some(Value::Number(n))) => n.as_f64().map(step_down),
        (Some(max), Some(Value::Bool(true))) => Some(step_down(max)),
        (max, _) => max,
    }
}

/// Smallest `f64` strictly greater than `x`.
pub fn next_up(x: f64) -> f64 {
    if x.is_nan() || x == f64::INFINITY {
        return x;
    }
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

/// Largest `f64` strictly less than `x`.
pub fn next_down(x: f64) -> f64 {
    -next_up(-x)
}

pub fn min_length(schema: &Value) -> Option<u64> {
    schema.get("minLength").and_then(|m| m.as_u64())
}

pub fn max_length(schema: &Value) -> Option<u64> {
    schema.get("maxLength").and_then(|m| m.as_u64())
}

pub fn min_items(schema: &Value) -> Option<u64> {
    schema.get("minItems").and_then(|m| m.as_u64())
}

/// A value found outside its declared schema bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaViolation {
    /// Dotted location of the offending value (`body.address.zip`, `query.limit`).
    pub location: String,
    pub reason: String,
}

impl SchemaViolation {
    fn new(location: &str, reason: impl Into<String>) -> Self {
        Self {
            location: location.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SCHEMA_VIOLATION at {}: {}", self.location, self.reason)
    }
}

impl std::error::Error for SchemaViolation {}

/// Whether `value` conforms to a string `format`.
///
/// Checks `date`, `date-time`, `uuid`, `email`, `uri`/`url`, `ipv4` and
/// `int64`/`int32` digit strings. Unknown formats are accepted.
pub fn matches_format(value: &str, format: &str) -> bool {
    match format {
        "date" => chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
        "date-time" => chrono::DateTime::parse_from_rfc3339(value).is_ok(),
        "uuid" => uuid::Uuid::parse_str(value).is_ok(),
        "email" => match value.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !value.chars().any(char::is_whitespace)
            }
            None => false,
        },
        "uri" | "url" => match value.split_once("://") {
            Some((scheme, rest)) => {
                !scheme.is_empty()
                    && scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                    && !rest.is_empty()
                    && !value.chars().any(char::is_whitespace)
            }
            None => false,
        },
        "ipv4" => value.parse::<std::net::Ipv4Addr>().is_ok(),
        "int32" | "int64" => value.parse::<i64>().is_ok(),
        _ => true,
    }
}

/// Check `value` against `schema`.
///
/// Covers the keywords the synthesizer and mutator produce values for: type,
/// enum, numeric bounds, string length and format, required properties and
/// array items.
pub fn validate(value: &Value, schema: &Value, location: &str) -> Result<(), SchemaViolation> {
    if value.is_null() && is_nullable(schema) {
        return Ok(());
    }

    if let Some(members) = enum_values(schema) {
        if !members.contains(value) {
            return Err(SchemaViolation::new(location, "value is not an enum member"));
        }
        return Ok(());
    }

    let declared = schema_type(schema);
    let actual = SchemaType::of_value(value);
    let type_ok = match declared {
        SchemaType::Any => true,
        // integers are valid numbers
        SchemaType::Number => matches!(actual, SchemaType::Number | SchemaType::Integer),
        other => other == actual,
    };
    if !type_ok {
        return Err(SchemaViolation::new(
            location,
            format!("expected {}, got {}", declared.name(), actual.name()),
        ));
    }

    match value {
        Value::Number(n) => {
            let v = n.as_f64().unwrap_or(0.0);
            if let Some(min) = minimum(schema) {
                if v < min {
                    return Err(SchemaViolation::new(location, format!("{v} < minimum {min}")));
                }
            }
            if let Some(max) = maximum(schema) {
                if v > max {
                    return Err(SchemaViolation::new(location, format!("{v} > maximum {max}")));
                }
            }
        }
        Value::String(s) => {
            let len = s.chars().count() as u64;
            if let Some(min) = min_length(schema) {
                if len < min {
                    return Err(SchemaViolation::new(
                        location,
                        format!("length {len} < minLength {min}"),
                    ));
                }
            }
            if let Some(max) = max_length(schema) {
                if len > max {
                    return Err(SchemaViolation::new(
                        location,
                        format!("length {len} > maxLength {max}"),
                    ));
                }
            }
            if let Some(fmt) = format(schema) {
                if !matches_format(s, fmt) {
                    return Err(SchemaViolation::new(
                        location,
                        format!("'{s}' is not a valid {fmt}"),
                    ));
                }
            }
        }
        Value::Array(elements) => {
            if let Some(item_schema) = items(schema) {
                for (i, element) in elements.iter().enumerate() {
                    validate(element, item_schema, &format!("{location}.{i}"))?;
                }
            }
        }
        Value::Object(fields) => {
            for name in required(schema) {
                if !fields.contains_key(&name) {
                    return Err(SchemaViolation::new(
                        location,
                        format!("missing required property '{name}'"),
                    ));
                }
            }
            if let Some(props) = properties(schema) {
                for (name, field) in fields {
                    if let Some(field_schema) = props.get(name) {
                        validate(field, field_schema, &format!("{location}.{name}"))?;
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}
