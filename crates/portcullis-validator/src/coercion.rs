//! Casting raw wire strings into typed JSON values.
//!
//! Query strings, headers and path segments only ever carry text. Before a
//! parameter can be checked against its schema the text is cast into the
//! schema's primitive type, optionally in a lenient mode that tolerates the
//! sloppier spellings some clients send.

use serde_json::{Number, Value};

/// Primitive types a parameter may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    String,
    Number,
    Integer,
    Boolean,
}

impl PrimitiveType {
    /// Map a JSON Schema `type` keyword to a primitive type.
    pub fn from_schema_type(keyword: &str) -> Option<Self> {
        match keyword {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
        }
    }
}

/// Shape of a parameter value: a single primitive or an array of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueShape {
    Primitive(PrimitiveType),
    Array(PrimitiveType),
}

impl ValueShape {
    /// Derive the shape from a parameter schema.
    ///
    /// A missing schema or missing `type` means "string". OpenAPI 3.1 type
    /// lists (`["integer", "null"]`) use their first non-null entry.
    pub fn from_schema(schema: Option<&Value>) -> Result<Self, String> {
        let Some(schema) = schema else {
            return Ok(Self::Primitive(PrimitiveType::String));
        };
        match schema_type(schema) {
            None => Ok(Self::Primitive(PrimitiveType::String)),
            Some("array") => {
                let item_type = schema
                    .get("items")
                    .and_then(schema_type)
                    .unwrap_or("string");
                PrimitiveType::from_schema_type(item_type)
                    .map(Self::Array)
                    .ok_or_else(|| format!("unsupported array item type '{}'", item_type))
            }
            Some(other) => PrimitiveType::from_schema_type(other)
                .map(Self::Primitive)
                .ok_or_else(|| format!("unsupported parameter type '{}'", other)),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }
}

fn schema_type(schema: &Value) -> Option<&str> {
    match schema.get("type")? {
        Value::String(s) => Some(s.as_str()),
        Value::Array(types) => types
            .iter()
            .filter_map(|t| t.as_str())
            .find(|t| *t != "null"),
        _ => None,
    }
}

/// A raw parameter value as extracted from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Single(String),
    /// Repeated query parameter occurrences, in order.
    Multiple(Vec<String>),
}

impl RawValue {
    pub fn single(value: impl Into<String>) -> Self {
        Self::Single(value.into())
    }
}

/// Coercion strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoercionOptions {
    /// In strict mode numbers must use canonical JSON syntax and booleans
    /// must be exactly `true` or `false`.
    pub strict: bool,
}

impl Default for CoercionOptions {
    fn default() -> Self {
        Self { strict: true }
    }
}

impl CoercionOptions {
    pub fn lenient() -> Self {
        Self { strict: false }
    }
}

/// Cast one raw string into `kind`.
pub fn coerce(raw: &str, kind: PrimitiveType, options: CoercionOptions) -> Result<Value, String> {
    match kind {
        PrimitiveType::String => Ok(Value::String(raw.to_string())),
        PrimitiveType::Number => parse_number(raw, options).map(Value::Number),
        PrimitiveType::Integer => {
            let number = parse_number(raw, options)?;
            integral(&number)
                .map(Value::Number)
                .ok_or_else(|| format!("'{}' is not an integer", raw))
        }
        PrimitiveType::Boolean => parse_boolean(raw, options).map(Value::Bool),
    }
}

/// Cast a raw value into `shape`.
///
/// Arrays accept repeated occurrences or a comma separated single value
/// (the `simple` serialization style).
pub fn coerce_shape(raw: &RawValue, shape: ValueShape, options: CoercionOptions) -> Result<Value, String> {
    match (shape, raw) {
        (ValueShape::Primitive(kind), RawValue::Single(value)) => coerce(value, kind, options),
        (ValueShape::Primitive(_), RawValue::Multiple(values)) => Err(format!(
            "expected a single value, got {} occurrences",
            values.len()
        )),
        (ValueShape::Array(kind), RawValue::Single(value)) => {
            if value.is_empty() {
                return Ok(Value::Array(Vec::new()));
            }
            value
                .split(',')
                .map(|item| coerce(item, kind, options))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        (ValueShape::Array(kind), RawValue::Multiple(values)) => values
            .iter()
            .map(|item| coerce(item, kind, options))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
    }
}

/// Render a typed value back into its wire form.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_number(raw: &str, options: CoercionOptions) -> Result<Number, String> {
    if options.strict {
        // serde_json tolerates surrounding whitespace, canonical syntax does not.
        if raw.is_empty() || raw.trim() != raw {
            return Err(format!("'{}' is not a number", raw));
        }
        return serde_json::from_str::<Number>(raw).map_err(|_| format!("'{}' is not a number", raw));
    }

    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if let Ok(n) = trimmed.parse::<i64>() {
        return Ok(Number::from(n));
    }
    if let Ok(n) = trimmed.parse::<u64>() {
        return Ok(Number::from(n));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| format!("'{}' is not a number", raw))
}

fn integral(number: &Number) -> Option<Number> {
    if number.is_i64() || number.is_u64() {
        return Some(number.clone());
    }
    let float = number.as_f64()?;
    if float.fract() != 0.0 {
        return None;
    }
    if float >= i64::MIN as f64 && float <= i64::MAX as f64 {
        Some(Number::from(float as i64))
    } else {
        None
    }
}

fn parse_boolean(raw: &str, options: CoercionOptions) -> Result<bool, String> {
    match raw {
        "true" => return Ok(true),
        "false" => return Ok(false),
        _ => {}
    }
    if !options.strict {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => return Ok(true),
            "false" | "0" => return Ok(false),
            _ => {}
        }
    }
    Err(format!("'{}' is not a boolean", raw))
}
