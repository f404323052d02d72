//! Row and value model shared by filters, updates, entities and drivers
//!
//! A row is an ordered map from field name to [`Value`]. Entities are typed
//! structs that convert to and from rows; drivers only ever see rows.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MapperError, Result};

/// A single stored row: field name to value
pub type Row = BTreeMap<String, Value>;

/// Prefix marking a string field that carries a JSON payload
pub const JSON_TEXT_PREFIX: char = '~';

/// Tagged field value
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    List(Vec<Value>),
    Map(Row),
}

/// Numeric amount used by increments
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Add this amount to a stored value. A null value counts as zero.
    pub fn apply_to(self, current: &Value) -> std::result::Result<Value, String> {
        match (current, self) {
            (Value::Null, Number::Int(delta)) => Ok(Value::Int(delta)),
            (Value::Null, Number::Float(delta)) => Ok(Value::Float(delta)),
            (Value::Int(base), Number::Int(delta)) => base
                .checked_add(delta)
                .map(Value::Int)
                .ok_or_else(|| format!("{base} + {delta} overflows")),
            (Value::Int(base), Number::Float(delta)) => Ok(Value::Float(*base as f64 + delta)),
            (Value::Float(base), delta) => Ok(Value::Float(base + delta.as_f64())),
            (other, _) => Err(format!("cannot increment a {} value", other.type_name())),
        }
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::Int(value)
    }
}

impl From<i32> for Number {
    fn from(value: i32) -> Self {
        Number::Int(value.into())
    }
}

impl From<u32> for Number {
    fn from(value: u32) -> Self {
        Number::Int(value.into())
    }
}

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        Number::Float(value)
    }
}

impl From<f32> for Number {
    fn from(value: f32) -> Self {
        Number::Float(value.into())
    }
}

impl From<Number> for Value {
    fn from(value: Number) -> Self {
        match value {
            Number::Int(i) => Value::Int(i),
            Number::Float(f) => Value::Float(f),
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    /// Order two values of the same kind. Ints and floats compare numerically;
    /// values of unrelated kinds are unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Convert to a JSON document. Dates render as RFC 3339 strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Date(d) => serde_json::Value::String(d.to_rfc3339()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(row) => row_to_json(row),
        }
    }

    /// Parse text holding a JSON payload, honouring the `~` prefix convention
    pub fn parse_json_text(text: &str) -> Result<Value> {
        let payload = text.strip_prefix(JSON_TEXT_PREFIX).unwrap_or(text);
        let json: serde_json::Value = serde_json::from_str(payload)?;
        Ok(Value::from(json))
    }
}

/// Structural equality over the value tree.
///
/// Scalars compare by value (ints and floats numerically), dates by instant,
/// lists positionally, and maps by key set and per-key equality.
pub fn deep_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => a.as_f64() == b.as_f64(),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| deep_equals(l, r))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, l)| y.get(key).is_some_and(|r| deep_equals(l, r)))
        }
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        deep_equals(self, other)
    }
}

/// Fields of `current` whose value differs from `original`.
///
/// A field missing from `original` counts as changed unless it is null.
pub fn diff_rows(original: &Row, current: &Row) -> Row {
    current
        .iter()
        .filter(|(field, value)| match original.get(*field) {
            Some(before) => !deep_equals(before, value),
            None => !value.is_null(),
        })
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}

pub fn row_to_json(row: &Row) -> serde_json::Value {
    serde_json::Value::Object(row.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}

/// Convert a JSON object into a row
pub fn row_from_json(json: serde_json::Value) -> Result<Row> {
    match Value::from(json) {
        Value::Map(row) => Ok(row),
        other => Err(MapperError::conversion(format!(
            "expected a JSON object for a row, got {}",
            other.type_name()
        ))),
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i64 => Int,
    i32 => Int,
    u32 => Int,
    f64 => Float,
    f32 => Float,
    String => String,
    DateTime<Utc> => Date,
    Row => Map,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

// ============================================================================
// Coercion from stored values into typed entity fields
// ============================================================================

/// Typed extraction from a [`Value`], with the lenient coercions drivers rely on
/// (numeric and boolean strings, RFC 3339 date strings, JSON text).
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch<T>(expected: &str, value: &Value) -> Result<T> {
    Err(MapperError::conversion(format!(
        "expected {expected}, got {}",
        value.type_name()
    )))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Date(d) => Ok(d.to_rfc3339()),
            other => mismatch("string", other),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| MapperError::conversion(format!("cannot convert '{s}' to integer"))),
            other => mismatch("integer", other),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| MapperError::conversion(format!("{wide} out of range for i32")))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(*i as f64),
            Value::Float(f) => Ok(*f),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| MapperError::conversion(format!("cannot convert '{s}' to number"))),
            other => mismatch("number", other),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(MapperError::conversion(format!("cannot convert '{s}' to boolean"))),
            },
            other => mismatch("boolean", other),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Date(d) => Ok(*d),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| MapperError::conversion(format!("invalid timestamp '{s}': {e}"))),
            Value::Int(millis) => DateTime::from_timestamp_millis(*millis)
                .ok_or_else(|| MapperError::conversion(format!("timestamp {millis} out of range"))),
            other => mismatch("timestamp", other),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Value::parse_json_text(s)?.to_json()),
            other => Ok(other.to_json()),
        }
    }
}

impl FromValue for Row {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Map(row) => Ok(row.clone()),
            Value::String(s) => match Value::parse_json_text(s)? {
                Value::Map(row) => Ok(row),
                other => mismatch("map", &other),
            },
            other => mismatch("map", other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            Value::String(s) => match Value::parse_json_text(s)? {
                Value::List(items) => items.iter().map(T::from_value).collect(),
                other => mismatch("list", &other),
            },
            other => mismatch("list", other),
        }
    }
}

/// Read a typed field from a row. A missing field reads as null.
pub fn field<T: FromValue>(row: &Row, name: &str) -> Result<T> {
    let value = row.get(name).unwrap_or(&Value::Null);
    T::from_value(value).map_err(|e| match e {
        MapperError::Conversion(msg) => MapperError::conversion(format!("field '{name}': {msg}")),
        other => other,
    })
}
