use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A dynamically-typed attribute value, mirroring OTLP's `AnyValue` union.
///
/// A single `extract_value` walks the raw OTLP JSON shape
/// (`{stringValue|intValue|boolValue|doubleValue|arrayValue|kvlistValue}`)
/// and produces one of these variants; everything downstream matches on the
/// sum instead of re-parsing JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<Value>),
    Map(HashMap<String, Value>),
    Null,
}

impl Value {
    /// Render as a plain string, the representation stored in the flat
    /// `span_attributes`/`resource_attributes`/`scope_attributes` maps.
    pub fn as_flat_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            Value::Array(_) | Value::Map(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(i) => u64::try_from(*i).ok(),
            Value::Float(f) if *f >= 0.0 => Some(*f as u64),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Raw OTLP `AnyValue`, deserialized straight from the JSON transport shape.
/// Keeping this separate from [`Value`] lets the wire format and the
/// canonical in-memory sum evolve independently.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAnyValue {
    #[serde(rename = "stringValue", default)]
    pub string_value: Option<String>,
    #[serde(rename = "intValue", default)]
    pub int_value: Option<IntOrString>,
    #[serde(rename = "boolValue", default)]
    pub bool_value: Option<bool>,
    #[serde(rename = "doubleValue", default)]
    pub double_value: Option<f64>,
    #[serde(rename = "arrayValue", default)]
    pub array_value: Option<RawArrayValue>,
    #[serde(rename = "kvlistValue", default)]
    pub kvlist_value: Option<RawKvList>,
    #[serde(rename = "bytesValue", default)]
    pub bytes_value: Option<String>,
}

/// OTLP's protobuf `int64` fields are transported as either a JSON number or
/// a JSON string (to survive 64-bit precision loss in JS clients); accept
/// both.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IntOrString {
    Int(i64),
    Str(String),
}

impl IntOrString {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            IntOrString::Int(i) => Some(*i),
            IntOrString::Str(s) => s.parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawArrayValue {
    #[serde(default)]
    pub values: Vec<RawAnyValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawKvList {
    #[serde(default)]
    pub values: Vec<RawKeyValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawKeyValue {
    pub key: String,
    pub value: Option<RawAnyValue>,
}

/// Walk a raw OTLP `AnyValue` into the canonical tagged sum.
pub fn extract_value(raw: &RawAnyValue) -> Value {
    if let Some(s) = &raw.string_value {
        return Value::String(s.clone());
    }
    if let Some(i) = &raw.int_value {
        return match i.as_i64() {
            Some(v) => Value::Int(v),
            None => Value::Null,
        };
    }
    if let Some(b) = raw.bool_value {
        return Value::Bool(b);
    }
    if let Some(d) = raw.double_value {
        return Value::Float(d);
    }
    if let Some(arr) = &raw.array_value {
        return Value::Array(arr.values.iter().map(extract_value).collect());
    }
    if let Some(kv) = &raw.kvlist_value {
        let map = kv
            .values
            .iter()
            .filter_map(|e| e.value.as_ref().map(|v| (e.key.clone(), extract_value(v))))
            .collect();
        return Value::Map(map);
    }
    if let Some(b) = &raw.bytes_value {
        return Value::String(b.clone());
    }
    Value::Null
}

/// Flatten a raw OTLP `KeyValue` list into a `String -> String` attribute
/// map, the shape the canonical [`Span`](crate::model::span::Span) stores.
/// A `BTreeMap` keeps key order deterministic for tests and SQL generation.
pub fn extract_attributes(attrs: &[RawKeyValue]) -> BTreeMap<String, String> {
    attrs
        .iter()
        .filter_map(|kv| kv.value.as_ref().map(|v| (kv.key.clone(), extract_value(v).as_flat_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_value_passthrough() {
        let raw = RawAnyValue {
            string_value: Some("hello".into()),
            int_value: None,
            bool_value: None,
            double_value: None,
            array_value: None,
            kvlist_value: None,
            bytes_value: None,
        };
        assert_eq!(extract_value(&raw), Value::String("hello".into()));
    }

    #[test]
    fn int_value_as_string_wire_shape() {
        let raw = RawAnyValue {
            string_value: None,
            int_value: Some(IntOrString::Str("42".into())),
            bool_value: None,
            double_value: None,
            array_value: None,
            kvlist_value: None,
            bytes_value: None,
        };
        assert_eq!(extract_value(&raw), Value::Int(42));
    }

    #[test]
    fn array_value_recurses() {
        let raw = RawAnyValue {
            string_value: None,
            int_value: None,
            bool_value: None,
            double_value: None,
            array_value: Some(RawArrayValue {
                values: vec![
                    RawAnyValue {
                        string_value: Some("a".into()),
                        int_value: None,
                        bool_value: None,
                        double_value: None,
                        array_value: None,
                        kvlist_value: None,
                        bytes_value: None,
                    },
                ],
            }),
            kvlist_value: None,
            bytes_value: None,
        };
        assert_eq!(extract_value(&raw), Value::Array(vec![Value::String("a".into())]));
    }

    #[test]
    fn none_value_is_null() {
        let raw = RawAnyValue {
            string_value: None,
            int_value: None,
            bool_value: None,
            double_value: None,
            array_value: None,
            kvlist_value: None,
            bytes_value: None,
        };
        assert_eq!(extract_value(&raw), Value::Null);
    }

    #[test]
    fn flat_string_renders_array_as_json() {
        let v = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(v.as_flat_string(), "[1,2]");
    }
}
