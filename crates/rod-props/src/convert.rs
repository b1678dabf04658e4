//! Conversions between property trees, TOML and JSON values.

use serde_json::{Map, Number};

use crate::{Props, PropsError, Result, Value};

/// Parses a TOML document into a property tree.
pub fn from_toml_str(raw: &str) -> Result<Props> {
    let table: toml::Table = raw
        .parse()
        .map_err(|err: toml::de::Error| PropsError::Toml(err.to_string()))?;
    let mut props = Props::new();
    for (key, value) in table {
        props.set(&key, from_toml_value(value))?;
    }
    Ok(props)
}

fn from_toml_value(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::Str(s),
        toml::Value::Integer(i) => Value::Number(i as f64),
        toml::Value::Float(x) => Value::Number(x),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(d) => Value::Str(d.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(from_toml_value).collect()),
        toml::Value::Table(table) => {
            let mut props = Props::new();
            for (key, value) in table {
                // keys of a TOML table are literal, never dotted paths
                props.entries.insert(key, from_toml_value(value));
            }
            Value::Table(props)
        }
    }
}

/// Converts a property tree into a JSON object so typed configuration can be
/// deserialized with serde. Integral numbers become JSON integers.
pub fn to_json(props: &Props) -> serde_json::Value {
    let mut map = Map::new();
    for (key, value) in props.iter() {
        map.insert(key.clone(), value_to_json(value));
    }
    serde_json::Value::Object(map)
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(x) => number_to_json(*x),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Table(props) => to_json(props),
    }
}

fn number_to_json(x: f64) -> serde_json::Value {
    if x.fract() == 0.0 && x.abs() < 9.0e15 {
        return serde_json::Value::Number(Number::from(x as i64));
    }
    Number::from_f64(x).map_or(serde_json::Value::Null, serde_json::Value::Number)
}
