//! Argument extraction helpers shared by the tool modules.

use serde_json::{Map, Value};

use super::ToolError;

fn lookup<'a>(args: &'a Value, key: &str) -> Option<&'a Value> {
    args.get(key).filter(|v| !v.is_null())
}

/// Required non-empty string parameter
pub fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    match lookup(args, key) {
        None => Err(ToolError::MissingParam(key.to_string())),
        Some(value) => match value.as_str() {
            Some("") => Err(ToolError::MissingParam(key.to_string())),
            Some(s) => Ok(s),
            None => Err(ToolError::InvalidParams(format!(
                "Parameter '{key}' must be a string"
            ))),
        },
    }
}

pub fn optional_str<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>, ToolError> {
    match lookup(args, key) {
        None => Ok(None),
        Some(value) => value.as_str().map(Some).ok_or_else(|| {
            ToolError::InvalidParams(format!("Parameter '{key}' must be a string"))
        }),
    }
}

pub fn require_bool(args: &Value, key: &str) -> Result<bool, ToolError> {
    lookup(args, key)
        .ok_or_else(|| ToolError::MissingParam(key.to_string()))?
        .as_bool()
        .ok_or_else(|| ToolError::InvalidParams(format!("Parameter '{key}' must be a boolean")))
}

pub fn optional_bool(args: &Value, key: &str, default: bool) -> Result<bool, ToolError> {
    match lookup(args, key) {
        None => Ok(default),
        Some(_) => require_bool(args, key),
    }
}

/// Required non-negative integer, accepting integral floats such as `1.0`
pub fn require_index(args: &Value, key: &str) -> Result<usize, ToolError> {
    let value = lookup(args, key).ok_or_else(|| ToolError::MissingParam(key.to_string()))?;
    let index = value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| *f >= 0.0 && f.fract() == 0.0)
            .map(|f| f as u64)
    });
    index
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| {
            ToolError::InvalidParams(format!("Parameter '{key}' must be a non-negative integer"))
        })
}

pub fn optional_f64(args: &Value, key: &str, default: f64) -> Result<f64, ToolError> {
    match lookup(args, key) {
        None => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| ToolError::InvalidParams(format!("Parameter '{key}' must be a number"))),
    }
}

pub fn optional_u64(args: &Value, key: &str, default: u64) -> Result<u64, ToolError> {
    match lookup(args, key) {
        None => Ok(default),
        Some(_) => require_index(args, key).map(|i| i as u64),
    }
}

/// Required `[x, y]` pair of numbers
pub fn require_position(args: &Value, key: &str) -> Result<[f64; 2], ToolError> {
    let value = lookup(args, key).ok_or_else(|| ToolError::MissingParam(key.to_string()))?;
    match value.as_array().map(Vec::as_slice) {
        Some([x, y]) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => Ok([x, y]),
            _ => Err(invalid_position(key)),
        },
        _ => Err(invalid_position(key)),
    }
}

fn invalid_position(key: &str) -> ToolError {
    ToolError::InvalidParams(format!("Parameter '{key}' must be an array of two numbers"))
}

pub fn optional_array(args: &Value, key: &str) -> Result<Vec<Value>, ToolError> {
    match lookup(args, key) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(ToolError::InvalidParams(format!(
            "Parameter '{key}' must be an array"
        ))),
    }
}

pub fn optional_object(args: &Value, key: &str) -> Result<Map<String, Value>, ToolError> {
    match lookup(args, key) {
        None => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(ToolError::InvalidParams(format!(
            "Parameter '{key}' must be an object"
        ))),
    }
}

/// Required parameter of any JSON type
pub fn require_value(args: &Value, key: &str) -> Result<Value, ToolError> {
    lookup(args, key)
        .cloned()
        .ok_or_else(|| ToolError::MissingParam(key.to_string()))
}
