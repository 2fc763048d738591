//! Conversions between DynamoDB's `AttributeValue` wire shapes and native
//! Rust types. DynamoDB's `N` type is a decimal string regardless of
//! whether the logical value is an integer or a float; every helper here
//! round-trips it losslessly.

use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::Value;

use crate::errors::DbError;

pub fn s(v: impl Into<String>) -> AttributeValue {
    AttributeValue::S(v.into())
}

pub fn n(v: impl std::fmt::Display) -> AttributeValue {
    AttributeValue::N(v.to_string())
}

pub fn get_s(item: &HashMap<String, AttributeValue>, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).cloned()
}

pub fn get_n_i64(item: &HashMap<String, AttributeValue>, key: &str) -> Option<i64> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse().ok())
}

pub fn get_n_u64(item: &HashMap<String, AttributeValue>, key: &str) -> Option<u64> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse().ok())
}

pub fn get_n_f64(item: &HashMap<String, AttributeValue>, key: &str) -> Option<f64> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse().ok())
}

/// Converts an arbitrary `serde_json::Value` into DynamoDB's nested
/// attribute-value shape, preserving maps and lists structurally without
/// enforcing any schema on the payload.
pub fn json_to_av(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(num) => AttributeValue::N(num.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(json_to_av).collect()),
        Value::Object(map) => {
            let mut converted = HashMap::new();
            for (k, v) in map {
                converted.insert(k.clone(), json_to_av(v));
            }
            AttributeValue::M(converted)
        }
    }
}

/// Inverse of [`json_to_av`], used when reading `openai_usage` back.
pub fn av_to_json(value: &AttributeValue) -> Result<Value, DbError> {
    match value {
        AttributeValue::Null(_) => Ok(Value::Null),
        AttributeValue::Bool(b) => Ok(Value::Bool(*b)),
        AttributeValue::S(s) => Ok(Value::String(s.clone())),
        AttributeValue::N(n) => serde_json::Number::from_str_radix_checked(n)
            .map(Value::Number)
            .map_err(|_| DbError::Mapping(format!("non-numeric N attribute: {n}"))),
        AttributeValue::L(items) => {
            let converted: Result<Vec<Value>, DbError> = items.iter().map(av_to_json).collect();
            Ok(Value::Array(converted?))
        }
        AttributeValue::M(map) => {
            let mut converted = serde_json::Map::new();
            for (k, v) in map {
                converted.insert(k.clone(), av_to_json(v)?);
            }
            Ok(Value::Object(converted))
        }
        other => Err(DbError::Mapping(format!("unsupported attribute value: {other:?}"))),
    }
}

trait NumberFromStrChecked {
    fn from_str_radix_checked(s: &str) -> Result<serde_json::Number, ()>;
}

impl NumberFromStrChecked for serde_json::Number {
    fn from_str_radix_checked(s: &str) -> Result<serde_json::Number, ()> {
        if let Ok(i) = s.parse::<i64>() {
            return Ok(serde_json::Number::from(i));
        }
        if let Ok(f) = s.parse::<f64>() {
            return serde_json::Number::from_f64(f).ok_or(());
        }
        Err(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nested_usage_payload() {
        let value = serde_json::json!({
            "prompt_tokens": 120,
            "completion_tokens": 45,
            "nested": {"ok": true, "items": [1, 2, 3]},
        });
        let av = json_to_av(&value);
        let back = av_to_json(&av).unwrap();
        assert_eq!(value, back);
    }

    #[test]
    fn preserves_null() {
        assert_eq!(av_to_json(&json_to_av(&Value::Null)).unwrap(), Value::Null);
    }
}
