//! JSON-safe rendering of snapshot values
//!
//! Rules:
//! - integers outside ±(2^53 - 1) become decimal strings
//! - non-finite floats become `"NaN"`, `"Infinity"` or `"-Infinity"`
//! - binary buffers become base64 text
//! - maps with non-string keys become `{"__type": "Map", "entries": [[k, v], ...]}`
//! - record fields named like a stringified object (`"[object ..."`) are dropped
//! - sequences are normalized element-wise, then optionally compacted (see
//!   [`Normalizer::compact_sequences`])

use crate::value::SnapshotValue;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Number, Value};

/// Largest integer magnitude a JSON consumer can hold in a double without loss
pub const MAX_SAFE_INTEGER: i128 = (1 << 53) - 1;

/// Key carrying the type tag of a rendered map
pub const MAP_TAG_KEY: &str = "__type";

/// Record keys left behind by a decoder that stringified object keys
const OBJECT_PLACEHOLDER_PREFIX: &str = "[object ";

/// Configurable normalizer
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    compact_sequences: bool,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            compact_sequences: true,
        }
    }
}

impl Normalizer {
    /// Normalizer with the default rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle the sequence compaction pass.
    ///
    /// When enabled, a text element that directly follows an object and is
    /// itself followed by another element is read as a `key, value` pair and
    /// folded into that object. Some producers flatten mixed-key records into
    /// sequences this way; the pass undoes it. Enabled by default.
    pub fn compact_sequences(mut self, enabled: bool) -> Self {
        self.compact_sequences = enabled;
        self
    }

    /// Render a value as JSON without losing integer precision
    pub fn normalize(&self, value: &SnapshotValue) -> Value {
        match value {
            SnapshotValue::Nil => Value::Null,
            SnapshotValue::Boolean(v) => Value::Bool(*v),
            SnapshotValue::Integer(v) => normalize_integer(*v),
            SnapshotValue::Float(v) => normalize_float(*v),
            SnapshotValue::Text(v) => Value::String(v.clone()),
            SnapshotValue::Binary(bytes) => Value::String(STANDARD.encode(bytes)),
            SnapshotValue::Sequence(items) => {
                let items: Vec<Value> = items.iter().map(|item| self.normalize(item)).collect();
                if self.compact_sequences {
                    Value::Array(compact(items))
                } else {
                    Value::Array(items)
                }
            }
            SnapshotValue::Mapping(entries) => {
                let entries = entries
                    .iter()
                    .map(|(key, value)| Value::Array(vec![self.normalize(key), self.normalize(value)]))
                    .collect();
                let mut tagged = Map::new();
                tagged.insert(MAP_TAG_KEY.to_string(), Value::String("Map".into()));
                tagged.insert("entries".to_string(), Value::Array(entries));
                Value::Object(tagged)
            }
            SnapshotValue::Record(fields) => {
                let mut object = Map::new();
                for (key, value) in fields {
                    if key.starts_with(OBJECT_PLACEHOLDER_PREFIX) {
                        continue;
                    }
                    object.insert(key.clone(), self.normalize(value));
                }
                Value::Object(object)
            }
        }
    }
}

/// Normalize with the default rules
pub fn normalize(value: &SnapshotValue) -> Value {
    Normalizer::default().normalize(value)
}

fn normalize_integer(v: i128) -> Value {
    if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&v) {
        // In range, so the cast is exact
        Value::Number(Number::from(v as i64))
    } else {
        Value::String(v.to_string())
    }
}

fn normalize_float(v: f64) -> Value {
    match Number::from_f64(v) {
        Some(number) => Value::Number(number),
        None if v.is_nan() => Value::String("NaN".into()),
        None if v.is_sign_negative() => Value::String("-Infinity".into()),
        None => Value::String("Infinity".into()),
    }
}

fn compact(items: Vec<Value>) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::with_capacity(items.len());
    let mut iter = items.into_iter().peekable();
    while let Some(item) = iter.next() {
        match item {
            Value::String(key)
                if iter.peek().is_some() && matches!(result.last(), Some(Value::Object(_))) =>
            {
                if let (Some(Value::Object(target)), Some(next)) = (result.last_mut(), iter.next()) {
                    target.insert(key, next);
                }
            }
            other => result.push(other),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fields: Vec<(&str, SnapshotValue)>) -> SnapshotValue {
        SnapshotValue::Record(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn test_record_keeps_field_order() {
        let value = record(vec![
            ("zeta", SnapshotValue::Integer(1)),
            ("alpha", SnapshotValue::Integer(2)),
            ("mid", SnapshotValue::Integer(3)),
        ]);
        let normalized = normalize(&value);
        let keys: Vec<&str> = normalized
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        assert_eq!(
            serde_json::to_string(&normalized).unwrap(),
            r#"{"zeta":1,"alpha":2,"mid":3}"#
        );
    }

    #[test]
    fn test_i64_max_becomes_decimal_string() {
        let value = SnapshotValue::Integer(i64::MAX as i128);
        assert_eq!(normalize(&value), json!("9223372036854775807"));
    }

    #[test]
    fn test_u64_max_becomes_decimal_string() {
        let value = SnapshotValue::Integer(u64::MAX as i128);
        assert_eq!(normalize(&value), json!("18446744073709551615"));
    }

    #[test]
    fn test_safe_integer_boundaries() {
        assert_eq!(
            normalize(&SnapshotValue::Integer(9_007_199_254_740_991)),
            json!(9_007_199_254_740_991_i64)
        );
        assert_eq!(
            normalize(&SnapshotValue::Integer(-9_007_199_254_740_991)),
            json!(-9_007_199_254_740_991_i64)
        );
        assert_eq!(
            normalize(&SnapshotValue::Integer(9_007_199_254_740_992)),
            json!("9007199254740992")
        );
        assert_eq!(
            normalize(&SnapshotValue::Integer(-9_007_199_254_740_992)),
            json!("-9007199254740992")
        );
    }

    #[test]
    fn test_floats() {
        assert_eq!(normalize(&SnapshotValue::Float(1.25)), json!(1.25));
        assert_eq!(normalize(&SnapshotValue::Float(f64::NAN)), json!("NaN"));
        assert_eq!(normalize(&SnapshotValue::Float(f64::INFINITY)), json!("Infinity"));
        assert_eq!(
            normalize(&SnapshotValue::Float(f64::NEG_INFINITY)),
            json!("-Infinity")
        );
    }

    #[test]
    fn test_binary_becomes_base64() {
        let value = SnapshotValue::Binary(vec![0x01, 0x02]);
        assert_eq!(normalize(&value), json!("AQI="));
    }

    #[test]
    fn test_mapping_with_non_string_key_is_tagged() {
        let value = SnapshotValue::Mapping(vec![
            (SnapshotValue::Integer(i64::MAX as i128), SnapshotValue::Text("big".into())),
            (SnapshotValue::Integer(1), SnapshotValue::Binary(vec![0xff])),
        ]);
        assert_eq!(
            normalize(&value),
            json!({
                "__type": "Map",
                "entries": [
                    ["9223372036854775807", "big"],
                    [1, "/w=="]
                ]
            })
        );
    }

    #[test]
    fn test_record_drops_placeholder_keys() {
        let value = record(vec![
            ("id", SnapshotValue::Integer(4)),
            ("[object Object]", SnapshotValue::Text("lost".into())),
            ("name", SnapshotValue::Text("Central".into())),
        ]);
        assert_eq!(normalize(&value), json!({"id": 4, "name": "Central"}));
    }

    #[test]
    fn test_compaction_folds_key_value_after_object() {
        let value = SnapshotValue::Sequence(vec![
            record(vec![("a", SnapshotValue::Integer(1))]),
            SnapshotValue::Text("b".into()),
            SnapshotValue::Integer(2),
            SnapshotValue::Text("c".into()),
        ]);
        // Trailing "c" has no value after it and stays an element
        assert_eq!(normalize(&value), json!([{"a": 1, "b": 2}, "c"]));
    }

    #[test]
    fn test_compaction_leaves_plain_string_lists_alone() {
        let value = SnapshotValue::Sequence(vec![
            SnapshotValue::Text("x".into()),
            SnapshotValue::Text("y".into()),
            SnapshotValue::Text("z".into()),
        ]);
        assert_eq!(normalize(&value), json!(["x", "y", "z"]));
    }

    #[test]
    fn test_compaction_can_be_disabled() {
        let value = SnapshotValue::Sequence(vec![
            record(vec![("a", SnapshotValue::Integer(1))]),
            SnapshotValue::Text("b".into()),
            SnapshotValue::Integer(2),
        ]);
        let normalizer = Normalizer::new().compact_sequences(false);
        assert_eq!(normalizer.normalize(&value), json!([{"a": 1}, "b", 2]));
    }

    #[test]
    fn test_nested_values_are_normalized_recursively() {
        let value = record(vec![(
            "stations",
            SnapshotValue::Sequence(vec![record(vec![
                ("id", SnapshotValue::Integer(-7_000_000_000_000_000_000)),
                ("blob", SnapshotValue::Binary(vec![0x01, 0x02])),
                ("closed", SnapshotValue::Nil),
            ])]),
        )]);
        assert_eq!(
            normalize(&value),
            json!({
                "stations": [{
                    "id": "-7000000000000000000",
                    "blob": "AQI=",
                    "closed": null
                }]
            })
        );
    }
}
