//! Structural comparison of prompt templates
//!
//! Templates are compared as plain semi-structured values: map entries are
//! matched by key regardless of order, list elements are matched by position.

use serde_json::Value;
use std::collections::BTreeMap;

/// Semi-structured value a template is made of
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<TemplateValue>),
    Map(BTreeMap<String, TemplateValue>),
}

impl From<&Value> for TemplateValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            // Every JSON number fits f64, possibly with rounding
            Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from).collect()),
            Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(key, value)| (key.clone(), Self::from(value)))
                    .collect(),
            ),
        }
    }
}

/// Deep structural equality.
///
/// Numbers compare by value (`1` equals `1.0`); maps must hold the same key
/// set with equal values; lists must have equal length and equal elements in
/// the same order.
pub fn deep_equal(a: &TemplateValue, b: &TemplateValue) -> bool {
    use TemplateValue::*;

    match (a, b) {
        (Null, Null) => true,
        (Bool(x), Bool(y)) => x == y,
        (Number(x), Number(y)) => x == y,
        (String(x), String(y)) => x == y,
        (List(xs), List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
        (Map(xs), Map(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| deep_equal(x, y)))
        }
        _ => false,
    }
}

/// Whether two JSON templates differ structurally
pub fn templates_differ(stored: &Value, incoming: &Value) -> bool {
    !deep_equal(&TemplateValue::from(stored), &TemplateValue::from(incoming))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eq(a: Value, b: Value) -> bool {
        deep_equal(&TemplateValue::from(&a), &TemplateValue::from(&b))
    }

    #[test]
    fn test_map_key_order_is_ignored() {
        let a: Value = serde_json::from_str(r#"{"model": "gpt-4", "temperature": 0.2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"temperature": 0.2, "model": "gpt-4"}"#).unwrap();
        assert!(eq(a, b));
    }

    #[test]
    fn test_list_order_matters() {
        assert!(!eq(json!(["a", "b"]), json!(["b", "a"])));
        assert!(!eq(json!(["a"]), json!(["a", "a"])));
    }

    #[test]
    fn test_nested_difference_is_found() {
        let a = json!({"messages": [{"role": "user", "content": "Hi <helicone-prompt-input key=\"name\" />"}]});
        let b = json!({"messages": [{"role": "user", "content": "Hello <helicone-prompt-input key=\"name\" />"}]});
        assert!(!eq(a.clone(), b));
        assert!(eq(a.clone(), a));
    }

    #[test]
    fn test_extra_or_missing_keys_differ() {
        assert!(!eq(json!({"a": 1}), json!({"a": 1, "b": null})));
        assert!(!eq(json!({"a": 1, "b": 2}), json!({"a": 1, "c": 2})));
    }

    #[test]
    fn test_numbers_compare_by_value() {
        assert!(eq(json!(1), json!(1.0)));
        assert!(!eq(json!(1), json!("1")));
        assert!(!eq(json!(null), json!(false)));
    }

    #[test]
    fn test_templates_differ() {
        assert!(templates_differ(&json!({"v": 1}), &json!({"v": 2})));
        assert!(!templates_differ(&json!({"v": [1, {"x": true}]}), &json!({"v": [1, {"x": true}]})));
    }
}
