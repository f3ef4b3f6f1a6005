use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single entity observation: an attribute-keyed mapping.
///
/// Values are JSON-shaped (string, number, boolean, or a list of strings);
/// list-valued fields carry *set* semantics — ordering is never significant
/// and all set comparisons route through [`Record::value_set`]. Records are
/// immutable from the pipeline's point of view; merge strategies build new
/// ones rather than mutating inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Coerce an arbitrary JSON value into a record, returning `None` for
    /// anything that is not an object.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_object().map(|fields| Self { fields: fields.clone() })
    }

    /// Stable identifier, empty when the source collection supplied none.
    pub fn id(&self) -> &str {
        self.fields.get("id").and_then(Value::as_str).unwrap_or("")
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// String form of a field, suitable for the similarity metrics.
    ///
    /// List values are sorted before joining so token-set semantics are
    /// deterministic regardless of source ordering. Missing, null and empty
    /// values all yield the empty string.
    pub fn text(&self, key: &str) -> String {
        match self.fields.get(key) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(Value::Array(items)) => {
                let mut parts: Vec<String> = items
                    .iter()
                    .map(element_text)
                    .filter(|s| !s.is_empty())
                    .collect();
                parts.sort();
                parts.join(" ")
            }
            Some(Value::Object(_)) => String::new(),
        }
    }

    /// The normalizing set accessor: scalars become single-element sets,
    /// lists become sets, missing/null/empty become the empty set. Elements
    /// are trimmed and lowercased so that set comparisons are
    /// case-insensitive.
    pub fn value_set(&self, key: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        match self.fields.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for item in items {
                    let text = element_text(item).to_lowercase();
                    if !text.is_empty() {
                        out.insert(text);
                    }
                }
            }
            Some(other) => {
                let text = element_text(other).to_lowercase();
                if !text.is_empty() {
                    out.insert(text);
                }
            }
        }
        out
    }

    /// Whether the field is absent, null, or holds an empty value.
    pub fn is_empty_field(&self, key: &str) -> bool {
        match self.fields.get(key) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(Value::Array(items)) => items.iter().all(|v| element_text(v).is_empty()),
            Some(Value::Object(map)) => map.is_empty(),
            Some(Value::Number(_)) | Some(Value::Bool(_)) => false,
        }
    }

    /// Number of fields holding a non-empty value. Used by the merge
    /// engine's data-disparity check.
    pub fn populated_field_count(&self) -> usize {
        self.fields.keys().filter(|k| !self.is_empty_field(k)).count()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

fn element_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: Value) -> Record {
        Record::from_value(&value).expect("object")
    }

    #[test]
    fn list_values_compare_as_sets() {
        let a = record(json!({"email": ["j@x.com", "j@y.com"]}));
        let b = record(json!({"email": "j@x.com"}));
        let set_a = a.value_set("email");
        let set_b = b.value_set("email");
        assert_eq!(set_a.len(), 2);
        assert!(!set_a.is_disjoint(&set_b));
    }

    #[test]
    fn set_accessor_lowercases_and_trims() {
        let r = record(json!({"email": "  Tony.Smith@Ex.com "}));
        assert!(r.value_set("email").contains("tony.smith@ex.com"));
    }

    #[test]
    fn text_joins_sorted_list_values() {
        let r = record(json!({"tags": ["zebra", "apple"]}));
        assert_eq!(r.text("tags"), "apple zebra");
    }

    #[test]
    fn missing_and_null_fields_are_empty() {
        let r = record(json!({"a": null, "b": "", "c": []}));
        assert!(r.is_empty_field("a"));
        assert!(r.is_empty_field("b"));
        assert!(r.is_empty_field("c"));
        assert!(r.is_empty_field("nope"));
        assert_eq!(r.text("a"), "");
        assert!(r.value_set("a").is_empty());
    }

    #[test]
    fn populated_field_count_ignores_empty_values() {
        let r = record(json!({"id": "p1", "name": "Tony", "notes": "", "tags": []}));
        assert_eq!(r.populated_field_count(), 2);
    }

    #[test]
    fn from_value_rejects_non_objects() {
        assert!(Record::from_value(&json!("just a string")).is_none());
        assert!(Record::from_value(&json!([1, 2, 3])).is_none());
    }
}
