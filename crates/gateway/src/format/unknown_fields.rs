use std::collections::HashMap;

use serde_json::{Map, Value};

/// Arbitrary additional fields preserved for lossless passthrough.
#[derive(Default, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UnknownFields(HashMap<String, Value>);

impl UnknownFields {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Stores a field unless one with the same name is already present.
    pub fn insert_if_absent(&mut self, key: &str, value: Value) {
        if !self.0.contains_key(key) {
            self.0.insert(key.to_string(), value);
        }
    }

    /// Folds every field of `raw` in, skipping `known` field names and never
    /// overwriting an existing entry.
    pub fn merge_from(&mut self, raw: &Map<String, Value>, known: &[&str]) {
        for (key, value) in raw {
            if known.contains(&key.as_str()) {
                continue;
            }

            self.insert_if_absent(key, value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_skips_known_fields_and_keeps_existing() {
        let mut fields = UnknownFields::default();
        fields.insert_if_absent("weird_flag", json!(true));

        let mut raw = Map::new();
        raw.insert("model".to_string(), json!("gpt-4"));
        raw.insert("weird_flag".to_string(), json!(false));
        raw.insert("beta_feature".to_string(), json!("on"));

        fields.merge_from(&raw, &["model"]);

        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get("weird_flag"), Some(&json!(true)));
        assert_eq!(fields.get("beta_feature"), Some(&json!("on")));
        assert!(!fields.contains_key("model"));
    }
}
