use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::property::SettingProperty;
use crate::error::Result;

/// Placeholder shown instead of a sensitive value
pub const REDACTED: &str = "***";

/// Resolved setting values for one extension
///
/// Keys are kept sorted so serialized documents are stable. Lookups fall back
/// to a case-insensitive match. `Debug` prints key names only.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtensionSettings(BTreeMap<String, Value>);

impl ExtensionSettings {
    /// Create an empty settings map
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a value, replacing any key that matches case-insensitively
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let previous = match self.find_key(&key) {
            Some(existing) if existing != key => self.0.remove(&existing),
            _ => None,
        };
        self.0.insert(key, value.into()).or(previous)
    }

    /// Value for `key`, exact match first, then case-insensitive
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.lookup(key).map(|(_, value)| value)
    }

    /// The stored key and value matching `key`
    pub fn lookup(&self, key: &str) -> Option<(&String, &Value)> {
        self.0.get_key_value(key).or_else(|| {
            self.0
                .iter()
                .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
        })
    }

    /// String value for `key`, if present and a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Remove `key` (case-insensitive)
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let stored = self.find_key(key)?;
        self.0.remove(&stored)
    }

    /// Number of settings
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no settings are present
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate settings in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Apply `overrides` on top of these settings
    pub fn merged(&self, overrides: &ExtensionSettings) -> ExtensionSettings {
        let mut merged = self.clone();
        for (key, value) in overrides.iter() {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Copy with every value marked sensitive in `schema` replaced by [`REDACTED`]
    pub fn redacted(&self, schema: &[SettingProperty]) -> ExtensionSettings {
        let entries = self
            .0
            .iter()
            .map(|(key, value)| {
                let sensitive = schema.iter().any(|p| p.is_sensitive && p.is_named(key));
                let value = if sensitive {
                    Value::String(REDACTED.to_string())
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect();
        ExtensionSettings(entries)
    }

    /// Deserialize these settings into an extension's typed settings struct
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T> {
        let object: serde_json::Map<String, Value> =
            self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Ok(serde_json::from_value(Value::Object(object))?)
    }

    fn find_key(&self, key: &str) -> Option<String> {
        self.lookup(key).map(|(stored, _)| stored.clone())
    }
}

impl fmt::Debug for ExtensionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionSettings")
            .field("keys", &self.0.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ExtensionSettings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut settings = ExtensionSettings::new();
        for (key, value) in iter {
            settings.insert(key, value);
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingType;
    use serde_json::json;

    fn property(name: &str, sensitive: bool) -> SettingProperty {
        SettingProperty {
            name: name.to_string(),
            setting_type: SettingType::String,
            default_value: None,
            is_required: false,
            is_sensitive: sensitive,
            valid_values: vec![],
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let settings = ExtensionSettings::new().with("FilePath", "in.json");
        assert_eq!(settings.get_str("filepath"), Some("in.json"));
        assert_eq!(settings.get_str("FilePath"), Some("in.json"));
        assert!(settings.get("Other").is_none());
    }

    #[test]
    fn test_insert_replaces_differently_cased_key() {
        let mut settings = ExtensionSettings::new().with("filepath", "a");
        let previous = settings.insert("FilePath", "b");
        assert_eq!(previous, Some(json!("a")));
        assert_eq!(settings.len(), 1);
        assert_eq!(settings.get_str("FilePath"), Some("b"));
    }

    #[test]
    fn test_merged_overrides_win() {
        let base = ExtensionSettings::new()
            .with("FilePath", "a.json")
            .with("Indented", true);
        let overrides = ExtensionSettings::new().with("filePath", "b.json");

        let merged = base.merged(&overrides);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get_str("FilePath"), Some("b.json"));
        assert_eq!(merged.get("Indented"), Some(&json!(true)));
        // base untouched
        assert_eq!(base.get_str("FilePath"), Some("a.json"));
    }

    #[test]
    fn test_redacted_hides_sensitive_values() {
        let settings = ExtensionSettings::new()
            .with("ConnectionString", "AccountKey=hunter2")
            .with("Table", "orders");
        let schema = vec![property("ConnectionString", true), property("Table", false)];

        let redacted = settings.redacted(&schema);
        assert_eq!(redacted.get_str("ConnectionString"), Some(REDACTED));
        assert_eq!(redacted.get_str("Table"), Some("orders"));
        assert_eq!(
            settings.get_str("ConnectionString"),
            Some("AccountKey=hunter2")
        );
    }

    #[test]
    fn test_debug_prints_keys_only() {
        let settings = ExtensionSettings::new().with("Password", "hunter2");
        let debug = format!("{:?}", settings);
        assert!(debug.contains("Password"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_bind_typed_settings() {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Typed {
            file_path: String,
            #[serde(default)]
            indented: bool,
        }

        let settings = ExtensionSettings::new().with("FilePath", "out.json");
        let typed: Typed = settings.bind().unwrap();
        assert_eq!(typed.file_path, "out.json");
        assert!(!typed.indented);
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let settings = ExtensionSettings::new().with("B", 2).with("A", 1);
        let json = serde_json::to_string(&settings).unwrap();
        assert_eq!(json, r#"{"A":1,"B":2}"#);
    }
}
