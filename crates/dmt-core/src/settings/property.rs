use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of value a setting accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettingType {
    /// Free text
    String,
    /// `true` / `false`
    Boolean,
    /// Signed 64-bit integer
    Int,
    /// Floating point number
    Float,
    /// Point in time, normalized to RFC 3339
    DateTime,
    /// One of the property's `valid_values`
    Enum,
    /// List of values
    Array,
    /// No declared kind; any value is accepted as-is
    Undeclared,
}

impl fmt::Display for SettingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettingType::String => "String",
            SettingType::Boolean => "Boolean",
            SettingType::Int => "Int",
            SettingType::Float => "Float",
            SettingType::DateTime => "DateTime",
            SettingType::Enum => "Enum",
            SettingType::Array => "Array",
            SettingType::Undeclared => "Undeclared",
        };
        f.write_str(name)
    }
}

/// One declared setting of an extension, as published in manifests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingProperty {
    /// Setting name, unique within its extension
    pub name: String,

    /// Declared value kind
    #[serde(rename = "type")]
    pub setting_type: SettingType,

    /// Value used when the setting is not supplied
    #[serde(default)]
    pub default_value: Option<Value>,

    /// Whether a value must be supplied
    #[serde(default)]
    pub is_required: bool,

    /// Whether the value is a secret that must never be echoed
    #[serde(default)]
    pub is_sensitive: bool,

    /// Enum members in declaration order; empty for non-enum settings
    #[serde(default)]
    pub valid_values: Vec<String>,
}

impl SettingProperty {
    /// Case-insensitive name comparison, matching how settings are looked up
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}
