use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;

use super::property::{SettingProperty, SettingType};
use super::validate::{Violation, coerce};
use super::values::ExtensionSettings;
use crate::error::{Error, Result};

/// Enum types usable as setting values
///
/// `VARIANTS` lists member names in declaration order; they become the
/// property's `valid_values`.
pub trait SettingEnum {
    /// Member names in declaration order
    const VARIANTS: &'static [&'static str];
}

/// A typed settings struct that describes its own fields
///
/// Implementors derive `Deserialize` with the same field names they declare,
/// so validated [`ExtensionSettings`] can be bound back into the struct.
pub trait SettingsSchema: DeserializeOwned {
    /// Field declarations in declaration order
    fn fields() -> Vec<FieldSpec>;

    /// Cross-field checks that run after the per-field validation
    fn validate(&self) -> Vec<Violation> {
        Vec::new()
    }
}

/// Bind `settings` into `T` and run its own checks
///
/// A binding failure is reported as a single violation on the settings as a
/// whole; per-field problems are already caught by [`super::validate_settings`].
pub fn check_typed<T: SettingsSchema>(settings: &ExtensionSettings) -> Vec<Violation> {
    match settings.bind::<T>() {
        Ok(typed) => typed.validate(),
        Err(_) => vec![Violation::new(
            "*",
            "settings do not match the extension's configuration",
        )],
    }
}

/// Declaration of one configuration field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    name: String,
    kind: Option<SettingType>,
    default: Option<Value>,
    required: bool,
    sensitive: bool,
    values: Vec<String>,
}

impl FieldSpec {
    /// A field without a declared kind
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            default: None,
            required: false,
            sensitive: false,
            values: Vec::new(),
        }
    }

    fn typed(name: impl Into<String>, kind: SettingType) -> Self {
        Self {
            kind: Some(kind),
            ..Self::new(name)
        }
    }

    /// String field
    pub fn string(name: impl Into<String>) -> Self {
        Self::typed(name, SettingType::String)
    }

    /// Boolean field
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::typed(name, SettingType::Boolean)
    }

    /// Integer field
    pub fn int(name: impl Into<String>) -> Self {
        Self::typed(name, SettingType::Int)
    }

    /// Floating point field
    pub fn float(name: impl Into<String>) -> Self {
        Self::typed(name, SettingType::Float)
    }

    /// Date/time field
    pub fn date_time(name: impl Into<String>) -> Self {
        Self::typed(name, SettingType::DateTime)
    }

    /// List field
    pub fn array(name: impl Into<String>) -> Self {
        Self::typed(name, SettingType::Array)
    }

    /// Enum field whose members come from `E`
    pub fn enumeration<E: SettingEnum>(name: impl Into<String>) -> Self {
        Self::one_of(name, E::VARIANTS.iter().copied())
    }

    /// Enum field with an explicit member list
    pub fn one_of<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::typed(name, SettingType::Enum).allowed_values(values)
    }

    /// Replace the allowed values
    pub fn allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the field as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark the field as holding a secret
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Value used when the field is not supplied
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Declared field name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Turn an extension's field declarations into its published settings
///
/// Declaration order is preserved. Fails with [`Error::SchemaExtraction`] on
/// the first malformed declaration.
pub fn extract(extension: &str, fields: Vec<FieldSpec>) -> Result<Vec<SettingProperty>> {
    let malformed = |message: String| Error::SchemaExtraction {
        extension: extension.to_string(),
        message,
    };

    let mut seen = HashSet::new();
    let mut properties = Vec::with_capacity(fields.len());

    for field in fields {
        let name = field.name.trim().to_string();
        if name.is_empty() {
            return Err(malformed("a field has an empty name".to_string()));
        }
        if !seen.insert(name.to_ascii_lowercase()) {
            return Err(malformed(format!("field '{}' is declared twice", name)));
        }

        let setting_type = field.kind.unwrap_or(SettingType::Undeclared);
        if setting_type == SettingType::Enum {
            if field.values.is_empty() {
                return Err(malformed(format!("enum field '{}' has no members", name)));
            }
            let mut members = HashSet::new();
            for member in &field.values {
                if member.trim().is_empty() {
                    return Err(malformed(format!(
                        "enum field '{}' has an empty member",
                        name
                    )));
                }
                if !members.insert(member.to_ascii_lowercase()) {
                    return Err(malformed(format!(
                        "enum field '{}' lists member '{}' twice",
                        name, member
                    )));
                }
            }
        } else if !field.values.is_empty() {
            return Err(malformed(format!(
                "field '{}' lists valid values but is {}, not Enum",
                name, setting_type
            )));
        }

        let default_value = match field.default {
            None | Some(Value::Null) => None,
            Some(_) if field.sensitive => {
                return Err(malformed(format!(
                    "sensitive field '{}' must not declare a default value",
                    name
                )));
            }
            Some(value) => Some(
                coerce(setting_type, &field.values, &value)
                    .map_err(|reason| malformed(format!("default of '{}' {}", name, reason)))?,
            ),
        };

        properties.push(SettingProperty {
            name,
            setting_type,
            default_value,
            is_required: field.required,
            is_sensitive: field.sensitive,
            valid_values: field.values,
        });
    }

    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde::Deserialize;
    use serde_json::json;

    enum Mode {}

    impl SettingEnum for Mode {
        const VARIANTS: &'static [&'static str] = &["Insert", "Upsert", "Replace"];
    }

    fn extract_ok(fields: Vec<FieldSpec>) -> Vec<SettingProperty> {
        extract("test", fields).unwrap()
    }

    #[test]
    fn test_preserves_declaration_order() {
        let properties = extract_ok(vec![
            FieldSpec::string("Zeta"),
            FieldSpec::int("Alpha"),
            FieldSpec::boolean("Mid"),
        ]);
        let names: Vec<_> = properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "Alpha", "Mid"]);
    }

    #[test]
    fn test_required_and_optional_flags() {
        let properties = extract_ok(vec![
            FieldSpec::string("FilePath").required(),
            FieldSpec::boolean("Indented"),
            FieldSpec::string("Key").required().sensitive(),
        ]);
        assert!(properties[0].is_required);
        assert!(!properties[0].is_sensitive);
        assert!(!properties[1].is_required);
        assert!(properties[2].is_required);
        assert!(properties[2].is_sensitive);
    }

    #[test]
    fn test_undeclared_kind() {
        let properties = extract_ok(vec![FieldSpec::new("Anything")]);
        assert_eq!(properties[0].setting_type, SettingType::Undeclared);
    }

    #[test]
    fn test_enum_members_in_declaration_order() {
        let properties = extract_ok(vec![
            FieldSpec::enumeration::<Mode>("WriteMode").default_value("upsert"),
        ]);
        assert_eq!(properties[0].setting_type, SettingType::Enum);
        assert_eq!(properties[0].valid_values, vec!["Insert", "Upsert", "Replace"]);
        // default normalized to the canonical member spelling
        assert_eq!(properties[0].default_value, Some(json!("Upsert")));
    }

    #[test]
    fn test_default_is_coerced() {
        let properties = extract_ok(vec![
            FieldSpec::int("BatchSize").default_value("100"),
            FieldSpec::boolean("Flag").default_value(json!(null)),
        ]);
        assert_eq!(properties[0].default_value, Some(json!(100)));
        assert_eq!(properties[1].default_value, None);
    }

    #[rstest]
    #[case::empty_name(vec![FieldSpec::string("  ")])]
    #[case::duplicate_name(vec![FieldSpec::string("Path"), FieldSpec::int("path")])]
    #[case::enum_without_members(vec![FieldSpec::one_of("Mode", Vec::<String>::new())])]
    #[case::duplicate_member(vec![FieldSpec::one_of("Mode", ["A", "a"])])]
    #[case::values_on_string(vec![FieldSpec::string("Mode").allowed_values(["A"])])]
    #[case::bad_int_default(vec![FieldSpec::int("BatchSize").default_value("lots")])]
    #[case::default_not_member(vec![FieldSpec::one_of("Mode", ["A", "B"]).default_value("C")])]
    #[case::sensitive_default(vec![FieldSpec::string("Key").sensitive().default_value("k")])]
    fn test_malformed_declarations_fail(#[case] fields: Vec<FieldSpec>) {
        let err = extract("broken", fields).unwrap_err();
        match err {
            Error::SchemaExtraction { extension, .. } => assert_eq!(extension, "broken"),
            other => panic!("expected schema extraction error, got {other:?}"),
        }
    }

    #[test]
    fn test_sensitive_default_is_not_echoed() {
        let err = extract(
            "vault",
            vec![FieldSpec::string("Token").sensitive().default_value("tok-123")],
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Token"));
        assert!(!message.contains("tok-123"));
    }

    #[test]
    fn test_check_typed_runs_cross_field_validation() {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Range {
            low: i64,
            high: i64,
        }

        impl SettingsSchema for Range {
            fn fields() -> Vec<FieldSpec> {
                vec![FieldSpec::int("Low"), FieldSpec::int("High")]
            }

            fn validate(&self) -> Vec<Violation> {
                if self.low > self.high {
                    vec![Violation::new("Low", "must not exceed High")]
                } else {
                    vec![]
                }
            }
        }

        let ok = ExtensionSettings::new().with("Low", 1).with("High", 2);
        assert!(check_typed::<Range>(&ok).is_empty());

        let inverted = ExtensionSettings::new().with("Low", 3).with("High", 2);
        let violations = check_typed::<Range>(&inverted);
        assert_eq!(violations, vec![Violation::new("Low", "must not exceed High")]);
    }
}
