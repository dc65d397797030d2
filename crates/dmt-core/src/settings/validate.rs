use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Number, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use super::property::{SettingProperty, SettingType};
use super::values::ExtensionSettings;
use crate::error::{Error, Result};

/// A single problem with one setting
///
/// The message describes the expectation, never the supplied value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Setting name the problem belongs to
    pub setting: String,
    /// What is wrong
    pub message: String,
}

impl Violation {
    /// Create a violation for `setting`
    pub fn new(setting: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            setting: setting.into(),
            message: message.into(),
        }
    }
}

/// Every violation found during validation, grouped by setting name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    entries: BTreeMap<String, Vec<String>>,
}

impl ValidationReport {
    /// Empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violation under `setting`
    pub fn push(&mut self, setting: impl Into<String>, message: impl Into<String>) {
        self.entries
            .entry(setting.into())
            .or_default()
            .push(message.into());
    }

    /// Record violations, qualifying each setting name as `{scope}:{setting}`
    pub fn extend_scoped(&mut self, scope: &str, violations: impl IntoIterator<Item = Violation>) {
        for violation in violations {
            self.push(format!("{}:{}", scope, violation.setting), violation.message);
        }
    }

    /// True when nothing was reported
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of violations
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Setting names with at least one violation, sorted
    pub fn settings(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Violations recorded for `setting`
    pub fn messages(&self, setting: &str) -> &[String] {
        self.entries.get(setting).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `Ok(())` when empty, otherwise [`Error::Validation`]
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (setting, messages)) in self.entries.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "  {}: {}", setting, messages.join("; "))?;
        }
        Ok(())
    }
}

/// Check `settings` against `schema` and resolve them
///
/// Returns the coerced settings with defaults filled in and unknown keys
/// passed through, or every violation found.
pub fn validate_settings(
    schema: &[SettingProperty],
    settings: &ExtensionSettings,
) -> std::result::Result<ExtensionSettings, Vec<Violation>> {
    let mut resolved = ExtensionSettings::new();
    let mut violations = Vec::new();
    let mut consumed = HashSet::new();

    for property in schema {
        let supplied = settings.lookup(&property.name);
        if let Some((key, _)) = supplied {
            consumed.insert(key.clone());
        }

        match supplied.map(|(_, value)| value).filter(|v| !v.is_null()) {
            Some(value) => match coerce(property.setting_type, &property.valid_values, value) {
                Ok(value) if property.is_required && is_blank(&value) => {
                    violations.push(Violation::new(&property.name, "required setting is empty"));
                }
                Ok(value) => {
                    resolved.insert(property.name.clone(), value);
                }
                Err(reason) => violations.push(Violation::new(&property.name, reason)),
            },
            None => {
                if let Some(default) = &property.default_value {
                    resolved.insert(property.name.clone(), default.clone());
                } else if property.is_required {
                    violations.push(Violation::new(&property.name, "required setting is missing"));
                }
            }
        }
    }

    for (key, value) in settings.iter() {
        if !consumed.contains(key) {
            resolved.insert(key.clone(), value.clone());
        }
    }

    if violations.is_empty() {
        Ok(resolved)
    } else {
        Err(violations)
    }
}

fn is_blank(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.trim().is_empty())
}

/// Coerce `value` to `kind`; the error describes the expectation
pub(crate) fn coerce(
    kind: SettingType,
    valid_values: &[String],
    value: &Value,
) -> std::result::Result<Value, String> {
    match kind {
        SettingType::Undeclared => Ok(value.clone()),
        SettingType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err("must be a string".to_string()),
        },
        SettingType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err("must be true or false".to_string()),
            },
            _ => Err("must be true or false".to_string()),
        },
        SettingType::Int => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| "must be an integer".to_string()),
            _ => Err("must be an integer".to_string()),
        },
        SettingType::Float => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| "must be a number".to_string()),
            _ => Err("must be a number".to_string()),
        },
        SettingType::DateTime => value
            .as_str()
            .and_then(parse_date_time)
            .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
            .ok_or_else(|| "must be an RFC 3339 date/time".to_string()),
        SettingType::Enum => value
            .as_str()
            .and_then(|s| {
                valid_values
                    .iter()
                    .find(|member| member.eq_ignore_ascii_case(s.trim()))
            })
            .map(|member| Value::String(member.clone()))
            .ok_or_else(|| format!("must be one of: {}", valid_values.join(", "))),
        SettingType::Array => match value {
            Value::Array(_) => Ok(value.clone()),
            Value::String(s) if s.trim_start().starts_with('[') => {
                serde_json::from_str::<Vec<Value>>(s)
                    .map(Value::Array)
                    .map_err(|_| "must be a list".to_string())
            }
            Value::String(s) => Ok(Value::Array(
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(|item| Value::String(item.to_string()))
                    .collect(),
            )),
            _ => Err("must be a list".to_string()),
        },
    }
}

fn parse_date_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
                .ok()
                .map(|naive| naive.and_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}
