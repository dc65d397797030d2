//! Migration documents
//!
//! A document names one source and one sink with the settings for each. It
//! may also list operations: partial setting overrides, each of which becomes
//! its own run.
//!
//! ```yaml
//! source: JSON-File
//! sink: SQLite
//! sourceSettings:
//!   FilePath: ./data/orders.json
//! sinkSettings:
//!   DatabasePath: ./data/orders.db
//! operations:
//!   - sinkSettings: { Table: orders_2023 }
//!   - sinkSettings: { Table: orders_2024 }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::error::{Error, Result};
use crate::settings::{ExtensionSettings, SettingProperty};

/// A source → sink selection with settings for both
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationDocument {
    /// Source extension name
    pub source: String,

    /// Sink extension name
    pub sink: String,

    /// Settings for the source
    #[serde(default)]
    pub source_settings: ExtensionSettings,

    /// Settings for the sink
    #[serde(default)]
    pub sink_settings: ExtensionSettings,

    /// Runs to perform, in order; empty means a single run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<Operation>,
}

/// Setting overrides for one run of a document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Optional label used in logs and reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Overrides merged over the document's source settings
    #[serde(default, skip_serializing_if = "ExtensionSettings::is_empty")]
    pub source_settings: ExtensionSettings,

    /// Overrides merged over the document's sink settings
    #[serde(default, skip_serializing_if = "ExtensionSettings::is_empty")]
    pub sink_settings: ExtensionSettings,
}

/// Fully merged settings for one run
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOperation {
    /// Operation label, or its 1-based position
    pub label: String,
    /// Source settings after merging
    pub source_settings: ExtensionSettings,
    /// Sink settings after merging
    pub sink_settings: ExtensionSettings,
}

/// Assemble a document from a user's selection
///
/// Pure: nothing is validated here.
pub fn build_document(
    source: impl Into<String>,
    sink: impl Into<String>,
    source_settings: ExtensionSettings,
    sink_settings: ExtensionSettings,
) -> MigrationDocument {
    MigrationDocument {
        source: source.into(),
        sink: sink.into(),
        source_settings,
        sink_settings,
        operations: Vec::new(),
    }
}

impl MigrationDocument {
    /// Builder-style operation append
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// Pretty JSON form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse the JSON form
    pub fn from_json(text: &str) -> Result<Self> {
        let document: Self = serde_json::from_str(text)?;
        document.check()?;
        Ok(document)
    }

    /// YAML form
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Parse the YAML form
    pub fn from_yaml(text: &str) -> Result<Self> {
        let document: Self = serde_yaml::from_str(text)?;
        document.check()?;
        Ok(document)
    }

    /// Read a document; `.yaml` and `.yml` files are YAML, anything else JSON
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        if is_yaml(path) {
            Self::from_yaml(&contents)
        } else {
            Self::from_json(&contents)
        }
    }

    /// Write a document in the format its extension implies
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let contents = if is_yaml(path) {
            self.to_yaml()?
        } else {
            self.to_json()?
        };
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Settings for every run, in order
    pub fn resolved_operations(&self) -> Vec<ResolvedOperation> {
        if self.operations.is_empty() {
            return vec![ResolvedOperation {
                label: "1".to_string(),
                source_settings: self.source_settings.clone(),
                sink_settings: self.sink_settings.clone(),
            }];
        }

        self.operations
            .iter()
            .enumerate()
            .map(|(index, operation)| ResolvedOperation {
                label: operation
                    .name
                    .clone()
                    .unwrap_or_else(|| (index + 1).to_string()),
                source_settings: self.source_settings.merged(&operation.source_settings),
                sink_settings: self.sink_settings.merged(&operation.sink_settings),
            })
            .collect()
    }

    fn check(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(Error::InvalidDocument {
                message: "'source' must name an extension".to_string(),
            });
        }
        if self.sink.trim().is_empty() {
            return Err(Error::InvalidDocument {
                message: "'sink' must name an extension".to_string(),
            });
        }
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

/// Render the command line that performs the same migration
///
/// Settings marked sensitive in either schema are printed as `***`. Every
/// argument is quoted for a POSIX shell. Operations are not representable
/// as flags; only document-level settings are rendered.
pub fn build_command(
    program: &str,
    document: &MigrationDocument,
    source_schema: &[SettingProperty],
    sink_schema: &[SettingProperty],
) -> String {
    let mut args = vec![
        shell_quote(program),
        "run".to_string(),
        "--source".to_string(),
        shell_quote(&document.source),
        "--sink".to_string(),
        shell_quote(&document.sink),
    ];

    let sides = [
        ("--source-setting", &document.source_settings, source_schema),
        ("--sink-setting", &document.sink_settings, sink_schema),
    ];
    for (flag, settings, schema) in sides {
        for (key, value) in settings.redacted(schema).iter() {
            args.push(flag.to_string());
            args.push(shell_quote(&format!("{}={}", key, render_value(value))));
        }
    }

    args.join(" ")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Quote `arg` for a POSIX shell, leaving plain words untouched
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, '_' | '-' | '.' | '/' | ':' | '=' | ',' | '@' | '%' | '+')
        });
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r#"'\''"#))
    }
}

/// Split `KEY=VALUE` into a setting
///
/// The value is parsed as JSON when it is a number, boolean, array or
/// object, and kept as a string otherwise.
pub fn parse_setting(pair: &str) -> Result<(String, Value)> {
    let (key, raw) = pair.split_once('=').ok_or_else(|| Error::InvalidDocument {
        message: "settings must be given as KEY=VALUE".to_string(),
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::InvalidDocument {
            message: "setting name must not be empty".to_string(),
        });
    }

    let value = match serde_json::from_str::<Value>(raw) {
        Ok(parsed @ (Value::Number(_) | Value::Bool(_) | Value::Array(_) | Value::Object(_))) => {
            parsed
        }
        _ => Value::String(raw.to_string()),
    };
    Ok((key.to_string(), value))
}
