//! Inspect the extension catalog

use anyhow::Result;
use dmt_core::manifest::Direction;
use dmt_core::{Config, Error, ExtensionRegistry, SettingProperty};

/// List extensions, optionally for one direction
pub fn list(config: &Config, direction: Option<Direction>) -> Result<()> {
    let registry = ExtensionRegistry::from_config(config);
    let directions = match direction {
        Some(direction) => vec![direction],
        None => vec![Direction::Source, Direction::Sink],
    };

    for direction in directions {
        let manifest = registry.manifest(direction);
        println!("{}s:", direction);
        for item in &manifest.extensions {
            println!(
                "  {:<14} {}",
                item.name,
                item.module_ref.as_deref().unwrap_or("-")
            );
        }
    }

    for failure in registry.failures() {
        tracing::warn!(
            "{} extension '{}' unavailable: {}",
            failure.direction,
            failure.name,
            failure.message
        );
    }
    Ok(())
}

/// Print the settings schema of one extension
pub fn settings(config: &Config, name: &str, direction: Direction) -> Result<()> {
    let registry = ExtensionRegistry::from_config(config);
    let manifest = registry.manifest(direction);
    let item = manifest.find(name).ok_or_else(|| Error::UnknownExtension {
        direction,
        name: name.to_string(),
    })?;

    println!("{} ({})", item.name, item.direction);
    if item.settings.is_empty() {
        println!("  no settings");
    }
    for property in &item.settings {
        println!("  {}", describe(property));
    }
    Ok(())
}

fn describe(property: &SettingProperty) -> String {
    let mut line = format!("{:<18} {}", property.name, property.setting_type);
    if property.is_required {
        line.push_str(", required");
    }
    if property.is_sensitive {
        line.push_str(", sensitive");
    }
    if let Some(default) = &property.default_value {
        line.push_str(&format!(", default {}", default));
    }
    if !property.valid_values.is_empty() {
        line.push_str(&format!(", one of {}", property.valid_values.join("|")));
    }
    line
}
