//! Export the extension manifest

use anyhow::{Context, Result};
use dmt_core::manifest::Direction;
use dmt_core::{Config, ExtensionRegistry};
use std::path::Path;

/// Print or save the manifest for one direction, or both side by side
pub fn run(config: &Config, direction: Option<Direction>, output: Option<&Path>) -> Result<()> {
    let registry = ExtensionRegistry::from_config(config);
    let json = match direction {
        Some(direction) => registry.manifest(direction).to_json()?,
        None => serde_json::to_string_pretty(&registry.combined())?,
    };

    match output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("✓ Manifest written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
