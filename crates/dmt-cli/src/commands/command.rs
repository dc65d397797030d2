//! Print the command line for a migration

use anyhow::{Context, Result};
use dmt_core::{Config, ExtensionRegistry, build_command};
use std::path::Path;

use super::SelectionArgs;

/// Print the redacted command line equivalent to the selection
pub fn run(
    config: &Config,
    selection: &SelectionArgs,
    program: &str,
    save: Option<&Path>,
) -> Result<()> {
    let document = selection.document()?;
    let registry = ExtensionRegistry::from_config(config);
    let catalog = registry.catalog();
    let source = catalog.source(&document.source)?;
    let sink = catalog.sink(&document.sink)?;

    println!(
        "{}",
        build_command(program, &document, &source.item.settings, &sink.item.settings)
    );

    if let Some(path) = save {
        document
            .save(path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
        tracing::info!("✓ Document saved to {}", path.display());
    }
    Ok(())
}
