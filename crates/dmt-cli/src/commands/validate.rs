//! Validate migration settings command

use anyhow::{Context, Result};
use dmt_core::Config;
use dmt_runtime::Runtime;

use super::{SelectionArgs, selected_documents};

/// Run the validate command
pub async fn run(config: &Config, selection: &SelectionArgs, all: bool) -> Result<()> {
    let documents = selected_documents(config, selection, all)?;
    let runtime = Runtime::from_config(config);

    for (name, document) in &documents {
        tracing::info!("Validating {}", name);
        runtime
            .validate(document)
            .with_context(|| format!("{} is invalid", name))?;
        println!("✓ {} ({} → {})", name, document.source, document.sink);
    }

    tracing::info!("✓ {} migration(s) valid", documents.len());
    Ok(())
}
