//! CLI command implementations

pub mod command;
pub mod extensions;
pub mod init;
pub mod manifest;
pub mod run;
pub mod validate;

use anyhow::{Context, Result};
use clap::Args;
use dmt_core::document::parse_setting;
use dmt_core::{Config, ExtensionSettings, MigrationDocument, build_document};
use std::path::PathBuf;

/// Which migration to act on: a document file, or source and sink flags
#[derive(Args, Debug, Default)]
pub struct SelectionArgs {
    /// Migration document (JSON or YAML)
    #[arg(short, long, conflicts_with_all = ["source", "sink"])]
    pub settings: Option<PathBuf>,

    /// Source extension name
    #[arg(long)]
    pub source: Option<String>,

    /// Sink extension name
    #[arg(long)]
    pub sink: Option<String>,

    /// Source setting, repeatable; overrides the document's value
    #[arg(long = "source-setting", value_name = "KEY=VALUE")]
    pub source_settings: Vec<String>,

    /// Sink setting, repeatable; overrides the document's value
    #[arg(long = "sink-setting", value_name = "KEY=VALUE")]
    pub sink_settings: Vec<String>,
}

impl SelectionArgs {
    /// Assemble the document these arguments describe
    pub fn document(&self) -> Result<MigrationDocument> {
        let mut document = match (&self.settings, &self.source, &self.sink) {
            (Some(path), _, _) => MigrationDocument::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            (None, Some(source), Some(sink)) => build_document(
                source.as_str(),
                sink.as_str(),
                ExtensionSettings::new(),
                ExtensionSettings::new(),
            ),
            _ => anyhow::bail!("Either --settings or both --source and --sink are required"),
        };

        apply(&mut document.source_settings, &self.source_settings)
            .context("Invalid --source-setting")?;
        apply(&mut document.sink_settings, &self.sink_settings)
            .context("Invalid --sink-setting")?;
        Ok(document)
    }

    /// Label used in logs for the selected document
    pub fn label(&self) -> String {
        match &self.settings {
            Some(path) => path.display().to_string(),
            None => "command line".to_string(),
        }
    }
}

fn apply(settings: &mut ExtensionSettings, pairs: &[String]) -> Result<()> {
    for pair in pairs {
        let (key, value) = parse_setting(pair)?;
        settings.insert(key, value);
    }
    Ok(())
}

/// Documents selected by `--all` or by the selection arguments
pub fn selected_documents(
    config: &Config,
    selection: &SelectionArgs,
    all: bool,
) -> Result<Vec<(String, MigrationDocument)>> {
    if !all {
        return Ok(vec![(selection.label(), selection.document()?)]);
    }

    let documents = config
        .load_documents()
        .context("Failed to load migration documents")?;
    if documents.is_empty() {
        anyhow::bail!(
            "No migration documents found in {}",
            config
                .base_path
                .join(dmt_core::config::MIGRATIONS_DIR)
                .display()
        );
    }
    Ok(documents
        .into_iter()
        .map(|(path, document)| (path.display().to_string(), document))
        .collect())
}
