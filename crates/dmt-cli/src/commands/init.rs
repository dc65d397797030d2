//! Initialize a new dmt project

use anyhow::Result;
use dmt_core::config::{CONFIG_FILE, MIGRATIONS_DIR};
use std::fs;
use std::path::Path;

/// Run the init command
pub async fn run(path: &str) -> Result<()> {
    let project_dir = Path::new(path);

    if !project_dir.exists() {
        fs::create_dir_all(project_dir)?;
    }
    let abs_path = project_dir.canonicalize()?;

    if project_dir.join(CONFIG_FILE).exists() {
        anyhow::bail!(
            "Directory '{}' already contains a {}",
            project_dir.display(),
            CONFIG_FILE
        );
    }

    tracing::info!("Creating new dmt project in {}", abs_path.display());

    fs::create_dir_all(project_dir.join(MIGRATIONS_DIR))?;
    fs::create_dir_all(project_dir.join("data"))?;

    let config = r#"# dmt project configuration
runtime:
  # Bytes buffered between a formatter and its target
  pipe_capacity: 65536
  # text | json
  log_format: text

extensions:
  # Extension names to leave out of the catalog
  disabled: []
"#;
    fs::write(project_dir.join(CONFIG_FILE), config)?;

    // Paths are relative to the directory dmt runs from
    let migration = r#"# Sample migration: JSON Lines in, CSV out
source: JSONL-File
sink: CSV-File
sourceSettings:
  FilePath: data/input.jsonl
sinkSettings:
  FilePath: data/output.csv
  IncludeHeader: true
"#;
    fs::write(
        project_dir.join(MIGRATIONS_DIR).join("sample.yaml"),
        migration,
    )?;

    let sample_data = r#"{"id": 1, "name": "Ada Lovelace", "born": 1815}
{"id": 2, "name": "Alan Turing", "born": 1912}
{"id": 3, "name": "Grace Hopper", "born": 1906}
"#;
    fs::write(project_dir.join("data/input.jsonl"), sample_data)?;

    let gitignore = r#"# Migration output
data/output*

# Blob staging
.blocks/
"#;
    fs::write(project_dir.join(".gitignore"), gitignore)?;

    tracing::info!("✓ Created project at {}", abs_path.display());
    tracing::info!("");
    tracing::info!("Next steps:");
    if path != "." {
        tracing::info!("  cd {}", project_dir.display());
    }
    tracing::info!("  dmt validate --all   # Check migration settings");
    tracing::info!("  dmt run --all        # Run every migration");

    Ok(())
}
