//! End-to-end migrations through the built-in registry
//!
//! Every test works on real files in a temporary directory:
//! - composable sources and sinks paired by the registry
//! - the SQLite sink in insert and upsert modes
//! - block uploads through the blob target
//! - validation and cancellation before any output exists

use dmt_core::{
    Error, ExtensionRegistry, ExtensionSettings, MigrationDocument, MigrationRun, RunState,
    build_command, build_document,
};
use serde_json::{Value, json};
use std::path::Path;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn file_settings(path: &Path) -> ExtensionSettings {
    ExtensionSettings::new().with("FilePath", path.display().to_string())
}

async fn run_document(registry: &ExtensionRegistry, document: &MigrationDocument) -> Vec<RunState> {
    let mut states = Vec::new();
    for operation in document.resolved_operations() {
        let mut run = MigrationRun::from_registry(
            registry,
            &document.source,
            &document.sink,
            operation.source_settings,
            operation.sink_settings,
        )
        .unwrap();
        let outcome = run.execute(&CancellationToken::new()).await.unwrap();
        states.push(outcome.state());
    }
    states
}

fn sqlite_rows(path: &Path, table: &str) -> Vec<(String, Value)> {
    let conn = rusqlite::Connection::open(path).unwrap();
    let mut stmt = conn
        .prepare(&format!("SELECT id, data FROM \"{table}\" ORDER BY id"))
        .unwrap();
    stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .unwrap()
        .map(|r| {
            let (id, data) = r.unwrap();
            (id, serde_json::from_str(&data).unwrap())
        })
        .collect()
}

// =============================================================================
// Composable pairs
// =============================================================================

#[tokio::test]
async fn test_json_file_to_csv_file() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("people.json");
    let output = dir.path().join("out/people.csv");
    std::fs::write(
        &input,
        r#"[{"id": 1, "name": "Ada", "langs": ["en"]}, {"id": 2, "name": "Alan"}]"#,
    )
    .unwrap();

    let registry = ExtensionRegistry::builtin();
    let mut run = MigrationRun::from_registry(
        &registry,
        "JSON-File",
        "CSV-File",
        file_settings(&input),
        file_settings(&output),
    )
    .unwrap();
    let outcome = run.execute(&CancellationToken::new()).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.summary().records_read, 2);
    assert_eq!(outcome.summary().records_written, 2);
    assert_eq!(run.state(), RunState::Completed);

    let csv = std::fs::read_to_string(&output).unwrap();
    assert_eq!(csv, "id,name,langs\n1,Ada,\"[\"\"en\"\"]\"\n2,Alan,\n");
    assert_eq!(outcome.summary().bytes_written, Some(csv.len() as u64));
}

#[tokio::test]
async fn test_directory_of_jsonl_files_to_single_json_file() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in");
    std::fs::create_dir(&input).unwrap();
    std::fs::write(input.join("01.jsonl"), "{\"id\":1}\n{\"id\":2}\n").unwrap();
    std::fs::write(input.join("02.jsonl"), "\n{\"id\":3}\n").unwrap();
    let output = dir.path().join("all.json");

    let document = build_document(
        "JSONL-File",
        "JSON-File",
        file_settings(&input),
        file_settings(&output),
    );
    let states = run_document(&ExtensionRegistry::builtin(), &document).await;
    assert_eq!(states, vec![RunState::Completed]);

    let written: Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(written, json!([{"id": 1}, {"id": 2}, {"id": 3}]));
}

#[tokio::test]
async fn test_csv_file_to_json_blob_in_blocks() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("big.csv");
    let mut csv = String::from("id,payload\n");
    for i in 0..200 {
        csv.push_str(&format!("{},{}\n", i, "x".repeat(20)));
    }
    std::fs::write(&input, csv).unwrap();
    let container = dir.path().join("container");

    let registry = ExtensionRegistry::builtin();
    let mut run = MigrationRun::from_registry(
        &registry,
        "CSV-File",
        "JSONL-Blob",
        file_settings(&input),
        ExtensionSettings::new()
            .with("ContainerPath", container.display().to_string())
            .with("BlobName", "exports/big.jsonl")
            .with("MaxBlockSizeInKB", 1),
    )
    .unwrap();
    let outcome = run.execute(&CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.summary().records_written, 200);
    let blob = std::fs::read_to_string(container.join("exports/big.jsonl")).unwrap();
    let lines: Vec<&str> = blob.lines().collect();
    assert_eq!(lines.len(), 200);
    assert_eq!(lines[7], r#"{"id":"7","payload":"xxxxxxxxxxxxxxxxxxxx"}"#);
    assert!(blob.len() > 1024, "payload should span several blocks");
    assert!(!container.join(".blocks/exports/big.jsonl").exists());
}

// =============================================================================
// SQLite sink
// =============================================================================

#[tokio::test]
async fn test_jsonl_to_sqlite_operations_upsert() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first.jsonl");
    let second = dir.path().join("second.jsonl");
    std::fs::write(&first, "{\"id\":1,\"v\":\"a\"}\n{\"id\":2,\"v\":\"b\"}\n").unwrap();
    std::fs::write(&second, "{\"id\":2,\"v\":\"B\"}\n{\"id\":3,\"v\":\"c\"}\n").unwrap();
    let db = dir.path().join("target.db");

    let yaml = format!(
        r#"
source: JSONL-File
sink: SQLite
sourceSettings:
  FilePath: {first}
sinkSettings:
  DatabasePath: {db}
  Table: items
  WriteMode: Upsert
  BatchSize: 1
operations:
  - name: initial
  - name: delta
    sourceSettings:
      FilePath: {second}
"#,
        first = first.display(),
        second = second.display(),
        db = db.display(),
    );
    let document_path = dir.path().join("migration.yaml");
    std::fs::write(&document_path, yaml).unwrap();

    let document = MigrationDocument::load(&document_path).unwrap();
    let states = run_document(&ExtensionRegistry::builtin(), &document).await;
    assert_eq!(states, vec![RunState::Completed, RunState::Completed]);

    let rows = sqlite_rows(&db, "items");
    let values: Vec<Value> = rows.into_iter().map(|(_, data)| data["v"].clone()).collect();
    assert_eq!(values, vec![json!("a"), json!("B"), json!("c")]);
}

#[tokio::test]
async fn test_sqlite_insert_duplicate_fails_run() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("dupes.jsonl");
    std::fs::write(&input, "{\"id\":1}\n{\"id\":1}\n").unwrap();

    let mut run = MigrationRun::from_registry(
        &ExtensionRegistry::builtin(),
        "JSONL-File",
        "sqlite",
        file_settings(&input),
        ExtensionSettings::new()
            .with("DatabasePath", dir.path().join("t.db").display().to_string())
            .with("Table", "items"),
    )
    .unwrap();
    let err = run.execute(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, Error::SinkWrite { ref extension, .. } if extension == "SQLite"));
    assert_eq!(run.state(), RunState::Failed);
}

// =============================================================================
// Validation and cancellation
// =============================================================================

#[tokio::test]
async fn test_validation_reports_both_sides_before_io() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("never.db");

    let mut run = MigrationRun::from_registry(
        &ExtensionRegistry::builtin(),
        "JSON-File",
        "SQLite",
        ExtensionSettings::new(),
        ExtensionSettings::new()
            .with("DatabasePath", db.display().to_string())
            .with("Table", "no such table"),
    )
    .unwrap();
    let err = run.execute(&CancellationToken::new()).await.unwrap_err();

    let Error::Validation(report) = err else {
        panic!("expected a validation error");
    };
    let settings: Vec<&str> = report.settings().collect();
    assert_eq!(settings, vec!["SinkSettings:Table", "SourceSettings:FilePath"]);
    assert_eq!(run.state(), RunState::Failed);
    assert!(!db.exists());
}

#[tokio::test]
async fn test_unknown_extension_is_rejected() {
    let err = MigrationRun::from_registry(
        &ExtensionRegistry::builtin(),
        "XML-File",
        "JSON-File",
        ExtensionSettings::new(),
        ExtensionSettings::new(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, Error::UnknownExtension { .. }));
}

#[tokio::test]
async fn test_canceled_run_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.json");
    let output = dir.path().join("out.json");
    std::fs::write(&input, "[{\"id\":1}]").unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut run = MigrationRun::from_registry(
        &ExtensionRegistry::builtin(),
        "JSON-File",
        "JSON-File",
        file_settings(&input),
        file_settings(&output),
    )
    .unwrap();
    let outcome = run.execute(&cancel).await.unwrap();

    assert_eq!(outcome.state(), RunState::Canceled);
    assert_eq!(outcome.summary().records_written, 0);
    assert!(!output.exists());
}

// =============================================================================
// Documents
// =============================================================================

#[test]
fn test_command_line_for_document() {
    let registry = ExtensionRegistry::builtin();
    let catalog = registry.catalog();
    let document = build_document(
        "JSON-File",
        "SQLite",
        ExtensionSettings::new().with("FilePath", "in put.json"),
        ExtensionSettings::new()
            .with("DatabasePath", "out.db")
            .with("Table", "items"),
    );

    let command = build_command(
        "dmt",
        &document,
        &catalog.source("JSON-File").unwrap().item.settings,
        &catalog.sink("SQLite").unwrap().item.settings,
    );
    assert!(command.starts_with("dmt run --source JSON-File --sink SQLite"));
    assert!(command.contains("--source-setting 'FilePath=in put.json'"));
    assert!(command.contains("--sink-setting Table=items"));
}
