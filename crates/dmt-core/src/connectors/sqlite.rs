//! SQLite sink
//!
//! Records land in a two-column table: the record id and the record as JSON
//! text. The connection is opened for the duration of one write and each
//! batch is committed in its own transaction.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::check_identifier;
use crate::error::{Error, Result};
use crate::extension::{DataSink, Extension, SourceContext, WriteSummary};
use crate::pipeline::write_in_batches;
use crate::record::{DataItem, RecordStream};
use crate::settings::{
    ExtensionSettings, FieldSpec, SettingEnum, SettingsSchema, Violation, check_typed,
};

/// How rows with an existing id are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum WriteMode {
    /// Fail the batch on a duplicate id
    #[default]
    Insert,
    /// Replace the stored record
    Upsert,
}

impl SettingEnum for WriteMode {
    const VARIANTS: &'static [&'static str] = &["Insert", "Upsert"];
}

/// Largest accepted `BatchSize`
const MAX_BATCH_SIZE: u64 = 100_000;

fn default_batch_size() -> u64 {
    1000
}

fn default_id_field() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SqliteSettings {
    database_path: String,
    table: String,
    #[serde(default = "default_batch_size")]
    batch_size: u64,
    #[serde(default)]
    write_mode: WriteMode,
    #[serde(default = "default_id_field")]
    id_field: String,
}

impl SettingsSchema for SqliteSettings {
    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::string("DatabasePath").required(),
            FieldSpec::string("Table").required(),
            FieldSpec::int("BatchSize").default_value(default_batch_size()),
            FieldSpec::enumeration::<WriteMode>("WriteMode").default_value("Insert"),
            FieldSpec::string("IdField").default_value(default_id_field()),
        ]
    }

    fn validate(&self) -> Vec<Violation> {
        let mut violations: Vec<Violation> = check_identifier("Table", &self.table)
            .into_iter()
            .collect();
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            violations.push(Violation::new(
                "BatchSize",
                format!("must be between 1 and {}", MAX_BATCH_SIZE),
            ));
        }
        if self.id_field.trim().is_empty() {
            violations.push(Violation::new("IdField", "must not be empty"));
        }
        violations
    }
}

impl SqliteSettings {
    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (id TEXT PRIMARY KEY, data TEXT NOT NULL)",
            self.table
        )
    }

    fn insert_sql(&self) -> String {
        match self.write_mode {
            WriteMode::Insert => {
                format!("INSERT INTO \"{}\" (id, data) VALUES (?1, ?2)", self.table)
            }
            WriteMode::Upsert => format!(
                "INSERT INTO \"{}\" (id, data) VALUES (?1, ?2) \
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
                self.table
            ),
        }
    }
}

/// Writes records into a SQLite table in batched transactions
pub struct SqliteSink;

impl Extension for SqliteSink {
    fn name(&self) -> &str {
        "SQLite"
    }

    fn settings(&self) -> Vec<FieldSpec> {
        SqliteSettings::fields()
    }

    fn check(&self, settings: &ExtensionSettings) -> Vec<Violation> {
        check_typed::<SqliteSettings>(settings)
    }

    fn module_ref(&self) -> Option<String> {
        Some(module_path!().to_string())
    }
}

#[async_trait]
impl DataSink for SqliteSink {
    async fn write(
        &self,
        records: RecordStream,
        settings: &ExtensionSettings,
        _source: &SourceContext,
        cancel: &CancellationToken,
    ) -> Result<WriteSummary> {
        let settings: SqliteSettings = settings.bind()?;
        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let path = PathBuf::from(&settings.database_path);
        let ddl = settings.create_table_sql();
        let conn = tokio::task::spawn_blocking(move || open(&path, &ddl))
            .await
            .map_err(join_error)??;
        let conn = Arc::new(Mutex::new(conn));

        let sql = settings.insert_sql();
        let id_field = settings.id_field.clone();
        tracing::debug!(
            table = %settings.table,
            mode = ?settings.write_mode,
            batch_size = settings.batch_size,
            "writing to sqlite"
        );

        let stats = write_in_batches(
            records,
            settings.batch_size as usize,
            cancel,
            move |batch: &[DataItem]| {
                let conn = Arc::clone(&conn);
                let sql = sql.clone();
                let rows = batch
                    .iter()
                    .map(|item| row(item, &id_field))
                    .collect::<Result<Vec<_>>>();
                async move {
                    let rows = rows?;
                    tokio::task::spawn_blocking(move || {
                        insert_batch(&mut conn.lock(), &sql, &rows)
                    })
                    .await
                    .map_err(join_error)?
                }
                .boxed()
            },
        )
        .await?;

        Ok(WriteSummary {
            records: stats.records,
            bytes: None,
        })
    }
}

fn open(path: &Path, ddl: &str) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(ddl)?;
    Ok(conn)
}

/// Id and JSON text for one record; a missing id gets a fresh uuid
fn row(item: &DataItem, id_field: &str) -> Result<(String, String)> {
    let id = match item.get(id_field) {
        None | Some(Value::Null) => uuid::Uuid::new_v4().to_string(),
        Some(Value::String(id)) => id.clone(),
        Some(other) => other.to_string(),
    };
    Ok((id, serde_json::to_string(item)?))
}

fn insert_batch(conn: &mut Connection, sql: &str, rows: &[(String, String)]) -> Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(sql)?;
        for (id, data) in rows {
            stmt.execute(params![id, data])?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn join_error(err: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(err))
}
