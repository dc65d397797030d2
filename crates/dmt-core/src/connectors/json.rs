//! JSON and JSON Lines formatters and parsers

use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::extension::{Extension, Payload, RecordFormatter, RecordParser};
use crate::record::{DataItem, RecordStream};
use crate::settings::{ExtensionSettings, FieldSpec, SettingsSchema};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JsonFormatterSettings {
    #[serde(default)]
    indented: bool,
    #[serde(default)]
    include_null_fields: bool,
}

impl SettingsSchema for JsonFormatterSettings {
    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::boolean("Indented").default_value(false),
            FieldSpec::boolean("IncludeNullFields").default_value(false),
        ]
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JsonlFormatterSettings {
    #[serde(default)]
    include_null_fields: bool,
}

impl SettingsSchema for JsonlFormatterSettings {
    fn fields() -> Vec<FieldSpec> {
        vec![FieldSpec::boolean("IncludeNullFields").default_value(false)]
    }
}

fn prepare(item: DataItem, include_nulls: bool) -> DataItem {
    if include_nulls {
        item
    } else {
        item.without_nulls()
    }
}

/// Writes records as one JSON array
pub struct JsonFormatter;

impl Extension for JsonFormatter {
    fn name(&self) -> &str {
        "JSON"
    }

    fn settings(&self) -> Vec<FieldSpec> {
        JsonFormatterSettings::fields()
    }

    fn module_ref(&self) -> Option<String> {
        Some(module_path!().to_string())
    }
}

#[async_trait]
impl RecordFormatter for JsonFormatter {
    async fn format(
        &self,
        mut records: RecordStream,
        settings: &ExtensionSettings,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let settings: JsonFormatterSettings = settings.bind()?;
        let mut count = 0u64;

        out.write_all(b"[").await?;
        while let Some(item) = records.next().await {
            if cancel.is_cancelled() {
                return Err(Error::Canceled);
            }
            let item = prepare(item?, settings.include_null_fields);

            let mut chunk = Vec::new();
            if count > 0 {
                chunk.push(b',');
            }
            if settings.indented {
                chunk.extend_from_slice(b"\n");
                let pretty = serde_json::to_string_pretty(&item)?;
                for (index, line) in pretty.lines().enumerate() {
                    if index > 0 {
                        chunk.push(b'\n');
                    }
                    chunk.extend_from_slice(b"  ");
                    chunk.extend_from_slice(line.as_bytes());
                }
            } else {
                serde_json::to_writer(&mut chunk, &item)?;
            }
            out.write_all(&chunk).await?;
            count += 1;
        }

        if settings.indented && count > 0 {
            out.write_all(b"\n").await?;
        }
        out.write_all(b"]").await?;
        out.flush().await?;
        Ok(count)
    }
}

/// Writes one JSON object per line
pub struct JsonlFormatter;

impl Extension for JsonlFormatter {
    fn name(&self) -> &str {
        "JSONL"
    }

    fn settings(&self) -> Vec<FieldSpec> {
        JsonlFormatterSettings::fields()
    }

    fn module_ref(&self) -> Option<String> {
        Some(module_path!().to_string())
    }
}

#[async_trait]
impl RecordFormatter for JsonlFormatter {
    async fn format(
        &self,
        mut records: RecordStream,
        settings: &ExtensionSettings,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let settings: JsonlFormatterSettings = settings.bind()?;
        let mut count = 0u64;

        while let Some(item) = records.next().await {
            if cancel.is_cancelled() {
                return Err(Error::Canceled);
            }
            let item = prepare(item?, settings.include_null_fields);
            let mut line = serde_json::to_vec(&item)?;
            line.push(b'\n');
            out.write_all(&line).await?;
            count += 1;
        }

        out.flush().await?;
        Ok(count)
    }
}

/// Reads a JSON array of objects, or a single object
///
/// The whole payload is buffered before parsing.
pub struct JsonParser;

impl Extension for JsonParser {
    fn name(&self) -> &str {
        "JSON"
    }

    fn settings(&self) -> Vec<FieldSpec> {
        Vec::new()
    }

    fn module_ref(&self) -> Option<String> {
        Some(module_path!().to_string())
    }
}

#[async_trait]
impl RecordParser for JsonParser {
    async fn parse(
        &self,
        mut payload: Payload,
        _settings: &ExtensionSettings,
    ) -> Result<RecordStream> {
        let mut bytes = Vec::new();
        payload.reader.read_to_end(&mut bytes).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(stream::empty().boxed());
        }

        let value: Value = serde_json::from_slice(&bytes).map_err(|e| Error::Parse {
            payload: payload.name.clone(),
            message: e.to_string(),
        })?;
        let values = match value {
            Value::Array(values) => values,
            object @ Value::Object(_) => vec![object],
            _ => {
                return Err(Error::Parse {
                    payload: payload.name,
                    message: "expected a JSON array or object at the top level".to_string(),
                });
            }
        };

        Ok(stream::iter(values.into_iter().map(DataItem::try_from)).boxed())
    }
}

/// Reads one JSON object per line, streaming
///
/// Blank lines are skipped.
pub struct JsonlParser;

impl Extension for JsonlParser {
    fn name(&self) -> &str {
        "JSONL"
    }

    fn settings(&self) -> Vec<FieldSpec> {
        Vec::new()
    }

    fn module_ref(&self) -> Option<String> {
        Some(module_path!().to_string())
    }
}

#[async_trait]
impl RecordParser for JsonlParser {
    async fn parse(&self, payload: Payload, _settings: &ExtensionSettings) -> Result<RecordStream> {
        let name = payload.name;
        let lines = BufReader::new(payload.reader).lines();

        let records = stream::unfold(Some((lines, 0usize)), move |state| {
            let name = name.clone();
            async move {
                let (mut lines, mut line_number) = state?;
                loop {
                    line_number += 1;
                    match lines.next_line().await {
                        Ok(None) => return None,
                        Ok(Some(line)) if line.trim().is_empty() => continue,
                        Ok(Some(line)) => {
                            let parsed = serde_json::from_str::<Value>(line.trim())
                                .map_err(|e| Error::Parse {
                                    payload: name.clone(),
                                    message: format!("line {}: {}", line_number, e),
                                })
                                .and_then(DataItem::try_from);
                            let next = parsed.is_ok().then_some((lines, line_number));
                            return Some((parsed, next));
                        }
                        Err(err) => return Some((Err(Error::Io(err)), None)),
                    }
                }
            }
        })
        .boxed();
        Ok(records)
    }
}
