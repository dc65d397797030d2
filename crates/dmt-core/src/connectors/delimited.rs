//! CSV formatter and parser

use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::check_delimiter;
use crate::error::{Error, Result};
use crate::extension::{Extension, Payload, RecordFormatter, RecordParser};
use crate::record::{DataItem, RecordStream};
use crate::settings::{ExtensionSettings, FieldSpec, SettingsSchema, Violation, check_typed};

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CsvFormatterSettings {
    #[serde(default = "default_delimiter")]
    delimiter: String,
    #[serde(default = "default_true")]
    include_header: bool,
}

impl SettingsSchema for CsvFormatterSettings {
    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::string("Delimiter").default_value(","),
            FieldSpec::boolean("IncludeHeader").default_value(true),
        ]
    }

    fn validate(&self) -> Vec<Violation> {
        check_delimiter("Delimiter", &self.delimiter).into_iter().collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CsvParserSettings {
    #[serde(default = "default_delimiter")]
    delimiter: String,
    #[serde(default = "default_true")]
    has_header: bool,
}

impl SettingsSchema for CsvParserSettings {
    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::string("Delimiter").default_value(","),
            FieldSpec::boolean("HasHeader").default_value(true),
        ]
    }

    fn validate(&self) -> Vec<Violation> {
        check_delimiter("Delimiter", &self.delimiter).into_iter().collect()
    }
}

fn delimiter_byte(delimiter: &str) -> Result<u8> {
    match check_delimiter("Delimiter", delimiter) {
        None => Ok(delimiter.as_bytes()[0]),
        Some(violation) => Err(Error::ConfigInvalid {
            message: format!("{} {}", violation.setting, violation.message),
        }),
    }
}

/// Writes records as delimited text
///
/// Columns come from the first record. Later records are written in that
/// column order; missing fields are empty and extra fields are dropped.
/// Nested values are JSON encoded.
pub struct CsvFormatter;

impl Extension for CsvFormatter {
    fn name(&self) -> &str {
        "CSV"
    }

    fn settings(&self) -> Vec<FieldSpec> {
        CsvFormatterSettings::fields()
    }

    fn check(&self, settings: &ExtensionSettings) -> Vec<Violation> {
        check_typed::<CsvFormatterSettings>(settings)
    }

    fn module_ref(&self) -> Option<String> {
        Some(module_path!().to_string())
    }
}

#[async_trait]
impl RecordFormatter for CsvFormatter {
    async fn format(
        &self,
        mut records: RecordStream,
        settings: &ExtensionSettings,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let settings: CsvFormatterSettings = settings.bind()?;
        let mut builder = csv::WriterBuilder::new();
        builder
            .delimiter(delimiter_byte(&settings.delimiter)?)
            .has_headers(false);

        let mut columns: Option<Vec<String>> = None;
        let mut count = 0u64;

        while let Some(item) = records.next().await {
            if cancel.is_cancelled() {
                return Err(Error::Canceled);
            }
            let item = item?;
            let mut writer = builder.from_writer(Vec::new());

            if columns.is_none() {
                let names: Vec<String> = item.field_names().map(str::to_string).collect();
                if settings.include_header {
                    writer.write_record(&names)?;
                }
                columns = Some(names);
            }
            let columns = columns.as_deref().unwrap_or_default();

            writer.write_record(columns.iter().map(|column| cell(item.get(column))))?;
            let bytes = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
            out.write_all(&bytes).await?;
            count += 1;
        }

        out.flush().await?;
        Ok(count)
    }
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Reads delimited text into records of string fields
///
/// Without a header row, fields are named `column1`, `column2`, ... The
/// whole payload is buffered before parsing.
pub struct CsvParser;

impl Extension for CsvParser {
    fn name(&self) -> &str {
        "CSV"
    }

    fn settings(&self) -> Vec<FieldSpec> {
        CsvParserSettings::fields()
    }

    fn check(&self, settings: &ExtensionSettings) -> Vec<Violation> {
        check_typed::<CsvParserSettings>(settings)
    }

    fn module_ref(&self) -> Option<String> {
        Some(module_path!().to_string())
    }
}

#[async_trait]
impl RecordParser for CsvParser {
    async fn parse(
        &self,
        mut payload: Payload,
        settings: &ExtensionSettings,
    ) -> Result<RecordStream> {
        let settings: CsvParserSettings = settings.bind()?;
        let mut bytes = Vec::new();
        payload.reader.read_to_end(&mut bytes).await?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter_byte(&settings.delimiter)?)
            .has_headers(settings.has_header)
            .from_reader(std::io::Cursor::new(bytes));

        let name = payload.name;
        let headers: Option<Vec<String>> = if settings.has_header {
            let headers = reader.headers().map_err(|e| parse_error(&name, e))?;
            let mut seen = HashSet::new();
            if let Some(duplicate) = headers.iter().find(|column| !seen.insert(*column)) {
                return Err(Error::Parse {
                    payload: name,
                    message: format!("line 1: column '{}' appears more than once", duplicate),
                });
            }
            Some(headers.iter().map(str::to_string).collect())
        } else {
            None
        };

        let records = reader.into_records().map(move |row| {
            let row = row.map_err(|e| parse_error(&name, e))?;
            let item = row
                .iter()
                .enumerate()
                .map(|(index, field)| {
                    let key = match &headers {
                        Some(headers) => headers[index].clone(),
                        None => format!("column{}", index + 1),
                    };
                    (key, Value::String(field.to_string()))
                })
                .collect::<serde_json::Map<_, _>>();
            Ok(DataItem::from(item))
        });

        Ok(stream::iter(records).boxed())
    }
}

fn parse_error(payload: &str, err: csv::Error) -> Error {
    let message = match err.position() {
        Some(position) => format!("line {}: {}", position.line(), err),
        None => err.to_string(),
    };
    Error::Parse {
        payload: payload.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn format(values: Vec<Value>, settings: ExtensionSettings) -> String {
        let records = stream::iter(values.into_iter().map(DataItem::try_from)).boxed();
        let mut out = Vec::new();
        CsvFormatter
            .format(records, &settings, &mut out, &CancellationToken::new())
            .await
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    async fn parse(text: &'static str, settings: ExtensionSettings) -> Vec<Result<DataItem>> {
        let payload = Payload {
            name: "people.csv".to_string(),
            reader: Box::new(text.as_bytes()),
        };
        CsvParser
            .parse(payload, &settings)
            .await
            .unwrap()
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_header_from_first_record() {
        let text = format(
            vec![
                json!({"id": 1, "name": "Ada, Countess", "tags": ["a", "b"]}),
                json!({"name": "Alan", "id": 2, "extra": true}),
                json!({"id": 3}),
            ],
            ExtensionSettings::new(),
        )
        .await;

        assert_eq!(
            text,
            "id,name,tags\n1,\"Ada, Countess\",\"[\"\"a\"\",\"\"b\"\"]\"\n2,Alan,\n3,,\n"
        );
    }

    #[tokio::test]
    async fn test_delimiter_and_no_header() {
        let text = format(
            vec![json!({"a": 1, "b": null})],
            ExtensionSettings::new()
                .with("Delimiter", ";")
                .with("IncludeHeader", false),
        )
        .await;
        assert_eq!(text, "1;\n");
    }

    #[tokio::test]
    async fn test_parse_with_header() {
        let items = parse("id,name\n1,Ada\n2,\"Alan, T\"\n", ExtensionSettings::new()).await;
        assert_eq!(items.len(), 2);
        let second = items[1].as_ref().unwrap();
        assert_eq!(second.get("name"), Some(&json!("Alan, T")));
        assert_eq!(second.field_names().collect::<Vec<_>>(), vec!["id", "name"]);
    }

    #[tokio::test]
    async fn test_parse_without_header() {
        let items = parse(
            "1\tAda\n",
            ExtensionSettings::new()
                .with("Delimiter", "\t")
                .with("HasHeader", false),
        )
        .await;
        let item = items[0].as_ref().unwrap();
        assert_eq!(item.get("column1"), Some(&json!("1")));
        assert_eq!(item.get("column2"), Some(&json!("Ada")));
    }

    #[tokio::test]
    async fn test_ragged_row_is_a_parse_error() {
        let items = parse("id,name\n1,Ada\n2\n", ExtensionSettings::new()).await;
        assert!(items[0].is_ok());
        let err = items[1].as_ref().unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(err.to_string().contains("people.csv"));
    }

    #[tokio::test]
    async fn test_duplicate_header_is_a_parse_error() {
        let payload = Payload {
            name: "people.csv".to_string(),
            reader: Box::new(&b"id,name,name\n1,Ada,Lovelace\n"[..]),
        };
        let err = match CsvParser.parse(payload, &ExtensionSettings::new()).await {
            Err(err) => err,
            Ok(_) => panic!("duplicate columns must not be merged"),
        };
        assert!(matches!(err, Error::Parse { .. }));
        assert!(err.to_string().contains("column 'name' appears more than once"));
    }

    #[test]
    fn test_check_rejects_long_delimiter() {
        let violations = CsvFormatter.check(&ExtensionSettings::new().with("Delimiter", "||"));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].setting, "Delimiter");
    }
}
