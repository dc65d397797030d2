//! Built-in connectors
//!
//! Connectors are adapters for external systems. The built-in set covers
//! local development and small migrations:
//!
//! | kind         | names                |
//! |--------------|----------------------|
//! | byte source  | `File`               |
//! | parser       | `JSON`, `JSONL`, `CSV` |
//! | formatter    | `JSON`, `JSONL`, `CSV` |
//! | byte target  | `File`, `Blob`       |
//! | direct sink  | `SQLite`             |

use std::sync::Arc;

use crate::registry::Plugin;
use crate::settings::Violation;

mod blob;
mod delimited;
mod file;
mod json;
mod sqlite;

pub use blob::{BlobTarget, LocalBlockStore};
pub use delimited::{CsvFormatter, CsvParser};
pub use file::{FileByteSource, FileTarget};
pub use json::{JsonFormatter, JsonParser, JsonlFormatter, JsonlParser};
pub use sqlite::SqliteSink;

/// Registration table of every built-in connector
pub fn builtin_plugins() -> Vec<Plugin> {
    vec![
        Plugin::ByteSource(Arc::new(FileByteSource)),
        Plugin::Parser(Arc::new(JsonParser)),
        Plugin::Parser(Arc::new(JsonlParser)),
        Plugin::Parser(Arc::new(CsvParser)),
        Plugin::Formatter(Arc::new(JsonFormatter)),
        Plugin::Formatter(Arc::new(JsonlFormatter)),
        Plugin::Formatter(Arc::new(CsvFormatter)),
        Plugin::Target(Arc::new(FileTarget)),
        Plugin::Target(Arc::new(BlobTarget)),
        Plugin::Sink(Arc::new(SqliteSink)),
    ]
}

/// Check that `value` is a plain SQL identifier
///
/// Letters, digits and underscores, not starting with a digit, at most 63
/// bytes.
pub(crate) fn check_identifier(setting: &str, value: &str) -> Option<Violation> {
    let message = if value.is_empty() {
        "must not be empty"
    } else if value.len() > 63 {
        "must be at most 63 characters"
    } else if value.starts_with(|c: char| c.is_ascii_digit()) {
        "must start with a letter or underscore"
    } else if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        "may only contain letters, digits and underscores"
    } else {
        return None;
    };
    Some(Violation::new(setting, message))
}

/// Check that `value` is a single ASCII delimiter character
pub(crate) fn check_delimiter(setting: &str, value: &str) -> Option<Violation> {
    match value.as_bytes() {
        [byte] if byte.is_ascii() && *byte != b'"' && *byte != b'\n' => None,
        _ => Some(Violation::new(
            setting,
            "must be a single ASCII character other than a quote or newline",
        )),
    }
}
