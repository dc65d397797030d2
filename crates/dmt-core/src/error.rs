//! Error types for dmt-core

use thiserror::Error;

use crate::manifest::Direction;
use crate::settings::ValidationReport;

/// Result type alias for dmt-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in dmt-core
///
/// Messages never carry setting values, so any variant can be logged or shown
/// to a user without leaking secrets.
#[derive(Error, Debug)]
pub enum Error {
    /// An extension declared a settings schema that cannot be extracted
    #[error("settings schema of extension '{extension}' is invalid: {message}")]
    SchemaExtraction {
        /// Name of the offending extension
        extension: String,
        /// Description of the malformed declaration
        message: String,
    },

    /// Two extensions were registered under the same name
    #[error("duplicate {direction} extension '{name}'")]
    DuplicateExtension {
        /// Direction the name collides in
        direction: Direction,
        /// Colliding name
        name: String,
    },

    /// No extension with this name exists in the catalog
    #[error("unknown {direction} extension '{name}'")]
    UnknownExtension {
        /// Direction that was searched
        direction: Direction,
        /// Name that was requested
        name: String,
    },

    /// One or more settings failed validation
    #[error("settings validation failed:\n{0}")]
    Validation(ValidationReport),

    /// Reading from the source failed after streaming began
    #[error("source '{extension}' failed: {message}")]
    SourceRead {
        /// Source extension name
        extension: String,
        /// Description of the failure
        message: String,
    },

    /// Writing to the sink failed after streaming began
    #[error("sink '{extension}' failed: {message}")]
    SinkWrite {
        /// Sink extension name
        extension: String,
        /// Description of the failure
        message: String,
    },

    /// The run was canceled through its cancellation token
    #[error("migration canceled")]
    Canceled,

    /// A payload could not be parsed into records
    #[error("failed to parse '{payload}': {message}")]
    Parse {
        /// Payload name (file path, object key)
        payload: String,
        /// Parser message, with the position when known
        message: String,
    },

    /// A value cannot be used as a record
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of what's invalid
        message: String,
    },

    /// Migration document is structurally invalid
    #[error("invalid migration document: {message}")]
    InvalidDocument {
        /// Description of what's invalid
        message: String,
    },

    /// Configuration file could not be found
    #[error("configuration file not found: {path}")]
    ConfigNotFound {
        /// Path that was searched
        path: String,
    },

    /// Failed to parse YAML configuration or document
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {message}")]
    ConfigInvalid {
        /// Description of what's invalid
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV reading or writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Wrap any failure raised while reading from `extension`
    pub fn source_read(extension: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Error::SourceRead {
            extension: extension.into(),
            message: err.to_string(),
        }
    }

    /// Wrap any failure raised while writing to `extension`
    pub fn sink_write(extension: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Error::SinkWrite {
            extension: extension.into(),
            message: err.to_string(),
        }
    }

    /// True for a cooperative stop rather than a failure
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }
}
