//! dmt Core Library
//!
//! This crate provides the core functionality for dmt:
//! - Settings schemas declared by each extension and their validation
//! - Extension registry and the manifests it publishes
//! - The streaming migration pipeline (direct and composable sinks)
//! - Migration documents and the equivalent command line
//! - Built-in file, blob and SQLite connectors
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Registry   │────▶│  Document   │────▶│  Pipeline   │
//! │ (Manifest)  │     │  (Settings) │     │  (Stream)   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use dmt_core::{ExtensionRegistry, MigrationRun, build_document};
//! use tokio_util::sync::CancellationToken;
//!
//! let registry = ExtensionRegistry::builtin();
//! let document = build_document("JSON-File", "CSV-File", source_settings, sink_settings);
//! let mut run = MigrationRun::from_registry(&registry, &document.source, &document.sink,
//!     document.source_settings.clone(), document.sink_settings.clone())?;
//! let outcome = run.execute(&CancellationToken::new()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connectors;
pub mod document;
pub mod error;
pub mod extension;
pub mod manifest;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod settings;

pub use config::Config;
pub use document::{MigrationDocument, Operation, build_command, build_document};
pub use error::{Error, Result};
pub use extension::{
    ByteSource, ByteTarget, DataSink, DataSource, Extension, RecordFormatter, RecordParser,
    SourceContext, WriteSummary,
};
pub use manifest::{CombinedManifest, Direction, ExtensionManifest, ExtensionManifestItem, combine};
pub use pipeline::{MigrationRun, RunOutcome, RunState, RunSummary};
pub use record::{DataItem, RecordStream};
pub use registry::{ExtensionRegistry, Plugin};
pub use settings::{
    ExtensionSettings, FieldSpec, SettingEnum, SettingProperty, SettingType, SettingsSchema,
    ValidationReport, Violation,
};
