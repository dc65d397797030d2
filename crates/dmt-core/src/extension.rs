//! Extension capabilities
//!
//! Extensions come in a few shapes. Direct ones ([`DataSource`],
//! [`DataSink`]) handle records end to end. Composable ones split the work so
//! halves can be reused across connectors:
//!
//! ```text
//! ByteSource ──payload──▶ RecordParser ──records──▶ ...
//! ...  ──records──▶ RecordFormatter ──bytes──▶ ByteTarget
//! ```
//!
//! The registry pairs every parser with every byte source, and every
//! formatter with every target, so one `File` target serves the JSON, JSONL
//! and CSV formatters alike.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::record::RecordStream;
use crate::settings::{ExtensionSettings, FieldSpec, Violation};

/// Behaviour shared by every extension
pub trait Extension: Send + Sync {
    /// Name used as the lookup key in manifests
    fn name(&self) -> &str;

    /// Declared settings in declaration order
    fn settings(&self) -> Vec<FieldSpec>;

    /// Extension-specific checks on already type-checked settings
    fn check(&self, _settings: &ExtensionSettings) -> Vec<Violation> {
        Vec::new()
    }

    /// Version reported in manifests
    fn version(&self) -> Option<String> {
        Some(env!("CARGO_PKG_VERSION").to_string())
    }

    /// Where the implementation lives, published as `assemblyOrModuleRef`
    fn module_ref(&self) -> Option<String> {
        None
    }
}

/// Information about the source a sink is fed from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContext {
    /// Source extension name
    pub extension: String,
}

/// What a sink reports after consuming its stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    /// Records written
    pub records: u64,
    /// Bytes persisted, for byte-oriented sinks
    pub bytes: Option<u64>,
}

/// Produces records
#[async_trait]
pub trait DataSource: Extension {
    /// Open a lazy record stream over validated settings
    async fn read(
        &self,
        settings: &ExtensionSettings,
        cancel: &CancellationToken,
    ) -> Result<RecordStream>;
}

/// Consumes records
#[async_trait]
pub trait DataSink: Extension {
    /// Drain `records` into the destination
    ///
    /// Implementations pull one record at a time and return
    /// [`crate::Error::Canceled`] instead of starting new writes once `cancel`
    /// is signaled.
    async fn write(
        &self,
        records: RecordStream,
        settings: &ExtensionSettings,
        source: &SourceContext,
        cancel: &CancellationToken,
    ) -> Result<WriteSummary>;
}

/// Serializes records into one outgoing byte stream, in a single pass
#[async_trait]
pub trait RecordFormatter: Extension {
    /// Write every record to `out`; returns the number of records written
    async fn format(
        &self,
        records: RecordStream,
        settings: &ExtensionSettings,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<u64>;
}

/// Durably persists a byte stream
#[async_trait]
pub trait ByteTarget: Extension {
    /// Copy `input` to the destination; returns the number of bytes stored
    ///
    /// When `cancel` is signaled, in-flight writes may finish but nothing is
    /// committed afterwards.
    async fn store(
        &self,
        input: &mut (dyn AsyncRead + Send + Unpin),
        settings: &ExtensionSettings,
        cancel: &CancellationToken,
    ) -> Result<u64>;
}

/// A raw payload handed out by a [`ByteSource`]
pub struct Payload {
    /// Where the payload came from (file path, object key)
    pub name: String,
    /// Payload bytes
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload").field("name", &self.name).finish()
    }
}

/// Stream of raw payloads
pub type PayloadStream = BoxStream<'static, Result<Payload>>;

/// Hands out pre-formatted payloads
#[async_trait]
pub trait ByteSource: Extension {
    /// Lazily open every payload described by `settings`
    async fn open(
        &self,
        settings: &ExtensionSettings,
        cancel: &CancellationToken,
    ) -> Result<PayloadStream>;
}

/// Turns one payload into records
#[async_trait]
pub trait RecordParser: Extension {
    /// Parse `payload` into a record stream
    async fn parse(&self, payload: Payload, settings: &ExtensionSettings) -> Result<RecordStream>;
}
