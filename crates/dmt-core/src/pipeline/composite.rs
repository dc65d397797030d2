//! Composite extensions built from two reusable halves
//!
//! A [`ComposableSink`] runs a formatter and a byte target concurrently,
//! joined by a bounded in-memory pipe:
//!
//! ```text
//! records ──▶ RecordFormatter ──▶ [duplex pipe] ──▶ ByteTarget ──▶ destination
//! ```
//!
//! The pipe applies backpressure, so the payload is never fully buffered.
//! A [`ComposableSource`] does the reverse with a byte source and a parser.

use async_trait::async_trait;
use futures::{StreamExt, stream};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::extension::{
    ByteSource, ByteTarget, DataSink, DataSource, Extension, RecordFormatter, RecordParser,
    SourceContext, WriteSummary,
};
use crate::record::RecordStream;
use crate::settings::{ExtensionSettings, FieldSpec, Violation};

/// Default pipe buffer between formatter and target (64 KiB)
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Sink made of a formatter and a byte target
pub struct ComposableSink {
    name: String,
    formatter: Arc<dyn RecordFormatter>,
    target: Arc<dyn ByteTarget>,
    pipe_capacity: usize,
}

impl ComposableSink {
    /// Pair `formatter` with `target` as `"{formatter}-{target}"`
    pub fn new(formatter: Arc<dyn RecordFormatter>, target: Arc<dyn ByteTarget>) -> Self {
        Self {
            name: format!("{}-{}", formatter.name(), target.name()),
            formatter,
            target,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }

    /// Set the pipe buffer size
    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity.max(1);
        self
    }
}

impl Extension for ComposableSink {
    fn name(&self) -> &str {
        &self.name
    }

    /// Target settings first, then formatter settings
    fn settings(&self) -> Vec<FieldSpec> {
        let mut fields = self.target.settings();
        fields.extend(self.formatter.settings());
        fields
    }

    fn check(&self, settings: &ExtensionSettings) -> Vec<Violation> {
        let mut violations = self.target.check(settings);
        violations.extend(self.formatter.check(settings));
        violations
    }

    fn version(&self) -> Option<String> {
        self.formatter.version()
    }

    fn module_ref(&self) -> Option<String> {
        Some(format!(
            "formatter:{}+target:{}",
            self.formatter.name(),
            self.target.name()
        ))
    }
}

#[async_trait]
impl DataSink for ComposableSink {
    async fn write(
        &self,
        records: RecordStream,
        settings: &ExtensionSettings,
        _source: &SourceContext,
        cancel: &CancellationToken,
    ) -> Result<WriteSummary> {
        let (mut writer, mut reader) = tokio::io::duplex(self.pipe_capacity);
        // The target stops on this token alone; a failed formatter cancels
        // it before the target can see end of stream.
        let stop = cancel.child_token();
        let abort = stop.clone();

        let format = async move {
            let result = match self
                .formatter
                .format(records, settings, &mut writer, cancel)
                .await
            {
                Ok(count) => writer.shutdown().await.map(|_| count).map_err(Error::from),
                Err(err) => Err(err),
            };
            if result.is_err() {
                abort.cancel();
            }
            drop(writer);
            result
        };

        let store = async move {
            let result = self.target.store(&mut reader, settings, &stop).await;
            // Unblocks the formatter when the target gives up early
            drop(reader);
            result
        };

        let (formatted, stored) = tokio::join!(format, store);
        tracing::debug!(
            sink = %self.name,
            formatted = formatted.is_ok(),
            stored = stored.is_ok(),
            "composite sink finished"
        );

        match (formatted, stored) {
            (Ok(records), Ok(bytes)) => Ok(WriteSummary {
                records,
                bytes: Some(bytes),
            }),
            _ if cancel.is_cancelled() => Err(Error::Canceled),
            (Err(Error::Io(err)), Err(target)) if err.kind() == ErrorKind::BrokenPipe => {
                Err(target)
            }
            (Err(err), _) => Err(err),
            (Ok(_), Err(err)) => Err(err),
        }
    }
}

/// Source made of a byte source and a parser
pub struct ComposableSource {
    name: String,
    parser: Arc<dyn RecordParser>,
    source: Arc<dyn ByteSource>,
}

impl ComposableSource {
    /// Pair `parser` with `source` as `"{parser}-{source}"`
    pub fn new(parser: Arc<dyn RecordParser>, source: Arc<dyn ByteSource>) -> Self {
        Self {
            name: format!("{}-{}", parser.name(), source.name()),
            parser,
            source,
        }
    }
}

impl Extension for ComposableSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> Vec<FieldSpec> {
        let mut fields = self.source.settings();
        fields.extend(self.parser.settings());
        fields
    }

    fn check(&self, settings: &ExtensionSettings) -> Vec<Violation> {
        let mut violations = self.source.check(settings);
        violations.extend(self.parser.check(settings));
        violations
    }

    fn version(&self) -> Option<String> {
        self.parser.version()
    }

    fn module_ref(&self) -> Option<String> {
        Some(format!(
            "parser:{}+source:{}",
            self.parser.name(),
            self.source.name()
        ))
    }
}

#[async_trait]
impl DataSource for ComposableSource {
    async fn read(
        &self,
        settings: &ExtensionSettings,
        cancel: &CancellationToken,
    ) -> Result<RecordStream> {
        let payloads = self.source.open(settings, cancel).await?;
        let parser = self.parser.clone();
        let settings = settings.clone();

        let records = payloads
            .then(move |payload| {
                let parser = parser.clone();
                let settings = settings.clone();
                async move {
                    let payload = payload?;
                    tracing::debug!(payload = %payload.name, "parsing payload");
                    parser.parse(payload, &settings).await
                }
            })
            .map(|parsed| match parsed {
                Ok(records) => records,
                Err(err) => stream::once(async move { Err(err) }).boxed(),
            })
            .flatten()
            .boxed();
        Ok(records)
    }
}
