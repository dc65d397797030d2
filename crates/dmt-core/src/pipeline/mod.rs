//! Migration pipeline
//!
//! One [`MigrationRun`] moves records from one source to one sink:
//!
//! ```text
//! Idle ──▶ Validating ──▶ Streaming ──▶ Completed | Canceled | Failed
//! ```
//!
//! Validation checks both settings maps and reports every violation before
//! any I/O. Streaming is pull-driven: the sink asks for the next record only
//! after it has dealt with the current one, and the cancellation token is
//! checked at every record boundary.

mod batch;
mod chunked;
mod composite;

pub use batch::{BatchStats, write_in_batches};
pub use chunked::{BlockStore, ChunkedUpload, block_id, upload_chunked};
pub use composite::{ComposableSink, ComposableSource, DEFAULT_PIPE_CAPACITY};

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::extension::{SourceContext, WriteSummary};
use crate::record::RecordStream;
use crate::registry::{ExtensionRegistry, SinkEntry, SourceEntry};
use crate::settings::{
    ExtensionSettings, SettingProperty, ValidationReport, Violation, validate_settings,
};

/// Scope prefix for source setting violations
pub const SOURCE_SCOPE: &str = "SourceSettings";
/// Scope prefix for sink setting violations
pub const SINK_SCOPE: &str = "SinkSettings";

/// Where a run is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    /// Created, not started
    Idle,
    /// Checking settings
    Validating,
    /// Moving records
    Streaming,
    /// Every record was written
    Completed,
    /// Stopped through the cancellation token
    Canceled,
    /// Validation, read or write failure
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Validating => "validating",
            RunState::Streaming => "streaming",
            RunState::Completed => "completed",
            RunState::Canceled => "canceled",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Records pulled from the source
    pub records_read: u64,
    /// Records the sink reported as written
    pub records_written: u64,
    /// Bytes persisted, for byte-oriented sinks
    pub bytes_written: Option<u64>,
    /// Wall time spent streaming
    pub elapsed: Duration,
}

/// How a run that did not fail ended
///
/// Failures are returned as `Err`; cancellation is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every record was written
    Completed(RunSummary),
    /// Stopped through the cancellation token
    Canceled(RunSummary),
}

impl RunOutcome {
    /// Terminal state this outcome represents
    pub fn state(&self) -> RunState {
        match self {
            RunOutcome::Completed(_) => RunState::Completed,
            RunOutcome::Canceled(_) => RunState::Canceled,
        }
    }

    /// Counters of the run
    pub fn summary(&self) -> &RunSummary {
        match self {
            RunOutcome::Completed(summary) | RunOutcome::Canceled(summary) => summary,
        }
    }

    /// True for [`RunOutcome::Completed`]
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

/// One source → sink migration
pub struct MigrationRun {
    id: Uuid,
    source: SourceEntry,
    sink: SinkEntry,
    source_settings: ExtensionSettings,
    sink_settings: ExtensionSettings,
    state: RunState,
}

impl MigrationRun {
    /// Prepare a run from resolved extensions and user settings
    pub fn new(
        source: SourceEntry,
        sink: SinkEntry,
        source_settings: ExtensionSettings,
        sink_settings: ExtensionSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            sink,
            source_settings,
            sink_settings,
            state: RunState::Idle,
        }
    }

    /// Look both extensions up in `registry` and prepare a run
    pub fn from_registry(
        registry: &ExtensionRegistry,
        source: &str,
        sink: &str,
        source_settings: ExtensionSettings,
        sink_settings: ExtensionSettings,
    ) -> Result<Self> {
        let catalog = registry.catalog();
        let source = catalog.source(source)?.clone();
        let sink = catalog.sink(sink)?.clone();
        Ok(Self::new(source, sink, source_settings, sink_settings))
    }

    /// Run id used in logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Check both settings maps and return them resolved
    ///
    /// Every violation from both sides ends up in one [`ValidationReport`].
    pub fn validate(&self) -> Result<(ExtensionSettings, ExtensionSettings)> {
        let mut report = ValidationReport::new();
        let source = resolve(
            &self.source.item.settings,
            &self.source_settings,
            |s| self.source.extension.check(s),
            SOURCE_SCOPE,
            &mut report,
        );
        let sink = resolve(
            &self.sink.item.settings,
            &self.sink_settings,
            |s| self.sink.extension.check(s),
            SINK_SCOPE,
            &mut report,
        );

        match (source, sink) {
            (Some(source), Some(sink)) if report.is_empty() => Ok((source, sink)),
            _ => Err(Error::Validation(report)),
        }
    }

    /// Validate, then stream every record from the source into the sink
    pub async fn execute(&mut self, cancel: &CancellationToken) -> Result<RunOutcome> {
        let span = tracing::info_span!(
            "migration",
            run_id = %self.id,
            source = %self.source.item.name,
            sink = %self.sink.item.name,
        );
        self.execute_inner(cancel).instrument(span).await
    }

    async fn execute_inner(&mut self, cancel: &CancellationToken) -> Result<RunOutcome> {
        self.state = RunState::Validating;
        let (source_settings, sink_settings) = match self.validate() {
            Ok(resolved) => resolved,
            Err(err) => {
                self.state = RunState::Failed;
                tracing::warn!("{}", err);
                return Err(err);
            }
        };
        tracing::debug!(
            source_settings = %redacted_json(&source_settings, &self.source.item.settings),
            sink_settings = %redacted_json(&sink_settings, &self.sink.item.settings),
            "settings validated"
        );

        if cancel.is_cancelled() {
            self.state = RunState::Canceled;
            tracing::info!("migration canceled before streaming");
            return Ok(RunOutcome::Canceled(RunSummary::default()));
        }

        self.state = RunState::Streaming;
        tracing::info!("streaming records");
        let started = Instant::now();
        let stats = Arc::new(StreamStats::default());
        let result = self
            .stream(&source_settings, &sink_settings, cancel, stats.clone())
            .await;

        let mut summary = RunSummary {
            records_read: stats.records.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
            ..Default::default()
        };

        match result {
            Ok(written) => {
                summary.records_written = written.records;
                summary.bytes_written = written.bytes;
                if stats.interrupted.load(Ordering::SeqCst) {
                    self.state = RunState::Canceled;
                    tracing::info!(records = summary.records_read, "migration canceled");
                    Ok(RunOutcome::Canceled(summary))
                } else {
                    self.state = RunState::Completed;
                    tracing::info!(
                        records = summary.records_written,
                        elapsed_ms = summary.elapsed.as_millis() as u64,
                        "migration completed"
                    );
                    Ok(RunOutcome::Completed(summary))
                }
            }
            Err(Error::Canceled) => {
                self.state = RunState::Canceled;
                tracing::info!(records = summary.records_read, "migration canceled");
                Ok(RunOutcome::Canceled(summary))
            }
            Err(err) => {
                self.state = RunState::Failed;
                tracing::error!(records = summary.records_read, "migration failed: {}", err);
                Err(err)
            }
        }
    }

    async fn stream(
        &self,
        source_settings: &ExtensionSettings,
        sink_settings: &ExtensionSettings,
        cancel: &CancellationToken,
        stats: Arc<StreamStats>,
    ) -> Result<WriteSummary> {
        let source_name = self.source.item.name.clone();
        let sink_name = &self.sink.item.name;

        let records = self
            .source
            .extension
            .read(source_settings, cancel)
            .await
            .map_err(|err| classify_source(&source_name, err))?;
        let records = guard(records, cancel.clone(), stats, source_name.clone());

        let context = SourceContext {
            extension: source_name,
        };
        self.sink
            .extension
            .write(records, sink_settings, &context, cancel)
            .await
            .map_err(|err| classify_sink(sink_name, err))
    }
}

fn resolve(
    schema: &[SettingProperty],
    settings: &ExtensionSettings,
    check: impl Fn(&ExtensionSettings) -> Vec<Violation>,
    scope: &str,
    report: &mut ValidationReport,
) -> Option<ExtensionSettings> {
    match validate_settings(schema, settings) {
        Ok(resolved) => {
            let violations = check(&resolved);
            if violations.is_empty() {
                Some(resolved)
            } else {
                report.extend_scoped(scope, violations);
                None
            }
        }
        Err(violations) => {
            report.extend_scoped(scope, violations);
            None
        }
    }
}

fn redacted_json(settings: &ExtensionSettings, schema: &[SettingProperty]) -> String {
    serde_json::to_string(&settings.redacted(schema)).unwrap_or_default()
}

fn classify_source(source: &str, err: Error) -> Error {
    match err {
        Error::Canceled | Error::SourceRead { .. } => err,
        other => Error::source_read(source, other),
    }
}

fn classify_sink(sink: &str, err: Error) -> Error {
    match err {
        Error::Canceled | Error::SourceRead { .. } | Error::SinkWrite { .. } => err,
        other => Error::sink_write(sink, other),
    }
}

#[derive(Debug, Default)]
struct StreamStats {
    records: AtomicU64,
    interrupted: AtomicBool,
}

/// Wrap a source stream so it stops pulling once `cancel` is signaled
///
/// After cancellation the stream yields one `Err(Error::Canceled)` and ends
/// without polling the source again.
fn guard(
    inner: RecordStream,
    cancel: CancellationToken,
    stats: Arc<StreamStats>,
    source: String,
) -> RecordStream {
    stream::unfold(Some(inner), move |state| {
        let cancel = cancel.clone();
        let stats = stats.clone();
        let source = source.clone();
        async move {
            let mut inner = state?;
            if cancel.is_cancelled() {
                stats.interrupted.store(true, Ordering::SeqCst);
                return Some((Err(Error::Canceled), None));
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = inner.next() => Some(next),
            };

            match next {
                None => {
                    stats.interrupted.store(true, Ordering::SeqCst);
                    Some((Err(Error::Canceled), None))
                }
                Some(None) => None,
                Some(Some(Ok(item))) => {
                    stats.records.fetch_add(1, Ordering::SeqCst);
                    Some((Ok(item), Some(inner)))
                }
                Some(Some(Err(err))) => {
                    let err = classify_source(&source, err);
                    if err.is_canceled() {
                        stats.interrupted.store(true, Ordering::SeqCst);
                    }
                    Some((Err(err), None))
                }
            }
        }
    })
    .boxed()
}
