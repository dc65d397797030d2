//! Migration execution engine

use anyhow::Context;
use dmt_core::{Config, ExtensionRegistry, MigrationDocument, MigrationRun, RunState, RunSummary};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::jobs::MigrationJob;

/// Outcome of one operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationReport {
    /// Operation label
    pub label: String,
    /// Document the operation belongs to, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    /// Terminal state of the run
    pub state: RunState,
    /// Counters, when streaming started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    /// Failure message, for failed runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-operation outcomes of one document, in execution order
///
/// Operations after a failed or canceled one are not run and do not appear.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationReport {
    /// Operations that ran
    pub operations: Vec<OperationReport>,
}

impl MigrationReport {
    /// True when every operation ran and completed
    pub fn is_success(&self, expected: usize) -> bool {
        self.operations.len() == expected
            && self
                .operations
                .iter()
                .all(|op| op.state == RunState::Completed)
    }

    /// True when the last operation was stopped through the token
    pub fn was_canceled(&self) -> bool {
        self.operations
            .last()
            .is_some_and(|op| op.state == RunState::Canceled)
    }

    /// The failed operation, if any
    pub fn failure(&self) -> Option<&OperationReport> {
        self.operations.iter().find(|op| op.state == RunState::Failed)
    }

    /// Records written across all operations
    pub fn records_written(&self) -> u64 {
        self.operations
            .iter()
            .filter_map(|op| op.summary.as_ref())
            .map(|summary| summary.records_written)
            .sum()
    }
}

/// Runtime engine for executing migration documents
pub struct Runtime {
    registry: Arc<ExtensionRegistry>,
}

impl Runtime {
    /// Create a runtime over an existing registry
    pub fn new(registry: Arc<ExtensionRegistry>) -> Self {
        Self { registry }
    }

    /// Create a runtime with the built-in connectors, as configured
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(ExtensionRegistry::from_config(config)))
    }

    /// The registry jobs are resolved against
    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    /// Resolve and validate every operation of `document` without any I/O
    pub fn validate(&self, document: &MigrationDocument) -> Result<()> {
        for job in MigrationJob::from_document(document) {
            let run = self.prepare(&job)?;
            run.validate()
                .with_context(|| format!("operation '{}' has invalid settings", job.label))?;
        }
        Ok(())
    }

    /// Run every operation of `document` in order
    ///
    /// Stops at the first failure or cancellation; both are recorded in the
    /// report rather than returned. An unknown extension name is an error.
    pub async fn execute(
        &self,
        document: &MigrationDocument,
        cancel: &CancellationToken,
    ) -> Result<MigrationReport> {
        self.execute_jobs(&MigrationJob::from_document(document), cancel)
            .await
    }

    /// Run `jobs` in order with the same stop rules as [`Runtime::execute`]
    pub async fn execute_jobs(
        &self,
        jobs: &[MigrationJob],
        cancel: &CancellationToken,
    ) -> Result<MigrationReport> {
        if let Some(first) = jobs.first() {
            tracing::info!(
                document = first.metadata.document.as_deref().unwrap_or("-"),
                source = %first.source,
                sink = %first.sink,
                operations = jobs.len(),
                "Starting migration"
            );
        }

        let mut report = MigrationReport::default();
        for job in jobs {
            let operation = self.execute_job(job, cancel).await?;
            let stop = operation.state != RunState::Completed;
            report.operations.push(operation);
            if stop {
                break;
            }
        }

        tracing::info!(
            ran = report.operations.len(),
            records = report.records_written(),
            "Migration finished"
        );
        Ok(report)
    }

    /// Run a single job
    pub async fn execute_job(
        &self,
        job: &MigrationJob,
        cancel: &CancellationToken,
    ) -> Result<OperationReport> {
        let mut run = self.prepare(job)?;
        tracing::info!(
            operation = %job.label,
            index = job.metadata.index + 1,
            total = job.metadata.total,
            run_id = %run.id(),
            "Starting operation"
        );

        let report = match run.execute(cancel).await {
            Ok(outcome) => OperationReport {
                label: job.label.clone(),
                document: job.metadata.document.clone(),
                state: outcome.state(),
                summary: Some(outcome.summary().clone()),
                error: None,
            },
            Err(err) => OperationReport {
                label: job.label.clone(),
                document: job.metadata.document.clone(),
                state: RunState::Failed,
                summary: None,
                error: Some(err.to_string()),
            },
        };
        Ok(report)
    }

    fn prepare(&self, job: &MigrationJob) -> Result<MigrationRun> {
        MigrationRun::from_registry(
            &self.registry,
            &job.source,
            &job.sink,
            job.source_settings.clone(),
            job.sink_settings.clone(),
        )
        .with_context(|| format!("operation '{}' cannot be prepared", job.label))
    }
}
