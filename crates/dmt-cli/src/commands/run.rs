//! Run migrations

use anyhow::{Context, Result};
use dmt_core::{Config, MigrationDocument};
use dmt_runtime::{MigrationJob, MigrationReport, Runtime};
use futures::{Stream, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;

use super::{SelectionArgs, selected_documents};

/// Run the selected migrations
///
/// The first Ctrl+C cancels the migration in flight and waits for it to wind
/// down; a second one aborts without waiting.
pub async fn run(config: &Config, selection: &SelectionArgs, all: bool) -> Result<()> {
    let documents = selected_documents(config, selection, all)?;
    let runtime = Runtime::from_config(config);
    let cancel = CancellationToken::new();

    tracing::info!("Running {} migration(s) (press Ctrl+C to cancel)", documents.len());

    let interrupts = futures::stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
    });
    supervise(run_documents(&runtime, &documents, &cancel), &cancel, interrupts).await
}

/// Drive `work`, canceling on the first interrupt and giving up on the second
async fn supervise<W, I>(work: W, cancel: &CancellationToken, interrupts: I) -> Result<()>
where
    W: Future<Output = Result<()>>,
    I: Stream<Item = ()>,
{
    tokio::pin!(work);
    tokio::pin!(interrupts);

    tokio::select! {
        result = &mut work => return result,
        Some(()) = interrupts.next() => {
            tracing::info!("Received interrupt, canceling (press Ctrl+C again to abort)");
            cancel.cancel();
        }
    }

    tokio::select! {
        result = &mut work => result,
        Some(()) = interrupts.next() => {
            anyhow::bail!("Aborted before the migration finished canceling")
        }
    }
}

async fn run_documents(
    runtime: &Runtime,
    documents: &[(String, MigrationDocument)],
    cancel: &CancellationToken,
) -> Result<()> {
    for (name, document) in documents {
        tracing::info!("Migration {}: {} → {}", name, document.source, document.sink);
        let jobs: Vec<_> = MigrationJob::from_document(document)
            .into_iter()
            .map(|job| job.with_document(name.as_str()))
            .collect();
        let report = runtime
            .execute_jobs(&jobs, cancel)
            .await
            .with_context(|| format!("Failed to run {}", name))?;
        print_report(&report);

        if let Some(failure) = report.failure() {
            anyhow::bail!(
                "Migration {} failed at operation '{}': {}",
                name,
                failure.label,
                failure.error.as_deref().unwrap_or("unknown error")
            );
        }
        if report.was_canceled() {
            tracing::warn!("Migration {} canceled; remaining migrations skipped", name);
            return Ok(());
        }
    }
    Ok(())
}

fn print_report(report: &MigrationReport) {
    for operation in &report.operations {
        let document = operation.document.as_deref().unwrap_or("-");
        match &operation.summary {
            Some(summary) => println!(
                "{} [{}] {}: {} read, {} written",
                document,
                operation.label,
                operation.state,
                summary.records_read,
                summary.records_written
            ),
            None => println!("{} [{}] {}", document, operation.label, operation.state),
        }
    }
}
