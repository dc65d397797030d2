use futures::StreamExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::record::{DataItem, RecordStream};

/// Upper bound on the records reserved up front for one batch
const MAX_PREALLOCATED: usize = 1024;

/// Counters reported by [`write_in_batches`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Records handed to `flush`
    pub records: u64,
    /// Number of `flush` calls
    pub batches: u64,
}

/// Drain `records` into `flush` in groups of `batch_size`
///
/// A batch is flushed as soon as it is full and once more at end of stream
/// for whatever is left. No flush starts after `cancel` is signaled; batches
/// flushed before that stay flushed.
pub async fn write_in_batches<F>(
    mut records: RecordStream,
    batch_size: usize,
    cancel: &CancellationToken,
    mut flush: F,
) -> Result<BatchStats>
where
    F: for<'a> FnMut(&'a [DataItem]) -> BoxFuture<'a, Result<()>> + Send,
{
    let batch_size = batch_size.max(1);
    let mut buffer = Vec::with_capacity(batch_size.min(MAX_PREALLOCATED));
    let mut stats = BatchStats::default();

    while let Some(item) = records.next().await {
        buffer.push(item?);
        if buffer.len() >= batch_size {
            flush_batch(&mut buffer, cancel, &mut flush, &mut stats).await?;
        }
    }

    if !buffer.is_empty() {
        flush_batch(&mut buffer, cancel, &mut flush, &mut stats).await?;
    }

    Ok(stats)
}

async fn flush_batch<F>(
    buffer: &mut Vec<DataItem>,
    cancel: &CancellationToken,
    flush: &mut F,
    stats: &mut BatchStats,
) -> Result<()>
where
    F: for<'a> FnMut(&'a [DataItem]) -> BoxFuture<'a, Result<()>> + Send,
{
    if cancel.is_cancelled() {
        return Err(Error::Canceled);
    }
    flush(buffer.as_slice()).await?;
    stats.records += buffer.len() as u64;
    stats.batches += 1;
    tracing::debug!(batch = stats.batches, records = buffer.len(), "batch flushed");
    buffer.clear();
    Ok(())
}
