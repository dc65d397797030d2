//! Chunked uploads for block-oriented stores
//!
//! An unbounded payload is cut into fixed-size chunks, each staged under its
//! own block id, and the ordered id list is committed in one call. Nothing is
//! visible at the destination until the commit.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Destination that stages blocks and publishes them atomically
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Stage one block of `object`
    async fn stage_block(&self, object: &str, block_id: &str, data: Vec<u8>) -> Result<()>;

    /// Publish `object` as the concatenation of `block_ids`, in order
    async fn commit_blocks(&self, object: &str, block_ids: &[String]) -> Result<()>;
}

/// What a finished upload staged and committed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkedUpload {
    /// Committed block ids in staging order
    pub block_ids: Vec<String>,
    /// Total payload size
    pub bytes: u64,
}

/// Block id for the chunk at `index`
///
/// Fixed width and URL-safe; lexical order matches staging order.
pub fn block_id(index: u64) -> String {
    hex::encode(index.to_be_bytes())
}

/// Upload `input` to `store` as `object` in chunks of `chunk_size` bytes
///
/// Every chunk except the last is exactly `chunk_size` bytes. Once `cancel`
/// is signaled no further chunk is staged and no commit happens; a chunk
/// already being staged is allowed to finish.
pub async fn upload_chunked(
    store: &dyn BlockStore,
    object: &str,
    input: &mut (dyn AsyncRead + Send + Unpin),
    chunk_size: usize,
    cancel: &CancellationToken,
) -> Result<ChunkedUpload> {
    let chunk_size = chunk_size.max(1);
    let mut upload = ChunkedUpload::default();

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let chunk = read_chunk(input, chunk_size).await?;
        if chunk.is_empty() {
            break;
        }

        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let id = block_id(upload.block_ids.len() as u64);
        let len = chunk.len();
        store.stage_block(object, &id, chunk).await?;
        tracing::debug!(object, block_id = %id, bytes = len, "block staged");

        upload.bytes += len as u64;
        upload.block_ids.push(id);

        if len < chunk_size {
            break;
        }
    }

    if cancel.is_cancelled() {
        return Err(Error::Canceled);
    }

    store.commit_blocks(object, &upload.block_ids).await?;
    tracing::debug!(
        object,
        blocks = upload.block_ids.len(),
        bytes = upload.bytes,
        "blocks committed"
    );
    Ok(upload)
}

/// Fill a buffer of up to `size` bytes; shorter only at end of input
async fn read_chunk(input: &mut (dyn AsyncRead + Send + Unpin), size: usize) -> Result<Vec<u8>> {
    let mut chunk = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = input.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    chunk.truncate(filled);
    Ok(chunk)
}
