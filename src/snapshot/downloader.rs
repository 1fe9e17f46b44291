//! Downloader orchestrator (C6): the public entry point.
//!
//! Lists the full block set, pre-sizes the output file, starts the worker
//! pool, feeds the queue, and joins. The shape mirrors the teacher's
//! `DownloadEngine::process_queue`: list up front, drive a bounded pool,
//! surface the first error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::cancel::CancelSignal;
use super::client::{list_all_blocks, SnapshotBlockApi};
use super::constants::{MAX_WORKERS, MIN_WORKERS, QUEUE_CAPACITY_MULTIPLIER};
use super::error::DownloadError;
use super::image;
use super::pool;
use super::queue::WorkQueue;
use super::retry::RetryPolicy;

/// Options controlling one `download()` call.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Identifier of the snapshot to fetch, e.g. `snap-0123456789abcdef0`.
    pub snapshot_id: String,
    /// Destination path for the sparse image file.
    pub output_path: PathBuf,
    /// Overwrite `output_path` if it already exists.
    pub force: bool,
    /// Number of concurrent workers (spec §4.5: default 30, range 1-64).
    pub n_workers: usize,
    /// Retry policy applied to every block-API call.
    pub retry_policy: RetryPolicy,
}

/// Outcome of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Absolute path of the written image file.
    pub output_path: PathBuf,
    /// Total blocks written (equals the snapshot's present-block count).
    pub blocks_written: u64,
    /// Logical size of the image file in bytes.
    pub volume_size_bytes: u64,
}

/// Runs the full pipeline: list, prepare, pool, feed, join.
///
/// Returns [`DownloadError::InvalidWorkerCount`] before any network or
/// filesystem activity if `options.n_workers` is out of the supported range.
///
/// `cancel` is a caller-supplied cancellation signal (spec §5): tripping it
/// at any point closes the queue and waits for workers to drain their
/// current block, and this returns [`DownloadError::Cancelled`] once they
/// have. Pass [`CancelSignal::new`] when the caller has no cancellation
/// source of its own.
#[instrument(skip(api, options, cancel), fields(snapshot_id = %options.snapshot_id, n_workers = options.n_workers))]
pub async fn download(
    api: Arc<dyn SnapshotBlockApi>,
    options: DownloadOptions,
    cancel: Arc<CancelSignal>,
) -> Result<DownloadSummary, DownloadError> {
    if !(MIN_WORKERS..=MAX_WORKERS).contains(&options.n_workers) {
        return Err(DownloadError::InvalidWorkerCount {
            value: options.n_workers,
            min: MIN_WORKERS,
            max: MAX_WORKERS,
        });
    }

    let (metadata, blocks) = list_all_blocks(
        api.as_ref(),
        &options.snapshot_id,
        &options.retry_policy,
    )
    .await
    .map_err(|e| DownloadError::from_block_api(e, 1))?;

    let total_blocks = blocks.len() as u64;
    info!(
        total_blocks,
        block_size_bytes = metadata.block_size_bytes,
        volume_size_bytes = metadata.volume_size_bytes,
        "listing complete"
    );

    image::prepare(&options.output_path, metadata.volume_size_bytes, options.force).await?;

    let queue = WorkQueue::new(options.n_workers * QUEUE_CAPACITY_MULTIPLIER);

    let pool_task = tokio::spawn(pool::run(
        Arc::clone(&api),
        Arc::clone(&queue),
        options.output_path.clone(),
        options.snapshot_id.clone(),
        metadata.block_size_bytes,
        total_blocks,
        options.n_workers,
        options.retry_policy.clone(),
        cancel,
    ));

    for descriptor in blocks {
        if queue.put(descriptor).await.is_err() {
            break;
        }
    }
    queue.close().await;

    let state = pool_task.await.map_err(|join_err| DownloadError::Io {
        path: options.output_path.clone(),
        source: std::io::Error::other(join_err),
    })?;

    let state =
        Arc::try_unwrap(state).unwrap_or_else(|_| unreachable!("all worker handles have joined"));
    let blocks_written = state.blocks_written();
    if let Some(err) = state.into_first_error() {
        warn!(error = %err, "download aborted by first fatal error");
        return Err(err);
    }

    info!(blocks_written, total_blocks, "download complete");

    Ok(DownloadSummary {
        output_path: absolute_path(&options.output_path),
        blocks_written,
        volume_size_bytes: metadata.volume_size_bytes,
    })
}

fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
