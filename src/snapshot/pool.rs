//! Worker pool (C5): a fixed set of workers draining the work queue.
//!
//! Each worker loops: pop a descriptor, fetch (via C1, wrapped in C7's retry),
//! verify (C2), write (C3), bump the shared counter, emit a progress line.
//! The first worker to hit a fatal error publishes it to a write-once cell and
//! aborts the queue so every other worker observes end-of-queue and exits
//! without processing whatever was still buffered (spec §4.5).

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use super::cancel::CancelSignal;
use super::client::SnapshotBlockApi;
use super::digest;
use super::error::DownloadError;
use super::image;
use super::queue::WorkQueue;
use super::retry::RetryPolicy;

/// Shared counters and first-error cell visible to every worker and the
/// orchestrator.
pub struct PoolState {
    blocks_written: AtomicU64,
    total_blocks: u64,
    first_error: OnceCell<DownloadError>,
}

impl PoolState {
    #[must_use]
    pub fn new(total_blocks: u64) -> Arc<Self> {
        Arc::new(Self {
            blocks_written: AtomicU64::new(0),
            total_blocks,
            first_error: OnceCell::new(),
        })
    }

    /// Number of blocks successfully written so far.
    #[must_use]
    pub fn blocks_written(&self) -> u64 {
        self.blocks_written.load(Ordering::SeqCst)
    }

    /// The first fatal error published by any worker, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<&DownloadError> {
        self.first_error.get()
    }

    /// Consumes the state to take ownership of the first published error.
    #[must_use]
    pub fn into_first_error(self) -> Option<DownloadError> {
        self.first_error.into_inner()
    }
}

/// Runs `n_workers` tasks against `queue` until it is drained/closed or a
/// fatal error is published, then returns the shared [`PoolState`].
///
/// `api` must tolerate at least `n_workers` concurrent in-flight calls
/// (spec §4.1's connection-pooling contract); `image_path` is prepared by
/// the caller before this is invoked. `cancel` is observed alongside
/// `queue.get()` on every iteration; once tripped, the first worker to
/// notice publishes [`DownloadError::Cancelled`] and aborts the queue so the
/// rest exit without processing whatever was still buffered (spec §5).
#[instrument(skip(api, queue, policy, cancel), fields(n_workers, snapshot_id))]
pub async fn run(
    api: Arc<dyn SnapshotBlockApi>,
    queue: Arc<WorkQueue>,
    image_path: PathBuf,
    snapshot_id: String,
    block_size_bytes: u64,
    total_blocks: u64,
    n_workers: usize,
    policy: RetryPolicy,
    cancel: Arc<CancelSignal>,
) -> Arc<PoolState> {
    let state = PoolState::new(total_blocks);

    let mut handles = Vec::with_capacity(n_workers);
    for worker_id in 0..n_workers {
        let api = Arc::clone(&api);
        let queue = Arc::clone(&queue);
        let state = Arc::clone(&state);
        let image_path = image_path.clone();
        let snapshot_id = snapshot_id.clone();
        let policy = policy.clone();
        let cancel = Arc::clone(&cancel);

        handles.push(tokio::spawn(async move {
            worker_loop(
                worker_id,
                api.as_ref(),
                &queue,
                &image_path,
                &snapshot_id,
                block_size_bytes,
                &state,
                &policy,
                &cancel,
            )
            .await;
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "worker task panicked");
        }
    }

    state
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    api: &dyn SnapshotBlockApi,
    queue: &WorkQueue,
    image_path: &Path,
    snapshot_id: &str,
    block_size_bytes: u64,
    state: &PoolState,
    policy: &RetryPolicy,
    cancel: &CancelSignal,
) {
    loop {
        let descriptor = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(worker_id, "cancellation observed, exiting");
                if state.first_error.set(DownloadError::Cancelled).is_ok() {
                    queue.abort().await;
                }
                return;
            }
            item = queue.get() => match item {
                Some(descriptor) => descriptor,
                None => {
                    debug!(worker_id, "queue drained, exiting");
                    return;
                }
            },
        };

        let offset = descriptor.index * block_size_bytes;
        let result = process_one(
            api,
            queue,
            image_path,
            snapshot_id,
            &descriptor.token,
            descriptor.index,
            offset,
            state,
            policy,
        )
        .await;

        if let Err(err) = result {
            warn!(worker_id, index = descriptor.index, error = %err, "fatal error");
            if state.first_error.set(err).is_ok() {
                queue.abort().await;
            }
            return;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_one(
    api: &dyn SnapshotBlockApi,
    _queue: &WorkQueue,
    image_path: &Path,
    snapshot_id: &str,
    token: &str,
    index: u64,
    offset: u64,
    state: &PoolState,
    policy: &RetryPolicy,
) -> Result<(), DownloadError> {
    let (block, attempts) =
        super::client::get_block_with_retry(api, snapshot_id, index, token, policy)
            .await
            .map_err(|(e, attempts)| DownloadError::from_block_api(e, attempts))?;

    debug!(index, attempts, "block fetched");

    if !digest::verify(&block.data, &block.checksum) {
        return Err(DownloadError::Checksum { index });
    }

    image::write_at(image_path, offset, block.data).await?;

    let written = state.blocks_written.fetch_add(1, Ordering::SeqCst) + 1;
    emit_progress(written, state.total_blocks);

    Ok(())
}

/// Best-effort single-line progress update. Never holds a lock — a racy
/// interleaved line is acceptable per spec §4.5/§5.
fn emit_progress(written: u64, total: u64) {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "Saved block {written} of {total}\r");
    let _ = stderr.flush();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::snapshot::client::{BlockDescriptor as ClientBlockDescriptor, BlocksPage, FetchedBlock};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    struct FakeApi {
        blocks: HashMap<u64, FetchedBlock>,
    }

    #[async_trait]
    impl SnapshotBlockApi for FakeApi {
        async fn list_blocks_page(
            &self,
            _snapshot_id: &str,
            _next_token: Option<&str>,
        ) -> Result<BlocksPage, crate::snapshot::error::BlockApiError> {
            Ok(BlocksPage {
                block_size_bytes: 524_288,
                volume_size_gib: 1,
                blocks: vec![],
                next_token: None,
            })
        }

        async fn get_block(
            &self,
            _snapshot_id: &str,
            index: u64,
            _token: &str,
        ) -> Result<FetchedBlock, crate::snapshot::error::BlockApiError> {
            self.blocks
                .get(&index)
                .cloned()
                .ok_or_else(|| crate::snapshot::error::BlockApiError::NotFound {
                    snapshot_id: "snap-test".to_string(),
                })
        }
    }

    #[tokio::test]
    async fn pool_writes_every_queued_block() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("image.bin");
        image::prepare(&image_path, 2 * 524_288, false).await.unwrap();

        let mut blocks = HashMap::new();
        blocks.insert(
            0,
            FetchedBlock {
                index: 0,
                data: vec![0x41; 524_288],
                checksum: {
                    use base64::Engine as _;
                    use sha2::{Digest, Sha256};
                    let mut h = Sha256::new();
                    h.update(vec![0x41u8; 524_288]);
                    base64::engine::general_purpose::STANDARD.encode(h.finalize())
                },
            },
        );
        let api: Arc<dyn SnapshotBlockApi> = Arc::new(FakeApi { blocks });

        let queue = WorkQueue::new(4);
        queue
            .put(ClientBlockDescriptor {
                index: 0,
                token: "t0".into(),
            })
            .await
            .unwrap();
        queue.close().await;

        let state = run(
            api,
            queue,
            image_path.clone(),
            "snap-test".to_string(),
            524_288,
            1,
            2,
            RetryPolicy::default(),
            CancelSignal::new(),
        )
        .await;

        assert_eq!(state.blocks_written(), 1);
        assert!(state.first_error().is_none());
    }

    #[tokio::test]
    async fn pool_stops_and_reports_checksum_error() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("image.bin");
        image::prepare(&image_path, 524_288, false).await.unwrap();

        let mut blocks = HashMap::new();
        blocks.insert(
            0,
            FetchedBlock {
                index: 0,
                data: b"test1234".to_vec(),
                checksum: "aGVsbG8=".to_string(), // deliberately wrong
            },
        );
        let api: Arc<dyn SnapshotBlockApi> = Arc::new(FakeApi { blocks });

        let queue = WorkQueue::new(4);
        queue
            .put(ClientBlockDescriptor {
                index: 0,
                token: "t0".into(),
            })
            .await
            .unwrap();
        queue.close().await;

        let state = run(
            api,
            queue,
            image_path,
            "snap-test".to_string(),
            524_288,
            1,
            2,
            RetryPolicy::default(),
            CancelSignal::new(),
        )
        .await;

        assert_eq!(state.blocks_written(), 0);
        assert!(matches!(
            state.first_error(),
            Some(DownloadError::Checksum { index: 0 })
        ));
    }

    #[tokio::test]
    async fn cancelling_mid_run_reports_cancelled_and_stops_workers() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("image.bin");
        image::prepare(&image_path, 524_288, false).await.unwrap();

        let api: Arc<dyn SnapshotBlockApi> = Arc::new(FakeApi {
            blocks: HashMap::new(),
        });

        // Empty queue, left open: workers block in `queue.get()` until cancelled.
        let queue = WorkQueue::new(4);
        let cancel = CancelSignal::new();
        let cancel_trigger = Arc::clone(&cancel);

        let run_fut = run(
            api,
            Arc::clone(&queue),
            image_path,
            "snap-test".to_string(),
            524_288,
            1,
            4,
            RetryPolicy::default(),
            cancel,
        );
        tokio::pin!(run_fut);

        tokio::task::yield_now().await;
        cancel_trigger.cancel();

        let state = tokio::time::timeout(Duration::from_secs(1), run_fut)
            .await
            .unwrap();

        assert!(matches!(state.first_error(), Some(DownloadError::Cancelled)));
    }
}
