//! Block-API client (C1): a thin facade over the two EBS direct-API
//! operations, `ListSnapshotBlocks` and `GetSnapshotBlock`.
//!
//! [`SnapshotBlockApi`] is the seam C5/C6 depend on; [`AwsEbsClient`] is the
//! production implementation over `aws-sdk-ebs`. Tests substitute a fake
//! implementation (see `tests/` and the unit tests below) the same way the
//! teacher's engine depends on an `HttpClient` it never has to construct
//! a live `reqwest::Client` to unit-test against.

use async_trait::async_trait;
use aws_sdk_ebs::Client;
use aws_sdk_ebs::primitives::ByteStream;
use aws_smithy_types::timeout::TimeoutConfig;
use tracing::{debug, instrument, warn};

use super::constants::DEFAULT_REQUEST_TIMEOUT;
use super::error::BlockApiError;
use super::retry::{RetryPolicy, RetryDecision, classify_error};

/// Snapshot metadata, stable from the first `ListSnapshotBlocks` page onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMetadata {
    /// Server-advertised fixed block size in bytes.
    pub block_size_bytes: u64,
    /// Logical volume size in bytes (`VolumeSize` GiB * 2^30).
    pub volume_size_bytes: u64,
}

/// One present block, as listed (not yet fetched).
#[derive(Debug, Clone)]
pub struct BlockDescriptor {
    /// 0-based block ordinal.
    pub index: u64,
    /// Opaque token required to fetch this block's bytes.
    pub token: String,
}

/// One page of `ListSnapshotBlocks`. `block_size_bytes`/`volume_size_bytes`
/// are only authoritative on the first page (spec §6); later pages may
/// repeat them but callers must not re-read them.
#[derive(Debug, Clone)]
pub struct BlocksPage {
    /// Server-advertised block size, as returned on this page.
    pub block_size_bytes: u64,
    /// Logical volume size in GiB, as returned on this page.
    pub volume_size_gib: u32,
    /// The blocks present on this page.
    pub blocks: Vec<BlockDescriptor>,
    /// Pagination token for the next page, if any.
    pub next_token: Option<String>,
}

/// A fetched block's bytes plus the server's digest over them.
#[derive(Debug, Clone)]
pub struct FetchedBlock {
    /// 0-based block ordinal, carried through from the descriptor.
    pub index: u64,
    /// Block bytes, already fully read into memory (bounded by block size).
    pub data: Vec<u8>,
    /// Base64-encoded SHA-256 over `data`, as returned by the server.
    pub checksum: String,
}

/// The two block-API operations, as an object-safe trait so the worker pool
/// and orchestrator depend on an interface rather than a concrete SDK type.
#[async_trait]
pub trait SnapshotBlockApi: Send + Sync {
    /// Fetches one page of the block listing. `next_token` is `None` for the
    /// first page.
    async fn list_blocks_page(
        &self,
        snapshot_id: &str,
        next_token: Option<&str>,
    ) -> Result<BlocksPage, BlockApiError>;

    /// Fetches one block's bytes and checksum.
    async fn get_block(
        &self,
        snapshot_id: &str,
        index: u64,
        token: &str,
    ) -> Result<FetchedBlock, BlockApiError>;
}

/// Paginates `list_blocks_page` to exhaustion, retrying each page fetch with
/// `policy` (spec §4.7: "list-pagination calls use the same policy"), and
/// returns the stable metadata plus the full, ordered descriptor list.
///
/// The iterator is consumed to exhaustion here, not lazily by the caller —
/// spec §4.1 requires the total count before workers start.
#[instrument(skip(api, policy), fields(snapshot_id))]
pub async fn list_all_blocks(
    api: &dyn SnapshotBlockApi,
    snapshot_id: &str,
    policy: &RetryPolicy,
) -> Result<(SnapshotMetadata, Vec<BlockDescriptor>), BlockApiError> {
    let mut metadata: Option<SnapshotMetadata> = None;
    let mut blocks = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let page = fetch_page_with_retry(api, snapshot_id, next_token.as_deref(), policy).await?;

        if metadata.is_none() {
            metadata = Some(SnapshotMetadata {
                block_size_bytes: page.block_size_bytes,
                volume_size_bytes: page.volume_size_gib as u64 * (1u64 << 30),
            });
        }

        blocks.extend(page.blocks);
        match page.next_token {
            Some(token) => next_token = Some(token),
            None => break,
        }
    }

    let metadata = metadata.ok_or_else(|| {
        BlockApiError::Malformed("snapshot has no block listing pages".to_string())
    })?;
    debug!(total_blocks = blocks.len(), "listing exhausted");
    Ok((metadata, blocks))
}

async fn fetch_page_with_retry(
    api: &dyn SnapshotBlockApi,
    snapshot_id: &str,
    next_token: Option<&str>,
    policy: &RetryPolicy,
) -> Result<BlocksPage, BlockApiError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match api.list_blocks_page(snapshot_id, next_token).await {
            Ok(page) => return Ok(page),
            Err(err) => match policy.should_retry(classify_error(&err), attempt) {
                RetryDecision::Retry { delay, .. } => {
                    warn!(attempt, error = %err, "retrying list_blocks page");
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { .. } => return Err(err),
            },
        }
    }
}

/// Fetches one block, retrying transient failures per `policy`. Returns the
/// fetched block plus the total attempts made, or the terminal error plus
/// the attempts made before giving up.
#[instrument(skip(api, policy), fields(snapshot_id, index))]
pub async fn get_block_with_retry(
    api: &dyn SnapshotBlockApi,
    snapshot_id: &str,
    index: u64,
    token: &str,
    policy: &RetryPolicy,
) -> Result<(FetchedBlock, u32), (BlockApiError, u32)> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match api.get_block(snapshot_id, index, token).await {
            Ok(block) => return Ok((block, attempt)),
            Err(err) => match policy.should_retry(classify_error(&err), attempt) {
                RetryDecision::Retry { delay, .. } => {
                    warn!(attempt, index, error = %err, "retrying get_block");
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { .. } => return Err((err, attempt)),
            },
        }
    }
}

/// Production [`SnapshotBlockApi`] backed by `aws-sdk-ebs`. Cheap to clone
/// (the underlying SDK client is itself a cheap `Arc`-backed handle), so a
/// single instance is shared across all workers — satisfying spec §4.1's
/// "must permit at least `N_workers` concurrent in-flight calls" contract
/// via the SDK's own connection pool.
#[derive(Clone)]
pub struct AwsEbsClient {
    client: Client,
}

impl AwsEbsClient {
    /// Wraps an already-configured `aws-sdk-ebs` client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from the standard AWS config chain (environment,
    /// profile, IMDS), optionally overriding the region and credential
    /// profile. Region/profile are passed through, not interpreted, per
    /// spec §6. Per-request calls are bounded by
    /// [`DEFAULT_REQUEST_TIMEOUT`] (spec §5: "default 30s").
    pub async fn from_env(region: Option<String>, profile: Option<String>) -> Self {
        let timeout_config = TimeoutConfig::builder()
            .operation_attempt_timeout(DEFAULT_REQUEST_TIMEOUT)
            .build();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .timeout_config(timeout_config);
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;
        Self::new(Client::new(&config))
    }
}

#[async_trait]
impl SnapshotBlockApi for AwsEbsClient {
    async fn list_blocks_page(
        &self,
        snapshot_id: &str,
        next_token: Option<&str>,
    ) -> Result<BlocksPage, BlockApiError> {
        let mut request = self.client.list_snapshot_blocks().snapshot_id(snapshot_id);
        if let Some(token) = next_token {
            request = request.next_token(token);
        }

        let output = request.send().await.map_err(|err| {
            map_sdk_error(snapshot_id, err.into_service_error().into())
        })?;

        let block_size_bytes = u64::try_from(output.block_size().unwrap_or_default())
            .map_err(|_| BlockApiError::Malformed("negative BlockSize".to_string()))?;
        let volume_size_gib = u32::try_from(output.volume_size().unwrap_or_default())
            .map_err(|_| BlockApiError::Malformed("negative VolumeSize".to_string()))?;

        let blocks = output
            .blocks()
            .iter()
            .map(|b| BlockDescriptor {
                index: u64::try_from(b.block_index().unwrap_or_default()).unwrap_or(0),
                token: b.block_token().unwrap_or_default().to_string(),
            })
            .collect();

        Ok(BlocksPage {
            block_size_bytes,
            volume_size_gib,
            blocks,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn get_block(
        &self,
        snapshot_id: &str,
        index: u64,
        token: &str,
    ) -> Result<FetchedBlock, BlockApiError> {
        let block_index = i32::try_from(index)
            .map_err(|_| BlockApiError::Malformed(format!("block index {index} out of range")))?;

        let output = self
            .client
            .get_snapshot_block()
            .snapshot_id(snapshot_id)
            .block_index(block_index)
            .block_token(token)
            .send()
            .await
            .map_err(|err| map_sdk_error(snapshot_id, err.into_service_error().into()))?;

        let algorithm = output.checksum_algorithm();
        if algorithm.map(|a| a.as_str()) != Some("SHA256") {
            return Err(BlockApiError::Malformed(format!(
                "unexpected checksum algorithm: {}",
                algorithm.map(|a| a.as_str()).unwrap_or("none")
            )));
        }

        let checksum = output
            .checksum()
            .ok_or_else(|| BlockApiError::Malformed("missing Checksum".to_string()))?
            .to_string();

        // `block_data` is a plain owning field (not an accessor) since the
        // stream can only be collected once.
        let data = collect_body(output.block_data)
            .await
            .map_err(|e| BlockApiError::Transient(format!("reading block stream: {e}")))?;

        Ok(FetchedBlock {
            index,
            data,
            checksum,
        })
    }
}

async fn collect_body(stream: ByteStream) -> Result<Vec<u8>, aws_smithy_types::byte_stream::error::Error> {
    Ok(stream.collect().await?.to_vec())
}

/// Classifies any AWS SDK service error into a [`BlockApiError`]. Throttling,
/// 5xx internal-server responses, and transport failures are `Transient`;
/// access-denied is `Unauthorized`; not-found is `NotFound`; anything else is
/// `Malformed` (a response shape we don't recognize at all).
fn map_sdk_error(snapshot_id: &str, code: SdkErrorCode) -> BlockApiError {
    match code {
        SdkErrorCode::AccessDenied(message) => BlockApiError::Unauthorized {
            snapshot_id: snapshot_id.to_string(),
            message,
        },
        SdkErrorCode::NotFound => BlockApiError::NotFound {
            snapshot_id: snapshot_id.to_string(),
        },
        SdkErrorCode::Throttled(message) | SdkErrorCode::InternalServer(message) => {
            BlockApiError::Transient(message)
        }
        SdkErrorCode::Other(message) => BlockApiError::Malformed(message),
    }
}

/// Normalized classification extracted from the SDK's generated error enums,
/// so `map_sdk_error` doesn't need one match arm per operation's error type.
enum SdkErrorCode {
    AccessDenied(String),
    NotFound,
    Throttled(String),
    InternalServer(String),
    Other(String),
}

impl From<aws_sdk_ebs::operation::list_snapshot_blocks::ListSnapshotBlocksError> for SdkErrorCode {
    fn from(err: aws_sdk_ebs::operation::list_snapshot_blocks::ListSnapshotBlocksError) -> Self {
        use aws_sdk_ebs::operation::list_snapshot_blocks::ListSnapshotBlocksError as E;
        match err {
            E::AccessDeniedException(e) => Self::AccessDenied(e.to_string()),
            E::ResourceNotFoundException(_) => Self::NotFound,
            E::RequestThrottledException(e) => Self::Throttled(e.to_string()),
            E::InternalServerException(e) => Self::InternalServer(e.to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<aws_sdk_ebs::operation::get_snapshot_block::GetSnapshotBlockError> for SdkErrorCode {
    fn from(err: aws_sdk_ebs::operation::get_snapshot_block::GetSnapshotBlockError) -> Self {
        use aws_sdk_ebs::operation::get_snapshot_block::GetSnapshotBlockError as E;
        match err {
            E::AccessDeniedException(e) => Self::AccessDenied(e.to_string()),
            E::ResourceNotFoundException(_) => Self::NotFound,
            E::RequestThrottledException(e) => Self::Throttled(e.to_string()),
            E::InternalServerException(e) => Self::InternalServer(e.to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Deterministic in-memory fake standing in for the teacher's `wiremock`
    /// HTTP intercepts, since there's no HTTP layer to intercept once the
    /// client sits behind the AWS SDK (see SPEC_FULL.md §8).
    pub struct FakeBlockApi {
        pub pages: Mutex<Vec<BlocksPage>>,
        pub blocks: std::collections::HashMap<u64, FetchedBlock>,
        pub get_calls: Mutex<Vec<u64>>,
        pub fail_get_n_times: Mutex<std::collections::HashMap<u64, u32>>,
    }

    #[async_trait]
    impl SnapshotBlockApi for FakeBlockApi {
        async fn list_blocks_page(
            &self,
            _snapshot_id: &str,
            _next_token: Option<&str>,
        ) -> Result<BlocksPage, BlockApiError> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Err(BlockApiError::Malformed("no more pages".to_string()));
            }
            Ok(pages.remove(0))
        }

        async fn get_block(
            &self,
            _snapshot_id: &str,
            index: u64,
            _token: &str,
        ) -> Result<FetchedBlock, BlockApiError> {
            self.get_calls.lock().unwrap().push(index);
            let mut remaining = self.fail_get_n_times.lock().unwrap();
            if let Some(count) = remaining.get_mut(&index) {
                if *count > 0 {
                    *count -= 1;
                    return Err(BlockApiError::Transient("503".to_string()));
                }
            }
            self.blocks
                .get(&index)
                .cloned()
                .ok_or_else(|| BlockApiError::NotFound {
                    snapshot_id: "snap-test".to_string(),
                })
        }
    }

    #[tokio::test]
    async fn list_all_blocks_paginates_and_keeps_first_page_metadata() {
        let api = FakeBlockApi {
            pages: Mutex::new(vec![
                BlocksPage {
                    block_size_bytes: 524_288,
                    volume_size_gib: 1,
                    blocks: vec![BlockDescriptor {
                        index: 0,
                        token: "t0".into(),
                    }],
                    next_token: Some("X".to_string()),
                },
                BlocksPage {
                    block_size_bytes: 999_999, // must be ignored: only first page is authoritative
                    volume_size_gib: 99,
                    blocks: vec![BlockDescriptor {
                        index: 1,
                        token: "t1".into(),
                    }],
                    next_token: None,
                },
            ]),
            blocks: std::collections::HashMap::new(),
            get_calls: Mutex::new(Vec::new()),
            fail_get_n_times: Mutex::new(std::collections::HashMap::new()),
        };

        let (metadata, blocks) =
            list_all_blocks(&api, "snap-0123", &RetryPolicy::default())
                .await
                .unwrap();

        assert_eq!(metadata.block_size_bytes, 524_288);
        assert_eq!(metadata.volume_size_bytes, 1 << 30);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].index, 0);
        assert_eq!(blocks[1].index, 1);
    }

    #[tokio::test]
    async fn get_block_with_retry_retries_transient_then_succeeds() {
        let mut blocks = std::collections::HashMap::new();
        blocks.insert(
            7,
            FetchedBlock {
                index: 7,
                data: vec![0x42; 8],
                checksum: "irrelevant".to_string(),
            },
        );
        let mut fail_map = std::collections::HashMap::new();
        fail_map.insert(7, 2);

        let api = FakeBlockApi {
            pages: Mutex::new(Vec::new()),
            blocks,
            get_calls: Mutex::new(Vec::new()),
            fail_get_n_times: Mutex::new(fail_map),
        };

        let policy = RetryPolicy::new(
            5,
            std::time::Duration::from_millis(1),
            std::time::Duration::from_millis(5),
            2.0,
        );
        let (block, attempts) = get_block_with_retry(&api, "snap-0123", 7, "t7", &policy)
            .await
            .unwrap();

        assert_eq!(block.index, 7);
        assert_eq!(attempts, 3);
        assert_eq!(api.get_calls.lock().unwrap().len(), 3);
    }
}
