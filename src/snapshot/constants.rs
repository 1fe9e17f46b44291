//! Constants for the snapshot download pipeline (block size, timeouts, pool tuning).

use std::time::Duration;

/// Server-advertised EBS block size in practice (512 KiB). Authoritative value
/// always comes from the first `ListSnapshotBlocks` page; this is only a sanity
/// bound used in a handful of places (buffer pre-allocation, tests).
pub const TYPICAL_BLOCK_SIZE_BYTES: u64 = 512 * 1024;

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 30;

/// Minimum allowed worker count.
pub const MIN_WORKERS: usize = 1;

/// Maximum allowed worker count (tested range per spec).
pub const MAX_WORKERS: usize = 64;

/// Default per-request timeout for block-API calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Work queue capacity is a multiple of the worker count.
pub const QUEUE_CAPACITY_MULTIPLIER: usize = 2;

/// Default AWS region used when the caller and environment specify none.
pub const DEFAULT_REGION: &str = "us-east-1";
