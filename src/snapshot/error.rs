//! Error types for the snapshot download pipeline.
//!
//! Two layers: [`BlockApiError`] is what C1 (the block-API client) raises, and
//! is what C7's retry policy classifies. [`DownloadError`] is the taxonomy
//! surfaced to the CLI boundary (spec §7's error table), produced once a
//! `BlockApiError` is either non-retryable or retries are exhausted, or by the
//! other components (C2, C3, C4/C5 cancellation).

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the block-API client (C1), before retry classification.
#[derive(Debug, Error, Clone)]
pub enum BlockApiError {
    /// Network failure, server 5xx, or throttling. Retryable by C7.
    #[error("transient block-API error: {0}")]
    Transient(String),

    /// Permission denied fetching or listing blocks for this snapshot.
    #[error("not authorized for snapshot {snapshot_id}: {message}")]
    Unauthorized {
        /// The snapshot this call targeted.
        snapshot_id: String,
        /// Underlying SDK error text.
        message: String,
    },

    /// The snapshot id does not exist or was deleted.
    #[error("snapshot not found: {snapshot_id}")]
    NotFound {
        /// The snapshot id that was not found.
        snapshot_id: String,
    },

    /// The response did not match the documented wire contract (spec §6),
    /// e.g. a checksum algorithm other than SHA256, or a missing field.
    #[error("malformed block-API response: {0}")]
    Malformed(String),
}

/// Error taxonomy surfaced to the caller of [`crate::download`], matching
/// the kinds in spec §7 (not retried further at this layer; C7 has already
/// made its retry decision by the time one of these is constructed).
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The output path already exists and `force` was not set.
    #[error("output path already exists: {path}")]
    OutputExists {
        /// The path that was refused.
        path: PathBuf,
    },

    /// Permission denied talking to the block API.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// The snapshot id does not exist.
    #[error("snapshot not found: {0}")]
    NotFound(String),

    /// A block-API call remained transient after exhausting retries.
    #[error("transient error persisted after {attempts} attempts: {message}")]
    Transient {
        /// Total attempts made, including the first.
        attempts: u32,
        /// The last transient error's message.
        message: String,
    },

    /// A fetched block failed digest verification.
    #[error("checksum mismatch at block index {index}")]
    Checksum {
        /// The 0-based block index that failed verification.
        index: u64,
    },

    /// A filesystem error occurred writing the image file.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The image file path being operated on.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The response from the block API did not match the documented contract.
    #[error("malformed response from block API: {0}")]
    Malformed(String),

    /// The download was cancelled by an external cancellation signal.
    #[error("download cancelled")]
    Cancelled,

    /// The worker pool configuration was invalid.
    #[error("invalid worker count {value}: must be between {min} and {max}")]
    InvalidWorkerCount {
        /// The invalid value that was provided.
        value: usize,
        /// Minimum accepted value.
        min: usize,
        /// Maximum accepted value.
        max: usize,
    },
}

impl DownloadError {
    /// Maps a non-retryable (or retry-exhausted) [`BlockApiError`] into the
    /// taxonomy surfaced at the `download()` boundary.
    #[must_use]
    pub fn from_block_api(err: BlockApiError, attempts: u32) -> Self {
        match err {
            BlockApiError::Transient(message) => Self::Transient { attempts, message },
            BlockApiError::Unauthorized { message, .. } => Self::Unauthorized(message),
            BlockApiError::NotFound { snapshot_id } => Self::NotFound(snapshot_id),
            BlockApiError::Malformed(message) => Self::Malformed(message),
        }
    }

    /// The POSIX-ish process exit code this error kind maps to (spec §6):
    /// 1 for user errors (bad id, existing output, credentials), 2 for
    /// post-start failures (checksum, network fatal, I/O), and 3 for
    /// cancellation (a distinguishable non-zero code).
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::OutputExists { .. }
            | Self::Unauthorized(_)
            | Self::NotFound(_)
            | Self::InvalidWorkerCount { .. } => 1,
            Self::Transient { .. } | Self::Checksum { .. } | Self::Io { .. } | Self::Malformed(_) => 2,
            Self::Cancelled => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec_table() {
        assert_eq!(
            DownloadError::OutputExists {
                path: PathBuf::from("/tmp/x")
            }
            .exit_code(),
            1
        );
        assert_eq!(DownloadError::NotFound("snap-1".into()).exit_code(), 1);
        assert_eq!(DownloadError::Checksum { index: 3 }.exit_code(), 2);
        assert_eq!(
            DownloadError::Transient {
                attempts: 5,
                message: "boom".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(DownloadError::Cancelled.exit_code(), 3);
    }

    #[test]
    fn from_block_api_preserves_attempts_on_transient() {
        let err = DownloadError::from_block_api(BlockApiError::Transient("503".into()), 5);
        match err {
            DownloadError::Transient { attempts, .. } => assert_eq!(attempts, 5),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn from_block_api_maps_not_found() {
        let err = DownloadError::from_block_api(
            BlockApiError::NotFound {
                snapshot_id: "snap-0123".into(),
            },
            1,
        );
        assert!(matches!(err, DownloadError::NotFound(id) if id == "snap-0123"));
    }
}
