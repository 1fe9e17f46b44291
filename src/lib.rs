//! Snapshot Downloader Core Library
//!
//! Downloads an EBS-format cloud block-storage snapshot into a local sparse
//! image file via a block-addressable snapshot API.
//!
//! # Architecture
//!
//! The library is organized around the pipeline in [`snapshot`]:
//! - [`snapshot::client`] - thin facade over the block-API's list/fetch operations
//! - [`snapshot::digest`] - SHA-256 verification of fetched blocks
//! - [`snapshot::image`] - sparse output file creation and positional writes
//! - [`snapshot::queue`] - bounded work queue feeding the worker pool
//! - [`snapshot::pool`] - fixed-size worker pool driving the pipeline
//! - [`snapshot::downloader`] - public orchestrator entry point
//! - [`snapshot::retry`] - retry/backoff policy for transient block-API failures

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod snapshot;

pub use snapshot::{
    download, AwsEbsClient, BlockApiError, CancelSignal, DownloadError, DownloadOptions,
    DownloadSummary, RetryPolicy, SnapshotBlockApi, SnapshotMetadata,
};
