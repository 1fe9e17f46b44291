//! Sparse image writer (C3).
//!
//! Owns the local output path. `prepare` creates or truncates the file to the
//! volume's logical size; `write_at` performs a single positional write per
//! call. Per spec §4.3/§9, each write opens its own file descriptor rather
//! than sharing a handle across workers — this avoids a shared mutable seek
//! pointer and leaves ordering to the OS's positional-write semantics
//! (`pwrite` on Unix; `seek_write` on Windows, serialized per-call since that
//! platform lacks an atomic positional write).

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use super::error::DownloadError;

/// Creates (or truncates) the image file at `path` to exactly `size` bytes.
///
/// Fails with [`DownloadError::OutputExists`] if `path` exists and `force` is
/// `false`; the file is left untouched in that case. Otherwise the file is
/// created (or truncated) and resized to `size`, then flushed.
///
/// Directory components above `path` must already exist.
#[instrument(skip(size), fields(path = %path.display(), size, force))]
pub async fn prepare(path: &Path, size: u64, force: bool) -> Result<(), DownloadError> {
    if path.exists() && !force {
        return Err(DownloadError::OutputExists {
            path: path.to_path_buf(),
        });
    }

    let path = path.to_path_buf();
    let report_path = path.clone();
    let result = tokio::task::spawn_blocking(move || {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| DownloadError::Io {
                path: path.clone(),
                source,
            })?;
        file.set_len(size).map_err(|source| DownloadError::Io {
            path: path.clone(),
            source,
        })?;
        file.sync_all().map_err(|source| DownloadError::Io { path, source })
    })
    .await;

    match result {
        Ok(inner) => inner?,
        Err(join_err) => {
            return Err(DownloadError::Io {
                path: report_path,
                source: std::io::Error::other(join_err),
            });
        }
    }

    debug!("image file prepared");
    Ok(())
}

/// Writes `data` at byte `offset` in the image file at `path`.
///
/// Opens a private read-write handle for this call only, so concurrent
/// callers never share a seek pointer. Returns the number of bytes written
/// (always `data.len()` on success).
#[instrument(skip(data), fields(path = %path.display(), offset, len = data.len()))]
pub async fn write_at(path: &Path, offset: u64, data: Vec<u8>) -> Result<usize, DownloadError> {
    let path_owned: PathBuf = path.to_path_buf();
    let report_path = path_owned.clone();
    match tokio::task::spawn_blocking(move || write_at_blocking(&path_owned, offset, &data)).await
    {
        Ok(result) => result,
        Err(join_err) => Err(DownloadError::Io {
            path: report_path,
            source: std::io::Error::other(join_err),
        }),
    }
}

#[cfg(unix)]
fn write_at_blocking(path: &Path, offset: u64, data: &[u8]) -> Result<usize, DownloadError> {
    use std::os::unix::fs::FileExt;

    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|source| DownloadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    file.write_all_at(data, offset)
        .map_err(|source| DownloadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    file.sync_data().map_err(|source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(data.len())
}

#[cfg(windows)]
fn write_at_blocking(path: &Path, offset: u64, data: &[u8]) -> Result<usize, DownloadError> {
    use std::os::windows::fs::FileExt;

    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|source| DownloadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let mut written = 0usize;
    while written < data.len() {
        let n = file
            .seek_write(&data[written..], offset + written as u64)
            .map_err(|source| DownloadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            break;
        }
        written += n;
    }
    file.sync_data().map_err(|source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(written)
}
