//! Promotion of completed partial files
//!
//! The partial file is renamed onto its destination and only then is the
//! checkpoint removed. If the rename fails the checkpoint stays, so the
//! completed bytes are found again on the next attempt.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};

use crate::core::checkpoint::{self, Checkpoint};
use crate::core::error::{Error, Result};

/// Rename `checkpoint.target_path` to `dest`, then remove the checkpoint.
///
/// `settle_delay` gives a still-draining pipeline a moment before the
/// checkpoint disappears; removal is idempotent either way.
pub async fn finalize(
    checkpoint_path: &Path,
    checkpoint: &Checkpoint,
    dest: &Path,
    settle_delay: Duration,
) -> Result<()> {
    ensure_complete(checkpoint).await?;

    tokio::fs::rename(&checkpoint.target_path, dest)
        .await
        .map_err(|source| Error::FinalizeFailed {
            from: checkpoint.target_path.clone(),
            to: dest.to_path_buf(),
            source,
        })?;
    info!("Saved {}", dest.display());

    settle_and_forget(checkpoint_path, settle_delay).await
}

/// Like [`finalize`], but when the rename fails because `dest` is on another
/// filesystem the file is copied next to `dest`, renamed into place and the
/// partial file deleted.
pub async fn finalize_with_copy_fallback(
    checkpoint_path: &Path,
    checkpoint: &Checkpoint,
    dest: &Path,
    settle_delay: Duration,
) -> Result<()> {
    match finalize(checkpoint_path, checkpoint, dest, settle_delay).await {
        Err(e) if e.is_cross_device() => {
            warn!("{e}; copying across filesystems instead");
            let staging = staging_path(dest);
            tokio::fs::copy(&checkpoint.target_path, &staging).await?;
            tokio::fs::rename(&staging, dest)
                .await
                .map_err(|source| Error::FinalizeFailed {
                    from: staging.clone(),
                    to: dest.to_path_buf(),
                    source,
                })?;
            checkpoint::remove_file_if_exists(&checkpoint.target_path).await?;
            info!("Saved {}", dest.display());
            settle_and_forget(checkpoint_path, settle_delay).await
        }
        other => other,
    }
}

async fn ensure_complete(checkpoint: &Checkpoint) -> Result<()> {
    let on_disk = checkpoint::partial_len(&checkpoint.target_path).await?;
    if on_disk != checkpoint.total_size {
        return Err(Error::ShortTransfer {
            expected: checkpoint.total_size,
            received: on_disk,
        });
    }
    Ok(())
}

async fn settle_and_forget(checkpoint_path: &Path, settle_delay: Duration) -> Result<()> {
    if !settle_delay.is_zero() {
        tokio::time::sleep(settle_delay).await;
    }
    checkpoint::remove(checkpoint_path).await
}

fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("download"));
    name.push(".copying");
    dest.with_file_name(name)
}
