//! Persisted transfer checkpoints
//!
//! A checkpoint records which resource is being fetched, where the partial
//! bytes live and how far the transfer got. It is stored as JSON next to the
//! partial file and replaced atomically (write temp file, fsync, rename), so
//! a crash mid-write leaves either the previous record or the new one.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::core::error::{Error, Result};

/// Identity and progress of one in-flight transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Resource being fetched
    pub source_url: String,
    /// In-progress file on disk (not the final destination)
    pub target_path: PathBuf,
    /// Full byte length reported by the last successful probe
    pub total_size: u64,
    /// Bytes already written to `target_path`
    pub bytes_done: u64,
    /// Last-Modified of the resource when the checkpoint was created
    pub remote_modified_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Start a fresh checkpoint at offset zero
    pub fn new(
        source_url: impl Into<String>,
        target_path: impl Into<PathBuf>,
        total_size: u64,
        remote_modified_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            target_path: target_path.into(),
            total_size,
            bytes_done: 0,
            remote_modified_at,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_done == self.total_size
    }

    pub fn percent(&self) -> f64 {
        if self.total_size == 0 {
            100.0
        } else {
            self.bytes_done as f64 * 100.0 / self.total_size as f64
        }
    }

    /// Align `bytes_done` with the partial file actually on disk.
    ///
    /// The on-disk length wins over the recorded value. A partial file longer
    /// than `total_size` cannot belong to this resource and is discarded.
    pub async fn reconcile_with_disk(&mut self) -> Result<u64> {
        let on_disk = partial_len(&self.target_path).await?;
        if on_disk > self.total_size {
            warn!(
                "Partial file {} is larger than expected ({on_disk} > {}), restarting from zero",
                self.target_path.display(),
                self.total_size
            );
            remove_file_if_exists(&self.target_path).await?;
            self.bytes_done = 0;
        } else {
            if on_disk != self.bytes_done {
                debug!(
                    "Checkpoint recorded {} bytes, partial file has {on_disk}",
                    self.bytes_done
                );
            }
            self.bytes_done = on_disk;
        }
        Ok(self.bytes_done)
    }
}

/// Read a checkpoint, treating a missing or unreadable record as absent.
pub async fn read(path: &Path) -> Option<Checkpoint> {
    match try_read(path).await {
        Ok(checkpoint) => checkpoint,
        Err(e) => {
            warn!("Ignoring checkpoint: {e}");
            None
        }
    }
}

/// Read a checkpoint, reporting unparseable records as [`Error::CorruptCheckpoint`].
pub async fn try_read(path: &Path) -> Result<Option<Checkpoint>> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let checkpoint: Checkpoint =
        serde_json::from_slice(&data).map_err(|e| Error::CorruptCheckpoint {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if checkpoint.bytes_done > checkpoint.total_size {
        return Err(Error::CorruptCheckpoint {
            path: path.to_path_buf(),
            reason: format!(
                "bytes_done {} exceeds total_size {}",
                checkpoint.bytes_done, checkpoint.total_size
            ),
        });
    }

    Ok(Some(checkpoint))
}

/// Atomically replace the checkpoint at `path`.
pub async fn write(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    let data = serde_json::to_vec_pretty(checkpoint)
        .map_err(|e| Error::InvalidInput(format!("Cannot encode checkpoint: {e}")))?;
    write_atomic(path, &data).await
}

/// Delete the checkpoint. Removing an absent checkpoint is not an error.
pub async fn remove(path: &Path) -> Result<()> {
    remove_file_if_exists(path).await?;
    remove_file_if_exists(&temp_path(path)).await
}

/// Length of the partial file, or 0 when it does not exist yet.
pub async fn partial_len(path: &Path) -> Result<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// `remove_file` that treats a missing file as success
pub async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("checkpoint"));
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(target: &Path) -> Checkpoint {
        let modified = DateTime::parse_from_rfc2822("Tue, 15 Nov 1994 08:12:31 GMT")
            .unwrap()
            .with_timezone(&Utc);
        Checkpoint::new(
            "https://mirror.example/ubuntu.iso",
            target,
            100,
            Some(modified),
        )
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ubuntu.ops");
        let mut checkpoint = sample(&dir.path().join("ubuntu.iso.part"));
        checkpoint.bytes_done = 42;

        write(&path, &checkpoint).await.unwrap();
        assert_eq!(read(&path).await, Some(checkpoint));
        assert!(!temp_path(&path).exists(), "temp file must be renamed away");
    }

    #[tokio::test]
    async fn test_missing_checkpoint_is_absent() {
        let dir = tempdir().unwrap();
        assert_eq!(read(&dir.path().join("nothing.ops")).await, None);
    }

    #[tokio::test]
    async fn test_garbage_checkpoint_is_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.ops");
        std::fs::write(&path, b"{\"source_url\": \"https://mirr").unwrap();

        assert!(matches!(
            try_read(&path).await,
            Err(Error::CorruptCheckpoint { .. })
        ));
        assert_eq!(read(&path).await, None);
    }

    #[tokio::test]
    async fn test_progress_past_total_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.ops");
        let mut checkpoint = sample(&dir.path().join("bad.part"));
        checkpoint.bytes_done = 101;
        std::fs::write(&path, serde_json::to_vec(&checkpoint).unwrap()).unwrap();

        assert_eq!(read(&path).await, None);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("done.ops");
        write(&path, &sample(&dir.path().join("done.part"))).await.unwrap();

        remove(&path).await.unwrap();
        remove(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_reconcile_prefers_disk_length() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("truncated.part");
        std::fs::write(&target, vec![7u8; 30]).unwrap();

        let mut checkpoint = sample(&target);
        checkpoint.bytes_done = 80;
        assert_eq!(checkpoint.reconcile_with_disk().await.unwrap(), 30);
        assert_eq!(checkpoint.bytes_done, 30);
    }

    #[tokio::test]
    async fn test_reconcile_discards_oversized_partial() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("oversized.part");
        std::fs::write(&target, vec![7u8; 150]).unwrap();

        let mut checkpoint = sample(&target);
        checkpoint.bytes_done = 100;
        assert_eq!(checkpoint.reconcile_with_disk().await.unwrap(), 0);
        assert!(!target.exists());
    }
}
