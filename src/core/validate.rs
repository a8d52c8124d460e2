//! Resume validation
//!
//! A checkpoint may only be resumed while the live resource still has the
//! size and modification time recorded when the checkpoint was created.
//! Appending to a partial file built from different content would silently
//! corrupt the output.

use std::path::Path;
use std::time::Duration;

use log::{info, warn};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::core::checkpoint::{self, Checkpoint};
use crate::core::error::{Error, Result};
use crate::core::mirror::select_first_reachable;
use crate::core::probe::{probe, ProbeResult};

/// Pure resume rule: same size and same modification time.
pub fn is_resumable(checkpoint: &Checkpoint, probe: &ProbeResult) -> bool {
    probe.size == checkpoint.total_size && probe.modified_at == checkpoint.remote_modified_at
}

/// Probe the checkpoint's source and apply [`is_resumable`].
///
/// A failed probe is returned as an error rather than `false`: the
/// checkpoint may still be good once the mirror comes back.
pub async fn validate(
    client: &Client,
    checkpoint: &Checkpoint,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<bool> {
    let live = probe(client, &checkpoint.source_url, timeout, cancel).await?;
    Ok(is_resumable(checkpoint, &live))
}

/// Resume the checkpoint at `checkpoint_path` if it still matches the remote
/// resource, otherwise start a fresh transfer from the first reachable
/// candidate into `partial_path`.
///
/// The returned checkpoint has already been persisted and, for a resume,
/// reconciled with the partial file on disk.
pub async fn prepare<S: AsRef<str>>(
    client: &Client,
    checkpoint_path: &Path,
    candidates: &[S],
    partial_path: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Checkpoint> {
    if let Some(mut existing) = checkpoint::read(checkpoint_path).await {
        if validate(client, &existing, timeout, cancel).await? {
            existing.reconcile_with_disk().await?;
            checkpoint::write(checkpoint_path, &existing).await?;
            info!(
                "Resuming {} at {}/{} bytes",
                existing.source_url, existing.bytes_done, existing.total_size
            );
            return Ok(existing);
        }

        let stale = Error::StaleCheckpoint {
            url: existing.source_url.clone(),
        };
        warn!("{stale}, starting a fresh download");
        checkpoint::remove_file_if_exists(&existing.target_path).await?;
        checkpoint::remove(checkpoint_path).await?;
    }

    let (url, live) = select_first_reachable(client, candidates, timeout, cancel).await?;
    checkpoint::remove_file_if_exists(partial_path).await?;

    let fresh = Checkpoint::new(url, partial_path, live.size, live.modified_at);
    checkpoint::write(checkpoint_path, &fresh).await?;
    info!("Starting {} ({} bytes)", fresh.source_url, fresh.total_size);
    Ok(fresh)
}
