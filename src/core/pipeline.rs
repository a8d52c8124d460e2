//! Progress/checkpoint pipeline
//!
//! A single consumer task drains progress events from the transfer engine,
//! rewrites the checkpoint for each one and forwards throughput to the
//! observer hook. While a transfer runs this task is the only writer of the
//! checkpoint file.

use std::path::{Path, PathBuf};

use indicatif::DecimalBytes;
use log::{debug, warn};
use reqwest::Client;
use tokio::sync::mpsc::{self, Receiver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::checkpoint::{self, Checkpoint};
use crate::core::error::{Error, Result};
use crate::core::stream::{DownloadOptions, Progress, ProgressCallback, ProgressEvent};
use crate::core::transfer::transfer;

/// Spawn the consumer. It ends when every sender is dropped and returns the
/// last checkpoint it managed to persist.
pub fn spawn_pipeline(
    checkpoint_path: PathBuf,
    mut events: Receiver<ProgressEvent>,
    observer: Option<ProgressCallback>,
) -> JoinHandle<Option<Checkpoint>> {
    tokio::spawn(async move {
        let mut persisted = None;

        while let Some(event) = events.recv().await {
            match checkpoint::write(&checkpoint_path, &event.checkpoint).await {
                Ok(()) => persisted = Some(event.checkpoint.clone()),
                Err(e) => warn!(
                    "Failed to persist checkpoint {}: {e}",
                    checkpoint_path.display()
                ),
            }

            debug!(
                "speed={}/s progress={:.2}%",
                DecimalBytes(event.speed as u64),
                event.percent
            );
            if let Some(observer) = &observer {
                observer(Progress::from(&event));
            }
        }

        persisted
    })
}

/// Run [`transfer`] with a pipeline attached, persisting progress to
/// `checkpoint_path`.
///
/// On success the checkpoint on disk is guaranteed to record the completed
/// size, even if the engine had to drop the final event.
pub async fn transfer_with_checkpoints(
    client: &Client,
    checkpoint_path: &Path,
    checkpoint: &Checkpoint,
    options: &DownloadOptions,
    cancel: &CancellationToken,
) -> Result<Checkpoint> {
    let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
    let consumer = spawn_pipeline(checkpoint_path.to_path_buf(), rx, options.progress.clone());

    let outcome = transfer(client, checkpoint, &tx, options, cancel).await;
    drop(tx);

    let persisted = consumer
        .await
        .map_err(|e| Error::IoError(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

    let done = outcome?;
    if persisted.as_ref().map(|c| c.bytes_done) != Some(done.bytes_done) {
        checkpoint::write(checkpoint_path, &done).await?;
    }
    Ok(done)
}
