//! Streaming helpers and download options for isofetch
//!
//! Provides the AsyncRead adapter over HTTP bodies, the progress types shared
//! between the transfer engine and its observers, and [`DownloadOptions`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::TryStreamExt;
use tokio::io::{AsyncRead, ReadBuf};

use crate::core::checkpoint::Checkpoint;

/// A unified stream over an HTTP response body
pub enum DownloadStream {
    /// HTTP stream using reqwest
    Http(Box<dyn AsyncRead + Send + Unpin>),
}

impl AsyncRead for DownloadStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            DownloadStream::Http(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

/// Creates a DownloadStream from an HTTP response
pub fn create_http_stream(response: reqwest::Response) -> DownloadStream {
    let stream = Box::new(tokio_util::io::StreamReader::new(
        response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
    ));
    DownloadStream::Http(stream)
}

/// One tick of transfer progress, sent from the engine to the pipeline
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Checkpoint state after the last completed write
    pub checkpoint: Checkpoint,
    /// Throughput over the sliding window, in bytes per second
    pub speed: f64,
    /// Completion percentage, 0.0 to 100.0
    pub percent: f64,
}

/// Read-only view of progress handed to observers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub bytes_done: u64,
    pub total_size: u64,
    pub speed: f64,
    pub percent: f64,
}

impl From<&ProgressEvent> for Progress {
    fn from(event: &ProgressEvent) -> Self {
        Self {
            bytes_done: event.checkpoint.bytes_done,
            total_size: event.checkpoint.total_size,
            speed: event.speed,
            percent: event.percent,
        }
    }
}

/// Progress observer hook
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Options for download operations
#[derive(Clone)]
pub struct DownloadOptions {
    /// Optional progress observer
    pub progress: Option<ProgressCallback>,

    /// Largest single write to the partial file
    pub buffer_size: usize,

    /// Capacity of the engine-to-pipeline event channel
    pub channel_capacity: usize,

    /// How long the engine may block on a full channel before dropping
    /// the event it is trying to send
    pub send_timeout: Duration,

    /// Minimum spacing between two progress events
    pub progress_interval: Duration,

    /// Window used to compute instantaneous throughput
    pub speed_window: Duration,

    /// Pause between promoting the file and removing its checkpoint
    pub settle_delay: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            progress: None,
            buffer_size: 64 * 1024, // 64KB
            channel_capacity: 8,
            send_timeout: Duration::from_secs(2),
            progress_interval: Duration::from_millis(500),
            speed_window: Duration::from_secs(3),
            settle_delay: Duration::from_secs(1),
        }
    }
}

impl std::fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("progress", &self.progress.is_some())
            .field("buffer_size", &self.buffer_size)
            .field("channel_capacity", &self.channel_capacity)
            .field("send_timeout", &self.send_timeout)
            .field("progress_interval", &self.progress_interval)
            .field("speed_window", &self.speed_window)
            .field("settle_delay", &self.settle_delay)
            .finish()
    }
}
