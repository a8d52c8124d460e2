//! Single-stream range-resume transfer engine
//!
//! Streams one GET response into the partial file, appending from the
//! offset the file already has on disk, and reports progress through a
//! bounded channel. Any failure aborts the transfer with the partial file
//! and checkpoint left in place for the next attempt; nothing is retried
//! here.

use std::collections::VecDeque;
use std::io::SeekFrom;
use std::time::{Duration, Instant};

use log::{debug, warn};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

use crate::core::checkpoint::Checkpoint;
use crate::core::error::{Error, Result};
use crate::core::stream::{create_http_stream, DownloadOptions, DownloadStream, ProgressEvent};

/// Fetch the rest of `checkpoint.source_url` into `checkpoint.target_path`.
///
/// The on-disk length of the partial file is the resume offset; a stale
/// `bytes_done` is corrected before the request is made. Progress events
/// are sent to `sink` at most every `options.progress_interval`, plus one
/// final event when the stream stops for any reason. A full sink blocks
/// the engine for at most `options.send_timeout`, after which that event is
/// dropped; later events carry the cumulative state, so nothing but
/// intermediate granularity is lost.
///
/// Returns the checkpoint with `bytes_done == total_size` on success.
pub async fn transfer(
    client: &Client,
    checkpoint: &Checkpoint,
    sink: &Sender<ProgressEvent>,
    options: &DownloadOptions,
    cancel: &CancellationToken,
) -> Result<Checkpoint> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let mut state = checkpoint.clone();
    let mut offset = state.reconcile_with_disk().await?;
    let mut meter = SpeedMeter::new(options.speed_window);
    meter.record(Instant::now(), offset);

    if state.is_complete() {
        debug!("{} already complete on disk", state.target_path.display());
        // A zero-length resource has nothing to stream but still needs a file.
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&state.target_path)
            .await?;
        emit(sink, &state, &meter, options.send_timeout).await;
        return Ok(state);
    }

    let mut request = client.get(&state.source_url);
    if offset > 0 {
        request = request.header(RANGE, format!("bytes={offset}-"));
    }
    debug!("GET {} from byte {offset}", state.source_url);

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        response = request.send() => response?,
    };

    let status = response.status();
    match status {
        StatusCode::PARTIAL_CONTENT => check_content_range(&response, &state, offset)?,
        s if s.is_success() => {
            if response.content_length().is_some_and(|len| len != state.total_size) {
                return Err(Error::StaleCheckpoint {
                    url: state.source_url.clone(),
                });
            }
            if offset > 0 {
                warn!(
                    "{} ignored the range request, restarting from byte 0",
                    response.url()
                );
                offset = 0;
            }
        }
        _ => {
            return Err(Error::HttpStatus {
                url: response.url().to_string(),
                status: status.as_u16(),
            })
        }
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&state.target_path)
        .await?;
    file.set_len(offset).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    state.bytes_done = offset;

    let mut stream = create_http_stream(response);
    let outcome = pump(&mut stream, &mut file, &mut state, &mut meter, sink, options, cancel).await;

    // Whatever happened, expose only bytes that were fully written.
    let flushed = file.flush().await;
    if matches!(outcome, Err(Error::StaleCheckpoint { .. })) {
        // The body outgrew the resource; none of it can be trusted.
        file.set_len(0).await?;
        state.bytes_done = 0;
    }
    emit(sink, &state, &meter, options.send_timeout).await;
    outcome?;
    flushed?;
    file.sync_data().await?;

    if state.bytes_done < state.total_size {
        return Err(Error::ShortTransfer {
            expected: state.total_size,
            received: state.bytes_done,
        });
    }
    Ok(state)
}

async fn pump(
    stream: &mut DownloadStream,
    file: &mut tokio::fs::File,
    state: &mut Checkpoint,
    meter: &mut SpeedMeter,
    sink: &Sender<ProgressEvent>,
    options: &DownloadOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut buffer = vec![0u8; options.buffer_size.max(1)];
    let mut last_emit = Instant::now();

    while state.bytes_done < state.total_size {
        let remaining = state.total_size - state.bytes_done;
        let want = usize::try_from(remaining).map_or(buffer.len(), |r| r.min(buffer.len()));

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            read = stream.read(&mut buffer[..want]) => {
                read.map_err(|e| Error::Transport(format!("Stream read error: {e}")))?
            }
        };
        if read == 0 {
            break;
        }

        file.write_all(&buffer[..read]).await?;
        state.bytes_done += read as u64;

        let now = Instant::now();
        meter.record(now, state.bytes_done);
        if now.duration_since(last_emit) >= options.progress_interval
            && state.bytes_done < state.total_size
        {
            file.flush().await?;
            emit(sink, state, meter, options.send_timeout).await;
            last_emit = now;
        }
    }

    if state.bytes_done == state.total_size {
        let extra = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            read = stream.read(&mut buffer[..1]) => {
                read.map_err(|e| Error::Transport(format!("Stream read error: {e}")))?
            }
        };
        if extra > 0 {
            warn!(
                "{} sent more than {} bytes",
                state.source_url, state.total_size
            );
            return Err(Error::StaleCheckpoint {
                url: state.source_url.clone(),
            });
        }
    }

    Ok(())
}

/// A 206 must start where we asked and describe the same resource length.
fn check_content_range(response: &reqwest::Response, state: &Checkpoint, offset: u64) -> Result<()> {
    let Some(range) = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
    else {
        return Ok(());
    };

    // bytes START-END/TOTAL
    let value = range.trim().trim_start_matches("bytes").trim();
    let (span, total) = value.split_once('/').unwrap_or((value, "*"));
    let start = span.split('-').next().and_then(|s| s.trim().parse::<u64>().ok());

    if let Ok(total) = total.trim().parse::<u64>() {
        if total != state.total_size {
            return Err(Error::StaleCheckpoint {
                url: state.source_url.clone(),
            });
        }
    }
    if start.is_some_and(|start| start != offset) {
        return Err(Error::Transport(format!(
            "{} resumed at the wrong offset ({range}, wanted byte {offset})",
            response.url()
        )));
    }
    Ok(())
}

async fn emit(sink: &Sender<ProgressEvent>, state: &Checkpoint, meter: &SpeedMeter, timeout: Duration) {
    let event = ProgressEvent {
        checkpoint: state.clone(),
        speed: meter.bytes_per_sec(),
        percent: state.percent(),
    };
    match sink.send_timeout(event, timeout).await {
        Ok(()) => {}
        Err(SendTimeoutError::Timeout(event)) => {
            debug!(
                "Progress sink busy, dropped event at {} bytes",
                event.checkpoint.bytes_done
            );
        }
        Err(SendTimeoutError::Closed(_)) => debug!("Progress sink closed"),
    }
}

/// Throughput over a sliding window of (time, cumulative bytes) samples
pub(crate) struct SpeedMeter {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl SpeedMeter {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    pub(crate) fn record(&mut self, at: Instant, bytes: u64) {
        self.samples.push_back((at, bytes));
        // Keep one sample at or beyond the window edge as the baseline.
        while self.samples.len() > 2 {
            let (second, _) = self.samples[1];
            if at.duration_since(second) >= self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub(crate) fn bytes_per_sec(&self) -> f64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(&(t0, b0)), Some(&(t1, b1))) => {
                let elapsed = t1.duration_since(t0).as_secs_f64();
                if elapsed > 0.0 {
                    b1.saturating_sub(b0) as f64 / elapsed
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }
}
