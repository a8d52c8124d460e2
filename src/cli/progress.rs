//! CLI-specific progress handling for isofetch
//!
//! Provides the progress bar and the observer hook that drives it.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use isofetch::{Progress, ProgressCallback};

const TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg} ETA: {eta}";

/// Creates a progress bar for CLI display
pub fn create_progress_bar(total_size: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_size);
    let style = ProgressStyle::default_bar()
        .template(TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Progress bar for one download
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    pub fn new(message: &str) -> Self {
        eprintln!("{message}");
        Self {
            pb: create_progress_bar(0),
        }
    }

    /// Observer that mirrors pipeline progress onto the bar.
    ///
    /// Throughput comes from the engine's sliding window rather than
    /// indicatif's own estimate, so a resumed download does not start with
    /// an inflated rate.
    pub fn observer(&self) -> ProgressCallback {
        let pb = self.pb.clone();
        Arc::new(move |p: Progress| update(&pb, p))
    }

    pub fn finish(&self) {
        self.pb.finish_with_message("done");
    }

    pub fn abandon(&self) {
        self.pb.abandon();
    }
}

fn update(pb: &ProgressBar, p: Progress) {
    if pb.length() != Some(p.total_size) {
        pb.set_length(p.total_size);
    }
    pb.set_position(p.bytes_done);
    pb.set_message(format!("{}/s", indicatif::DecimalBytes(p.speed as u64)));
}
