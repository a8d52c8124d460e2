//! # isofetch Library
//!
//! Resumable downloads of large disk images from lists of mirrors.
//!
//! ## Features
//!
//! - **Resumable**: progress is checkpointed to disk as the transfer runs, so an
//!   interrupted download continues from the bytes already written
//! - **Stale detection**: a checkpoint is only resumed while the remote file
//!   still has the recorded size and modification time
//! - **Mirror failover**: candidates are probed in order and the first
//!   reachable one is used
//! - **Remote-URL cache**: URLs from an external resolver are remembered and
//!   reused when the resolver breaks
//! - **Progress tracking**: optional observer callback for custom UIs
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Download into the current directory, checkpointing under ./.isofetch
//!     isofetch::get("ubuntu/24.10-server", None).await?;
//!
//!     // Download to a specific file
//!     isofetch::get("virtio", Some("/var/lib/vz/template/iso/virtio-win.iso")).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Step by step
//!
//! ```rust,no_run
//! use isofetch::{CancellationToken, Downloader};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = Downloader::new()?;
//!     let cancel = CancellationToken::new();
//!     let mirrors = ["https://mirror-a.example/disk.img", "https://mirror-b.example/disk.img"];
//!
//!     let checkpoint = downloader
//!         .prepare(Path::new("disk.ops"), &mirrors, Path::new("disk.img.part"), &cancel)
//!         .await?;
//!     downloader
//!         .download(Path::new("disk.ops"), &checkpoint, Path::new("disk.img"), &cancel)
//!         .await?;
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

// Re-export core types that users might need
pub use crate::core::cache::{JsonFileUrlStore, MemoryUrlStore, RemoteUrlCache, UrlStore};
pub use crate::core::checkpoint::Checkpoint;
pub use crate::core::downloader::{
    retry_resumable, ClientConfig, Downloader, BASE_RETRY_DELAY_MS, MAX_RETRY_ATTEMPTS,
};
pub use crate::core::error::{Error, Result};
pub use crate::core::probe::ProbeResult;
pub use crate::core::resolver::{parse_last_url, ResolverCommand};
pub use crate::core::source::{clean_tag, known_sources, resolve_source, SourceEntry};
pub use crate::core::stream::{DownloadOptions, Progress, ProgressCallback, ProgressEvent};
pub use tokio_util::sync::CancellationToken;

pub mod core;

/// Directory used for checkpoints and partial files when none is given
pub const DEFAULT_CACHE_DIR: &str = ".isofetch";

/// Where the checkpoint and partial file for a source live inside `cache_dir`
pub fn work_paths(cache_dir: &Path, entry: &SourceEntry) -> (PathBuf, PathBuf) {
    (
        cache_dir.join(format!("{}.ops", entry.tag)),
        cache_dir.join(format!("{}.part", entry.file_name)),
    )
}

/// Download a catalog source or URL to a destination
///
/// # Arguments
/// * `source` - Source identifier (e.g., "ubuntu/24.10-server", "virtio", or a URL)
/// * `dest` - Optional destination file path. If None, uses the source's file name
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// isofetch::get("istoreos/24.10", None).await?;
/// # Ok(())
/// # }
/// ```
pub async fn get(source: &str, dest: Option<&str>) -> Result<PathBuf> {
    get_with_options(source, dest, DownloadOptions::default()).await
}

/// Download with a progress callback
///
/// # Arguments
/// * `source` - Source identifier or URL
/// * `dest` - Optional destination file path
/// * `progress` - Called with each progress snapshot
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// isofetch::get_with_progress("virtio", None, |p| {
///     println!("{:.1}% at {:.0} B/s", p.percent, p.speed);
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn get_with_progress<F>(source: &str, dest: Option<&str>, progress: F) -> Result<PathBuf>
where
    F: Fn(Progress) + Send + Sync + 'static,
{
    let options = DownloadOptions {
        progress: Some(Arc::new(progress)),
        ..Default::default()
    };
    get_with_options(source, dest, options).await
}

/// Download with custom options
///
/// Checkpoints and partial files go to [`DEFAULT_CACHE_DIR`]; calling this
/// again after a failure resumes the transfer.
pub async fn get_with_options(
    source: &str,
    dest: Option<&str>,
    options: DownloadOptions,
) -> Result<PathBuf> {
    let entry = resolve_source(source)?;
    let dest = match dest {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(&entry.file_name),
    };

    let cache_dir = Path::new(DEFAULT_CACHE_DIR);
    tokio::fs::create_dir_all(cache_dir).await?;
    let (checkpoint_path, partial_path) = work_paths(cache_dir, &entry);

    let downloader = Downloader::new()?.with_options(options);
    downloader
        .fetch(
            &checkpoint_path,
            &entry.mirrors,
            &partial_path,
            &dest,
            &CancellationToken::new(),
        )
        .await
}
