//! Core download functionality for isofetch
//!
//! [`Downloader`] bundles the HTTP client, the remote-URL cache and the
//! transfer options, and exposes each stage of a resumable download as a
//! method. Nothing here is global: two downloaders never share state.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use reqwest::{Client, ClientBuilder};
use tokio_util::sync::CancellationToken;

use crate::core::cache::RemoteUrlCache;
use crate::core::checkpoint::Checkpoint;
use crate::core::error::{Error, Result};
use crate::core::finalize::finalize_with_copy_fallback;
use crate::core::mirror;
use crate::core::pipeline::transfer_with_checkpoints;
use crate::core::probe::{self, ProbeResult};
use crate::core::resolver::ResolverCommand;
use crate::core::stream::DownloadOptions;
use crate::core::validate;

/// Maximum number of retry attempts for resumable errors
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds)
pub const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Re-run `operation` while it fails with a resumable error, doubling the
/// delay after each attempt. Cancellation during a backoff pause ends the
/// loop with [`Error::Cancelled`].
pub async fn retry_resumable<F, Fut, T>(
    max_retries: u32,
    base_delay: Duration,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_resumable() && attempt < max_retries => {
                attempt += 1;
                let delay = base_delay * (1 << (attempt - 1));
                warn!("{e} (attempt {attempt}), retrying in {delay:?}");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// HTTP client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Applies to each HEAD / range probe, not to transfers
    pub probe_timeout: Duration,
    pub max_redirects: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("isofetch/{}", env!("ISOFETCH_VERSION")),
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Resumable multi-mirror downloader
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    config: ClientConfig,
    cache: RemoteUrlCache,
    options: DownloadOptions,
}

impl Downloader {
    /// Create a downloader with default settings and no URL cache
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Create a downloader with custom client settings
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .tcp_keepalive(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            cache: RemoteUrlCache::Disabled,
            options: DownloadOptions::default(),
        })
    }

    pub fn with_cache(mut self, cache: RemoteUrlCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_options(mut self, options: DownloadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Size and modification time of `url`
    pub async fn probe(&self, url: &str, cancel: &CancellationToken) -> Result<ProbeResult> {
        probe::probe(&self.client, url, self.config.probe_timeout, cancel).await
    }

    /// First candidate that answers a probe, in list order
    pub async fn select_first_reachable<S: AsRef<str>>(
        &self,
        urls: &[S],
        cancel: &CancellationToken,
    ) -> Result<(String, ProbeResult)> {
        mirror::select_first_reachable(&self.client, urls, self.config.probe_timeout, cancel).await
    }

    /// Whether `checkpoint` still matches its remote resource
    pub async fn validate(&self, checkpoint: &Checkpoint, cancel: &CancellationToken) -> Result<bool> {
        validate::validate(&self.client, checkpoint, self.config.probe_timeout, cancel).await
    }

    /// Resume the checkpoint at `checkpoint_path` or start fresh from the
    /// first reachable candidate; see [`validate::prepare`].
    pub async fn prepare<S: AsRef<str>>(
        &self,
        checkpoint_path: &Path,
        candidates: &[S],
        partial_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Checkpoint> {
        validate::prepare(
            &self.client,
            checkpoint_path,
            candidates,
            partial_path,
            self.config.probe_timeout,
            cancel,
        )
        .await
    }

    /// Stream the remaining bytes, persisting progress to `checkpoint_path`
    pub async fn transfer(
        &self,
        checkpoint_path: &Path,
        checkpoint: &Checkpoint,
        cancel: &CancellationToken,
    ) -> Result<Checkpoint> {
        transfer_with_checkpoints(&self.client, checkpoint_path, checkpoint, &self.options, cancel)
            .await
    }

    /// Promote a completed partial file to `dest` and forget its checkpoint
    pub async fn finalize(
        &self,
        checkpoint_path: &Path,
        checkpoint: &Checkpoint,
        dest: &Path,
    ) -> Result<()> {
        finalize_with_copy_fallback(checkpoint_path, checkpoint, dest, self.options.settle_delay)
            .await
    }

    /// Transfer then finalize
    pub async fn download(
        &self,
        checkpoint_path: &Path,
        checkpoint: &Checkpoint,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let done = self.transfer(checkpoint_path, checkpoint, cancel).await?;
        self.finalize(checkpoint_path, &done, dest).await?;
        Ok(dest.to_path_buf())
    }

    /// Prepare, transfer and finalize in one call.
    ///
    /// Safe to call again after any failure: a surviving checkpoint is
    /// validated and resumed.
    pub async fn fetch<S: AsRef<str>>(
        &self,
        checkpoint_path: &Path,
        candidates: &[S],
        partial_path: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let checkpoint = self
            .prepare(checkpoint_path, candidates, partial_path, cancel)
            .await?;
        self.download(checkpoint_path, &checkpoint, dest, cancel).await
    }

    pub fn remote_url_cache_enabled(&self) -> bool {
        self.cache.is_enabled()
    }

    /// Runs on the calling thread, so a file-backed store blocks it.
    pub fn put_remote_url(&self, key: &str, url: &str) -> Result<()> {
        self.cache.put(key, url)
    }

    pub fn get_remote_urls(&self, key: &str) -> Result<Vec<String>> {
        self.cache.get(key)
    }

    /// Run a cache operation on the blocking pool; stores may do file I/O.
    async fn with_cache_blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&RemoteUrlCache) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || op(&cache))
            .await
            .map_err(|e| Error::IoError(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    /// Build the candidate list for `tag`.
    ///
    /// A URL from `resolver` is remembered in the cache and tried first.
    /// When the resolver fails, cached URLs (most recent first, minus any
    /// containing a `reject` pattern) stand in for it. `defaults` always
    /// follow. Duplicates are dropped.
    pub async fn resolve_candidates(
        &self,
        tag: &str,
        resolver: Option<&ResolverCommand>,
        defaults: &[String],
        reject: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let mut candidates = Vec::new();

        let resolved = match resolver {
            Some(resolver) => match resolver.resolve(cancel).await {
                Ok(url) => url,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!("Resolver failed: {e}");
                    None
                }
            },
            None => None,
        };

        match resolved {
            Some(url) => {
                info!("Resolved {tag} to {url}");
                let (key, value) = (tag.to_string(), url.clone());
                match self
                    .with_cache_blocking(move |cache| cache.put(&key, &value))
                    .await
                {
                    Ok(()) | Err(Error::CacheDisabled) => {}
                    Err(e) => warn!("Could not remember {url}: {e}"),
                }
                candidates.push(url);
            }
            None if self.remote_url_cache_enabled() => {
                let key = tag.to_string();
                match self.with_cache_blocking(move |cache| cache.get(&key)).await {
                    Ok(cached) => candidates.extend(
                        cached
                            .into_iter()
                            .rev()
                            .filter(|url| !reject.iter().any(|pattern| url.contains(pattern))),
                    ),
                    Err(e) => warn!("Could not read cached URLs for {tag}: {e}"),
                }
            }
            None => {}
        }

        candidates.extend(defaults.iter().cloned());

        let mut unique = Vec::with_capacity(candidates.len());
        for url in candidates {
            if !unique.contains(&url) {
                unique.push(url);
            }
        }
        Ok(unique)
    }
}
