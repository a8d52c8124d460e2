//! Remote-URL cache
//!
//! Remembers download URLs that an external resolver produced, keyed by a
//! caller-chosen tag, so a later run can fall back to them when the resolver
//! breaks. Entries are only ever appended; nothing is evicted or
//! de-duplicated, and callers re-probe before trusting a cached URL.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use log::warn;

use crate::core::error::{Error, Result};

/// Backing storage for a configured cache
pub trait UrlStore: Send + Sync {
    /// Append `url` to the list stored under `key`
    fn put(&self, key: &str, url: &str) -> Result<()>;

    /// All URLs stored under `key`, oldest first
    fn get(&self, key: &str) -> Result<Vec<String>>;
}

/// Cache capability chosen when the downloader is built
#[derive(Clone, Default)]
pub enum RemoteUrlCache {
    /// Both operations report [`Error::CacheDisabled`]
    #[default]
    Disabled,
    Configured(Arc<dyn UrlStore>),
}

impl RemoteUrlCache {
    pub fn configured(store: impl UrlStore + 'static) -> Self {
        RemoteUrlCache::Configured(Arc::new(store))
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, RemoteUrlCache::Configured(_))
    }

    pub fn put(&self, key: &str, url: &str) -> Result<()> {
        match self {
            RemoteUrlCache::Disabled => Err(Error::CacheDisabled),
            RemoteUrlCache::Configured(store) => store.put(key, url),
        }
    }

    pub fn get(&self, key: &str) -> Result<Vec<String>> {
        match self {
            RemoteUrlCache::Disabled => Err(Error::CacheDisabled),
            RemoteUrlCache::Configured(store) => store.get(key),
        }
    }
}

impl std::fmt::Debug for RemoteUrlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteUrlCache::Disabled => f.write_str("RemoteUrlCache::Disabled"),
            RemoteUrlCache::Configured(_) => f.write_str("RemoteUrlCache::Configured"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process store, mostly useful for embedding and tests
#[derive(Default)]
pub struct MemoryUrlStore {
    entries: Mutex<HashMap<String, Vec<String>>>,
}

impl UrlStore for MemoryUrlStore {
    fn put(&self, key: &str, url: &str) -> Result<()> {
        lock(&self.entries)
            .entry(key.to_string())
            .or_default()
            .push(url.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<String>> {
        Ok(lock(&self.entries).get(key).cloned().unwrap_or_default())
    }
}

/// Store persisted as a JSON object of `tag -> [url, ...]`
///
/// Every call reads or rewrites the file with blocking I/O. From async
/// code, run it on the blocking pool as [`Downloader::resolve_candidates`]
/// does.
///
/// [`Downloader::resolve_candidates`]: crate::core::Downloader::resolve_candidates
pub struct JsonFileUrlStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonFileUrlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, Vec<String>>> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&data) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!("Ignoring unreadable URL cache {}: {e}", self.path.display());
                Ok(HashMap::new())
            }
        }
    }

    fn store(&self, entries: &HashMap<String, Vec<String>>) -> Result<()> {
        let data = serde_json::to_vec_pretty(entries)
            .map_err(|e| Error::InvalidInput(format!("Cannot encode URL cache: {e}")))?;

        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl UrlStore for JsonFileUrlStore {
    fn put(&self, key: &str, url: &str) -> Result<()> {
        let _guard = lock(&self.guard);
        let mut entries = self.load()?;
        entries.entry(key.to_string()).or_default().push(url.to_string());
        self.store(&entries)
    }

    fn get(&self, key: &str) -> Result<Vec<String>> {
        let _guard = lock(&self.guard);
        Ok(self.load()?.remove(key).unwrap_or_default())
    }
}
