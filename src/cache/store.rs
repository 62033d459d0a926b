//! Keyed cache store
//!
//! Hands out exclusive handles to `<root>/<key>` directories. Holders of the
//! same key queue behind each other; different keys never contend.

use crate::cache::mount::is_valid_key;
use crate::cache::stamp::{CacheState, Stamp};
use crate::error::{SandkitError, SandkitResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::fs;
use tokio::sync::{Mutex as KeyLock, OnceCell, OwnedMutexGuard};
use tracing::{debug, warn};

/// Process-wide store of keyed cache directories
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<KeyLock<()>>>>,
    root_ready: OnceCell<()>,
}

/// Exclusive access to one cache directory, released on drop
#[derive(Debug)]
pub struct CacheHandle {
    key: String,
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl CacheHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Host path of the cache directory
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A cache directory found on disk
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub path: PathBuf,
    pub state: CacheState,
    pub size_bytes: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CacheStore {
    /// Create a store rooted at `root`. Nothing touches disk until the first acquire.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
            root_ready: OnceCell::new(),
        }
    }

    /// The process-wide store. The first caller fixes the root.
    pub fn global(root: &Path) -> Arc<CacheStore> {
        static STORE: OnceLock<Arc<CacheStore>> = OnceLock::new();
        let store = STORE.get_or_init(|| Arc::new(CacheStore::new(root)));
        if store.root != root {
            warn!(
                "Cache store already rooted at {}, ignoring {}",
                store.root.display(),
                root.display()
            );
        }
        Arc::clone(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host directory for a key
    pub fn path_for(&self, key: &str) -> SandkitResult<PathBuf> {
        if !is_valid_key(key) {
            return Err(SandkitError::CacheKeyInvalid(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    fn key_lock(&self, key: &str) -> SandkitResult<Arc<KeyLock<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| SandkitError::Internal("cache lock table poisoned".to_string()))?;
        Ok(Arc::clone(locks.entry(key.to_string()).or_default()))
    }

    async fn ensure_root(&self) -> SandkitResult<()> {
        self.root_ready
            .get_or_try_init(|| async {
                fs::create_dir_all(&self.root).await.map_err(|e| {
                    SandkitError::io(format!("creating cache root {}", self.root.display()), e)
                })?;
                debug!("Cache store initialized at {}", self.root.display());
                Ok::<(), SandkitError>(())
            })
            .await?;
        Ok(())
    }

    /// Acquire exclusive access to a key, waiting for any current holder
    pub async fn acquire(&self, key: &str) -> SandkitResult<CacheHandle> {
        let path = self.path_for(key)?;
        self.ensure_root().await?;

        let lock = self.key_lock(key)?;
        let guard = match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Cache key {} is busy, waiting", key);
                lock.lock_owned().await
            }
        };

        fs::create_dir_all(&path)
            .await
            .map_err(|e| SandkitError::io(format!("creating cache dir {}", path.display()), e))?;

        Ok(CacheHandle {
            key: key.to_string(),
            path,
            _guard: guard,
        })
    }

    /// Make sure the directory for a key exists without taking its lock.
    /// Bind mounts need the host side to exist before the container starts.
    pub async fn prepare_dir(&self, key: &str) -> SandkitResult<PathBuf> {
        let path = self.path_for(key)?;
        self.ensure_root().await?;
        fs::create_dir_all(&path)
            .await
            .map_err(|e| SandkitError::io(format!("creating cache dir {}", path.display()), e))?;
        Ok(path)
    }

    /// Give a handle back. Equivalent to dropping it.
    pub fn release(&self, handle: CacheHandle) {
        debug!("Released cache key {}", handle.key);
        drop(handle);
    }

    /// All cache directories under the root, sorted by key
    pub async fn entries(&self) -> SandkitResult<Vec<CacheEntry>> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SandkitError::io(
                    format!("reading cache root {}", self.root.display()),
                    e,
                ))
            }
        };

        let mut entries = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| SandkitError::io("listing cache entries", e))?
        {
            let path = item.path();
            let Some(key) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            if !path.is_dir() || !is_valid_key(&key) {
                continue;
            }

            let (state, updated_at) = match Stamp::read(&path, &key).await {
                Ok(Some(stamp)) => (stamp.state, Some(stamp.updated_at)),
                Ok(None) => (CacheState::Miss, None),
                Err(e) => {
                    warn!("Skipping stamp of {}: {}", key, e);
                    (CacheState::Building, None)
                }
            };

            entries.push(CacheEntry {
                size_bytes: dir_size(&path).await,
                key,
                path,
                state,
                updated_at,
            });
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Delete one cache directory once no build holds it. Returns whether it existed.
    pub async fn remove(&self, key: &str) -> SandkitResult<bool> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(false);
        }

        let handle = self.acquire(key).await?;
        fs::remove_dir_all(handle.path())
            .await
            .map_err(|e| SandkitError::io(format!("removing cache {}", path.display()), e))?;
        debug!("Removed cache {}", key);
        Ok(true)
    }
}

/// Total size of regular files under a directory
async fn dir_size(path: &Path) -> u64 {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut total = 0;
        let mut pending = vec![path];
        while let Some(dir) = pending.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                match entry.file_type() {
                    Ok(ft) if ft.is_dir() => pending.push(entry.path()),
                    Ok(ft) if ft.is_file() => {
                        total += entry.metadata().map(|m| m.len()).unwrap_or(0);
                    }
                    _ => {}
                }
            }
        }
        total
    })
    .await
    .unwrap_or(0)
}
