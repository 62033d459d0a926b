//! Idempotency stamps
//!
//! Every cached step records its progress in `.sandkit/stamp.json` inside its
//! primary cache mount. A step writes a `building` stamp before touching the
//! cache and flips it to `complete` only after everything succeeded, so a
//! crash in between never looks installed.

use crate::error::{SandkitError, SandkitResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Directory inside a cache mount reserved for sandkit metadata
pub const STAMP_DIR: &str = ".sandkit";

const STAMP_FILE: &str = "stamp.json";

/// State of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    /// Nothing recorded yet
    Miss,
    /// A step started but never finished, retryable
    Building,
    /// Finalized by a successful step
    Complete,
}

impl CacheState {
    pub fn is_warm(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Miss => write!(f, "miss"),
            Self::Building => write!(f, "building"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Marker recording which step populated a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub step_id: String,
    pub state: CacheState,
    pub fingerprint: String,
    pub version: String,
    /// sha256 of the cached artifact, for archive steps
    #[serde(default)]
    pub digest: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Stamp {
    /// Stamp written before a step writes into the cache
    pub fn building(
        step_id: impl Into<String>,
        fingerprint: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            state: CacheState::Building,
            fingerprint: fingerprint.into(),
            version: version.into(),
            digest: None,
            updated_at: Utc::now(),
        }
    }

    /// Finalize a stamp after the step succeeded
    pub fn complete(mut self, digest: Option<String>) -> Self {
        self.state = CacheState::Complete;
        self.digest = digest;
        self.updated_at = Utc::now();
        self
    }

    /// Location of the stamp inside a cache directory
    pub fn path(cache_dir: &Path) -> PathBuf {
        cache_dir.join(STAMP_DIR).join(STAMP_FILE)
    }

    /// Read the stamp of a cache directory, `None` if there is none yet.
    ///
    /// Stamps are replaced atomically, so an unreadable one means the entry
    /// was tampered with.
    pub async fn read(cache_dir: &Path, key: &str) -> SandkitResult<Option<Self>> {
        let path = Self::path(cache_dir);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SandkitError::io(
                    format!("reading stamp {}", path.display()),
                    e,
                ))
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| SandkitError::mismatch(key, format!("unreadable stamp: {}", e)))
    }

    /// Write the stamp via a temporary file and rename
    pub async fn write(&self, cache_dir: &Path) -> SandkitResult<()> {
        let dir = cache_dir.join(STAMP_DIR);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| SandkitError::io(format!("creating {}", dir.display()), e))?;

        let path = Self::path(cache_dir);
        let tmp = dir.join(format!("{}.tmp", STAMP_FILE));
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, content)
            .await
            .map_err(|e| SandkitError::io(format!("writing stamp {}", tmp.display()), e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| SandkitError::io(format!("renaming stamp {}", path.display()), e))?;

        debug!("Stamped {} as {}", cache_dir.display(), self.state);
        Ok(())
    }
}

/// Decide the cache state for a step from its existing stamp.
///
/// A complete stamp left by a different step identity is an integrity
/// violation, not a miss.
pub fn check_stamp(
    key: &str,
    stamp: Option<&Stamp>,
    fingerprint: &str,
    version: &str,
) -> SandkitResult<CacheState> {
    let Some(stamp) = stamp else {
        return Ok(CacheState::Miss);
    };

    match stamp.state {
        CacheState::Complete if stamp.version != version => Err(SandkitError::mismatch(
            key,
            format!(
                "cache holds version {} but step expects {}",
                stamp.version, version
            ),
        )),
        CacheState::Complete if stamp.fingerprint != fingerprint => Err(SandkitError::mismatch(
            key,
            format!(
                "cache was populated by {} with fingerprint {}, step fingerprint is {}",
                stamp.step_id,
                short(&stamp.fingerprint),
                short(fingerprint)
            ),
        )),
        CacheState::Complete => Ok(CacheState::Complete),
        CacheState::Building | CacheState::Miss => Ok(CacheState::Building),
    }
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

/// Hash a file's contents using SHA256, returning the full hex digest
pub async fn sha256_file(path: &Path) -> SandkitResult<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)
            .map_err(|e| SandkitError::io(format!("opening {}", path.display()), e))?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)
            .map_err(|e| SandkitError::io(format!("hashing {}", path.display()), e))?;
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| SandkitError::Internal(format!("hash task failed: {}", e)))?
}

/// Hash an in-memory buffer using SHA256
pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
