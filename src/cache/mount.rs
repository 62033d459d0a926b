//! Cache mount descriptors
//!
//! A [`CacheMount`] names a keyed host directory and where it appears inside
//! the build container. The host side lives under the store root as
//! `<root>/<key>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Who a cache belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheScope {
    /// One tool at one version
    PerTool,
    /// Shared by every build that mounts it, e.g. a package manager repository
    Shared,
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerTool => write!(f, "per-tool"),
            Self::Shared => write!(f, "shared"),
        }
    }
}

/// A keyed persistent directory mounted into the build container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheMount {
    /// Cache key, also the directory name under the store root
    pub key: String,
    /// Mount path inside the build container
    pub mount_path: String,
    pub scope: CacheScope,
}

impl CacheMount {
    pub fn per_tool(key: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            mount_path: mount_path.into(),
            scope: CacheScope::PerTool,
        }
    }

    pub fn shared(key: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            mount_path: mount_path.into(),
            scope: CacheScope::Shared,
        }
    }

    /// Bind mount argument for podman/docker (`host:container`)
    pub fn volume_arg(&self, host_path: &Path) -> String {
        format!("{}:{}", host_path.display(), self.mount_path)
    }
}

/// Keys must stay a single path component under the store root
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}
