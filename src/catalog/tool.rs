//! Tool descriptors
//!
//! A [`ToolSpec`] is one installable unit pinned to an exact version. The
//! install method decides which kind of provisioning step the resolver
//! emits for it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Mount path prefix for per-tool cache directories inside the build container
pub const TOOL_CACHE_PREFIX: &str = "/var/cache/sandkit";

/// Version strings that float over time and can never be reproducible
const FLOATING_TAGS: &[&str] = &[
    "latest", "lts", "stable", "current", "nightly", "edge", "head", "main", "master",
];

/// Package managers the executor knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    /// Debian/Ubuntu apt-get
    Apt,
    /// npm global installs
    Npm,
}

impl PackageManager {
    /// Shared-global caches this manager keeps its downloads and indexes in
    pub fn caches(&self) -> Vec<SharedCache> {
        match self {
            Self::Apt => vec![
                SharedCache::new("apt-archives", "/var/cache/apt/archives"),
                SharedCache::new("apt-lists", "/var/lib/apt/lists"),
            ],
            Self::Npm => vec![SharedCache::new("npm-cache", "/root/.npm")],
        }
    }

    /// Package argument for a tool installed through this manager
    pub fn package_for(&self, name: &str, version: &str) -> String {
        match self {
            Self::Apt => format!("{}={}", name, version),
            Self::Npm => format!("{}@{}", name, version),
        }
    }

    /// Shell command installing `packages` (already quoted). With `offline`
    /// everything must come from the warm caches.
    pub fn install_command(&self, packages: &[String], offline: bool) -> String {
        let list = packages.join(" ");
        match self {
            // Keep downloaded .debs so the shared archive cache warms up
            Self::Apt if offline => format!(
                "rm -f /etc/apt/apt.conf.d/docker-clean && \
                 DEBIAN_FRONTEND=noninteractive apt-get install -y --no-install-recommends --no-download {}",
                list
            ),
            Self::Apt => format!(
                "rm -f /etc/apt/apt.conf.d/docker-clean && apt-get update && \
                 DEBIAN_FRONTEND=noninteractive apt-get install -y --no-install-recommends {}",
                list
            ),
            Self::Npm => format!(
                "npm install -g {}--cache /root/.npm {}",
                if offline { "--offline " } else { "" },
                list
            ),
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apt => write!(f, "apt"),
            Self::Npm => write!(f, "npm"),
        }
    }
}

/// How a tool gets installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InstallMethod {
    /// Download an archive and extract it. `{version}` in the URL is expanded.
    ArchiveDownload {
        url: String,
        #[serde(default)]
        sha256: Option<String>,
    },

    /// Install through a package manager
    PackageManager {
        manager: PackageManager,
        /// Explicit packages; defaults to the tool itself at its version
        #[serde(default)]
        packages: Vec<String>,
    },

    /// Run a shell script inside the build container
    Script { script: String },
}

impl InstallMethod {
    /// Short label for tables and logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::ArchiveDownload { .. } => "archive-download",
            Self::PackageManager { .. } => "package-manager",
            Self::Script { .. } => "script",
        }
    }
}

/// A cache shared by every build that needs it, e.g. a local Maven repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharedCache {
    pub key: String,
    pub mount_path: String,
}

impl SharedCache {
    pub fn new(key: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            mount_path: mount_path.into(),
        }
    }
}

/// One installable unit, pinned to an exact version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub version: String,
    pub method: InstallMethod,

    /// Where the tool lives in the finished image
    pub path_hint: String,

    /// Sub directory of `path_hint` to put on PATH
    #[serde(default)]
    pub bin_dir: Option<String>,

    /// Environment the tool contributes to the image
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Shared-global caches mounted while the tool installs
    #[serde(default)]
    pub shared_caches: Vec<SharedCache>,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        method: InstallMethod,
        path_hint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            method,
            path_hint: path_hint.into(),
            bin_dir: None,
            env: BTreeMap::new(),
            shared_caches: Vec::new(),
        }
    }

    pub fn with_bin_dir(mut self, dir: impl Into<String>) -> Self {
        self.bin_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_shared_cache(mut self, key: impl Into<String>, mount_path: impl Into<String>) -> Self {
        self.shared_caches.push(SharedCache::new(key, mount_path));
        self
    }

    /// Per-tool cache key, derived from name and version
    pub fn cache_key(&self) -> String {
        cache_key_for(&self.name, &self.version)
    }

    /// Mount path of the per-tool cache inside the build container
    pub fn cache_mount_path(&self) -> String {
        format!("{}/{}", TOOL_CACHE_PREFIX, self.cache_key())
    }

    /// Directory folded into PATH, if the tool has one
    pub fn bin_path(&self) -> Option<String> {
        self.bin_dir.as_ref().map(|dir| {
            if dir.is_empty() || dir == "." {
                self.path_hint.clone()
            } else {
                format!("{}/{}", self.path_hint.trim_end_matches('/'), dir)
            }
        })
    }

    /// Download URL with `{version}` expanded (archive installs only)
    pub fn source_url(&self) -> Option<String> {
        match &self.method {
            InstallMethod::ArchiveDownload { url, .. } => Some(url.replace("{version}", &self.version)),
            _ => None,
        }
    }
}

/// Derive a filesystem-safe cache key from a tool name and version
pub fn cache_key_for(name: &str, version: &str) -> String {
    format!("{}-{}", name, version)
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Whether a version string is exact, i.e. never resolves to something else later
pub fn is_pinned(version: &str) -> bool {
    let version = version.trim();
    if version.is_empty() {
        return false;
    }
    if FLOATING_TAGS
        .iter()
        .any(|tag| version.eq_ignore_ascii_case(tag))
    {
        return false;
    }
    if version
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '*' | '^' | '~' | '>' | '<' | '=' | '|' | ','))
    {
        return false;
    }

    let core = version.strip_prefix('v').unwrap_or(version);
    if !core.starts_with(|c: char| c.is_ascii_digit()) {
        return false;
    }

    // "3.x" style wildcards
    core.split(['.', '-', '+'])
        .all(|part| !part.eq_ignore_ascii_case("x"))
}

/// Numeric ordering key for a version, padding "21" to "21.0.0"
pub fn version_order_key(version: &str) -> Option<semver::Version> {
    let version = version.trim().strip_prefix('v').unwrap_or(version.trim());
    let split_at = version.find(['-', '+']).unwrap_or(version.len());
    let (core, suffix) = version.split_at(split_at);

    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    while parts.len() < 3 {
        parts.push("0");
    }

    semver::Version::parse(&format!("{}{}", parts.join("."), suffix)).ok()
}
