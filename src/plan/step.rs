//! Provisioning steps
//!
//! A [`Step`] is everything the executor needs to run one provisioning
//! action: what to do, which caches to hold, and the environment left behind
//! by the steps before it.

use crate::cache::{sha256_bytes, CacheMount};
use crate::catalog::PackageManager;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Archive container format, from the URL suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// Any tarball `tar` can auto-detect (gz, xz, bz2)
    Tar,
    Zip,
}

impl ArchiveFormat {
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.to_ascii_lowercase().ends_with(".zip") {
            Self::Zip
        } else {
            Self::Tar
        }
    }

    /// File name of the archive inside its cache directory
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Tar => "archive.tar",
            Self::Zip => "archive.zip",
        }
    }
}

/// What a step does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StepAction {
    /// Download an archive into the per-tool cache, then unpack it in the image
    FetchArchive {
        tool: String,
        version: String,
        url: String,
        sha256: Option<String>,
        format: ArchiveFormat,
        install_dir: String,
    },

    /// Install packages through a package manager
    PackageInstall {
        manager: PackageManager,
        packages: Vec<String>,
        version: String,
    },

    /// Run a fixed configuration command
    Configure { argv: Vec<String> },

    /// Run a tool's install script
    Script {
        tool: String,
        version: String,
        script: String,
    },
}

impl StepAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::FetchArchive { .. } => "fetch-archive",
            Self::PackageInstall { .. } => "package-install",
            Self::Configure { .. } => "configure",
            Self::Script { .. } => "script",
        }
    }

    /// Version recorded in the cache stamp
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::FetchArchive { version, .. }
            | Self::PackageInstall { version, .. }
            | Self::Script { version, .. } => Some(version),
            Self::Configure { .. } => None,
        }
    }
}

/// Environment a step contributes to the finished image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepExports {
    pub env: BTreeMap<String, String>,
    /// Directory folded into PATH
    pub bin_path: Option<String>,
}

/// One resolved provisioning step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Position in the build, 0-based
    pub index: usize,
    /// Stable identity, e.g. `tool:maven@3.9.6`
    pub id: String,
    pub description: String,
    pub action: StepAction,
    /// Caches held while the step runs; the first per-tool mount carries the stamp
    pub mounts: Vec<CacheMount>,
    /// Env exported by earlier steps, visible while this one runs
    pub build_env: BTreeMap<String, String>,
    /// Bin dirs of earlier steps, prepended to the container's PATH
    pub build_path: Vec<String>,
    pub exports: StepExports,
    /// sha256 over the action and mounts
    pub fingerprint: String,
}

impl Step {
    /// Cache holding this step's stamp, if it has one
    pub fn primary_mount(&self) -> Option<&CacheMount> {
        match self.action {
            StepAction::Configure { .. } => None,
            _ => self.mounts.first(),
        }
    }
}

impl Step {
    /// Identity of what this step keeps in its cache. Where the image
    /// unpacks it and which other caches are held do not count, so specs
    /// that relocate a tool still share its cache.
    pub fn cache_fingerprint(&self) -> String {
        cache_fingerprint(&self.action)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.index + 1, self.description)
    }
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    id: &'a str,
    action: &'a StepAction,
    mounts: &'a [CacheMount],
}

/// Content fingerprint of a step. Environment inherited from earlier steps
/// is left out so one tool cache can serve specs with different neighbors.
pub fn fingerprint(id: &str, action: &StepAction, mounts: &[CacheMount]) -> String {
    let input = FingerprintInput { id, action, mounts };
    // Serializing plain data into a Vec cannot fail
    let bytes = serde_json::to_vec(&input).unwrap_or_default();
    sha256_bytes(&bytes)
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
enum CachedArtifact<'a> {
    Archive {
        tool: &'a str,
        version: &'a str,
        url: &'a str,
    },
    Packages {
        manager: PackageManager,
        packages: &'a [String],
        version: &'a str,
    },
    Script {
        tool: &'a str,
        version: &'a str,
        script: &'a str,
    },
    Command {
        argv: &'a [String],
    },
}

/// Fingerprint of the cached artifact alone. A pinned sha256 is left out:
/// it is checked against the digest recorded in the stamp instead.
pub fn cache_fingerprint(action: &StepAction) -> String {
    let artifact = match action {
        StepAction::FetchArchive {
            tool, version, url, ..
        } => CachedArtifact::Archive { tool, version, url },
        StepAction::PackageInstall {
            manager,
            packages,
            version,
        } => CachedArtifact::Packages {
            manager: *manager,
            packages,
            version,
        },
        StepAction::Script {
            tool,
            version,
            script,
        } => CachedArtifact::Script {
            tool,
            version,
            script,
        },
        StepAction::Configure { argv } => CachedArtifact::Command { argv },
    };
    let bytes = serde_json::to_vec(&artifact).unwrap_or_default();
    sha256_bytes(&bytes)
}

/// Quote a word for `sh -c`. Plain words pass through unchanged.
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '@' | '+' | ',')
        });
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}
