//! Error types for sandkit
//!
//! All modules use `SandkitResult<T>` as their return type. Every error maps
//! onto an [`ErrorKind`], which is what build results and retry decisions
//! are keyed on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sandkit operations
pub type SandkitResult<T> = Result<T, SandkitError>;

/// Coarse error classification recorded in build results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Spec failed validation, never retried
    InvalidSpec,
    /// Tool missing from the catalog
    UnknownTool,
    /// Conflicting redefinition of a tool
    DuplicateTool,
    /// Network or download error, retried with backoff
    TransientFailure,
    /// Cache or content integrity violation, never retried
    ChecksumOrVersionMismatch,
    /// Install or configure command failed
    CommandFailure,
    /// Build cancelled at a step boundary
    Cancelled,
    /// IO or runtime plumbing error
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidSpec => "invalid-spec",
            Self::UnknownTool => "unknown-tool",
            Self::DuplicateTool => "duplicate-tool",
            Self::TransientFailure => "transient-failure",
            Self::ChecksumOrVersionMismatch => "checksum-or-version-mismatch",
            Self::CommandFailure => "command-failure",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

/// All errors that can occur in sandkit
#[derive(Error, Debug)]
pub enum SandkitError {
    // Specification errors
    #[error("Invalid image spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("Image spec not found: {0}")]
    SpecNotFound(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Conflicting definition for tool {name} {version}: {reason}")]
    DuplicateTool {
        name: String,
        version: String,
        reason: String,
    },

    // Execution errors
    #[error("Transient failure while {context}: {reason}")]
    TransientFailure { context: String, reason: String },

    #[error("Download rejected: {url} (HTTP {status})")]
    DownloadRejected { url: String, status: u16 },

    #[error("Download exceeds {limit} bytes: {url}")]
    DownloadTooLarge { url: String, limit: u64 },

    #[error("Checksum or version mismatch in cache '{key}': {reason}")]
    ChecksumOrVersionMismatch { key: String, reason: String },

    #[error("Command failed: {command}, exit code: {code}\n{output}")]
    CommandFailure {
        command: String,
        code: i32,
        output: String,
    },

    #[error("Build cancelled")]
    Cancelled,

    // Runtime errors
    #[error("Container runtime not available: {0}")]
    RuntimeNotFound(String),

    #[error("Image pull failed: {image}: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("Container failed to start: {0}")]
    ContainerStart(String),

    #[error("Image commit failed: {tag}: {reason}")]
    ImageCommit { tag: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Cache errors
    #[error("Invalid cache key: {0}")]
    CacheKeyInvalid(String),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command could not be started: {command}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl SandkitError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a spawn error for a command that never ran
    pub fn command_spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandSpawn {
            command: command.into(),
            source,
        }
    }

    /// Create an invalid spec error
    pub fn invalid_spec(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            spec: spec.into(),
            reason: reason.into(),
        }
    }

    /// Create a transient error
    pub fn transient(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransientFailure {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Create a cache integrity error
    pub fn mismatch(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ChecksumOrVersionMismatch {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Classify the error for build results and retry decisions
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSpec { .. } | Self::SpecNotFound(_) => ErrorKind::InvalidSpec,
            Self::UnknownTool(_) => ErrorKind::UnknownTool,
            Self::DuplicateTool { .. } => ErrorKind::DuplicateTool,
            Self::TransientFailure { .. } | Self::ImagePull { .. } => ErrorKind::TransientFailure,
            Self::ChecksumOrVersionMismatch { .. } => ErrorKind::ChecksumOrVersionMismatch,
            Self::CommandFailure { .. }
            | Self::DownloadRejected { .. }
            | Self::DownloadTooLarge { .. }
            | Self::ContainerStart(_)
            | Self::ImageCommit { .. } => ErrorKind::CommandFailure,
            Self::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Internal,
        }
    }

    /// Check if error is retryable with backoff
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientFailure
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::RuntimeNotFound(_) => {
                Some("Install podman (or set runtime.engine = \"docker\" in the config)")
            }
            Self::ChecksumOrVersionMismatch { .. } => {
                Some("The cache entry is corrupted or stale. Run: sandkit cache clear <key>")
            }
            Self::InvalidSpec { .. } => Some("Inspect the resolved steps with: sandkit plan <spec>"),
            Self::SpecNotFound(_) => Some("Built-in specs are listed by: sandkit plan --list"),
            Self::UnknownTool(_) => Some("Available tools are listed by: sandkit catalog"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SandkitError::invalid_spec("java", "workdir is empty");
        assert_eq!(err.to_string(), "Invalid image spec 'java': workdir is empty");
    }

    #[test]
    fn error_hint() {
        let err = SandkitError::mismatch("maven-3.9.6", "digest changed");
        assert!(err.hint().unwrap().contains("sandkit cache clear"));
        assert!(SandkitError::Cancelled.hint().is_none());
    }

    #[test]
    fn error_retryable() {
        assert!(SandkitError::transient("downloading", "connection reset").is_retryable());
        assert!(SandkitError::ImagePull {
            image: "ubuntu:22.04".to_string(),
            reason: "timeout".to_string()
        }
        .is_retryable());
        assert!(!SandkitError::mismatch("k", "bad").is_retryable());
        assert!(!SandkitError::DownloadRejected {
            url: "https://example.com/a.tar.gz".to_string(),
            status: 404
        }
        .is_retryable());
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            SandkitError::UnknownTool("rustc".to_string()).kind(),
            ErrorKind::UnknownTool
        );
        assert_eq!(
            SandkitError::CommandFailure {
                command: "apt-get".to_string(),
                code: 100,
                output: String::new()
            }
            .kind(),
            ErrorKind::CommandFailure
        );
        assert_eq!(
            SandkitError::io("reading", std::io::Error::other("boom")).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn error_kind_display() {
        assert_eq!(
            ErrorKind::ChecksumOrVersionMismatch.to_string(),
            "checksum-or-version-mismatch"
        );
        assert_eq!(ErrorKind::InvalidSpec.to_string(), "invalid-spec");
    }
}
