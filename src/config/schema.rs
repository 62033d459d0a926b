//! Configuration schema for sandkit
//!
//! Configuration is stored at `~/.config/sandkit/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Container runtime settings
    pub runtime: RuntimeConfig,

    /// Cache store settings
    pub cache: CacheConfig,

    /// Step retry policy
    pub retry: RetryConfig,

    /// Archive download settings
    pub fetch: FetchConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: true,
        }
    }
}

/// Container runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// CLI used to drive containers: "podman" or "docker"
    pub engine: String,

    /// Repository prefix for committed images (`{prefix}/{name}:latest`)
    pub image_prefix: String,

    /// Keep the build container around after a failed build
    pub keep_failed: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: "podman".to_string(),
            image_prefix: "sandkit".to_string(),
            keep_failed: false,
        }
    }
}

/// Cache store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Host directory holding cache mounts (default: `~/.cache/sandkit`)
    pub root: Option<PathBuf>,
}

/// Retry policy for provisioning steps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per step for transient failures (including the first)
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,

    /// Upper bound on a single backoff delay, in milliseconds
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays
    pub multiplier: f64,

    /// Attempts per step for failing install commands (1 = no retry)
    pub command_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
            command_attempts: 1,
        }
    }
}

/// Archive download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Whole-request timeout in seconds
    pub timeout_secs: u64,

    /// Largest archive accepted, in megabytes
    pub max_download_mb: u64,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_download_bytes(&self) -> u64 {
        self.max_download_mb * 1024 * 1024
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            max_download_mb: 1024,
        }
    }
}
