//! Build audit trail
//!
//! Appends JSON lines to `<state_dir>/audit.log`. Writing is best-effort:
//! a broken audit log is reported and never fails a build.

use crate::build::BuildResult;
use crate::config::{schema::Config, ConfigManager};
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// JSON-lines audit writer
pub struct AuditLog {
    enabled: bool,
    path: PathBuf,
}

impl AuditLog {
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.audit_log,
            path: ConfigManager::audit_log_path(),
        }
    }

    /// Audit log at an explicit location
    pub fn at(path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            enabled,
            path: path.into(),
        }
    }

    /// A build was requested
    pub async fn build_started(&self, image_name: &str, base_image: &str) {
        self.log(
            "build.started",
            &json!({ "image": image_name, "base_image": base_image }),
        )
        .await;
    }

    /// A build reached its terminal state
    pub async fn build_finished(&self, result: &BuildResult) {
        let data = json!({
            "build_id": result.build_id,
            "image": result.image_name,
            "status": result.status,
            "steps": result.succeeded_steps.len(),
            "retried": result.retried_steps().map(|s| &s.id).collect::<Vec<_>>(),
            "failed_step": result.failed_step,
            "tag": result.image.as_ref().map(|m| &m.tag),
            "image_id": result.image.as_ref().and_then(|m| m.image_id.as_ref()),
            "duration_ms": result.duration().num_milliseconds(),
        });
        self.log("build.finished", &data).await;
    }

    /// A cache entry was removed by hand
    pub async fn cache_cleared(&self, key: &str) {
        self.log("cache.cleared", &json!({ "key": key })).await;
    }

    /// Append one event
    pub async fn log(&self, event: &str, data: &serde_json::Value) {
        if !self.enabled {
            return;
        }

        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event,
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write audit log {}: {}", self.path.display(), e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::result::BuildRecorder;
    use crate::error::SandkitError;
    use tempfile::TempDir;

    fn read_lines(audit: &AuditLog) -> Vec<serde_json::Value> {
        std::fs::read_to_string(&audit.path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn records_build_lifecycle() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::at(dir.path().join("audit.log"), true);

        audit.build_started("java", "ubuntu:22.04").await;
        let result = BuildRecorder::new("java").fail(
            None,
            &SandkitError::invalid_spec("java", "maven version is empty"),
            1,
        );
        audit.build_finished(&result).await;

        let lines = read_lines(&audit);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "build.started");
        assert_eq!(lines[0]["data"]["base_image"], "ubuntu:22.04");
        assert_eq!(lines[1]["event"], "build.finished");
        assert_eq!(lines[1]["data"]["status"], "failed");
        assert_eq!(lines[1]["data"]["failed_step"]["kind"], "invalid_spec");
        assert!(lines[1]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn nested_directory_is_created() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::at(dir.path().join("state/sandkit/audit.log"), true);
        audit.cache_cleared("maven-3.9.6").await;
        assert_eq!(read_lines(&audit)[0]["data"]["key"], "maven-3.9.6");
    }

    #[tokio::test]
    async fn skips_when_disabled() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::at(dir.path().join("audit.log"), false);

        audit.build_started("node", "node:20").await;

        assert!(!audit.path.exists());
    }
}
