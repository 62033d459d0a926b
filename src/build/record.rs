//! Persisted build records
//!
//! The last result of each image is kept as `<builds_dir>/<image>.json`.

use crate::build::BuildResult;
use crate::cache::mount::is_valid_key;
use crate::config::ConfigManager;
use crate::error::{SandkitError, SandkitResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Directory of per-image build records
#[derive(Debug, Clone)]
pub struct BuildHistory {
    dir: PathBuf,
}

impl BuildHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// History under the default state directory
    pub fn default_location() -> Self {
        Self::new(ConfigManager::builds_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record file of an image. Names that are not plain file names have none.
    fn file_path(&self, image_name: &str) -> Option<PathBuf> {
        is_valid_key(image_name).then(|| self.dir.join(format!("{}.json", image_name)))
    }

    /// Load the last record for an image
    pub async fn load(&self, image_name: &str) -> SandkitResult<Option<BuildResult>> {
        let Some(path) = self.file_path(image_name) else {
            return Ok(None);
        };

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| SandkitError::io(format!("reading build record {}", path.display()), e))?;

        let result: BuildResult = serde_json::from_str(&content)?;
        Ok(Some(result))
    }

    /// Replace the record for the result's image
    pub async fn save(&self, result: &BuildResult) -> SandkitResult<()> {
        // Rejected specs can carry any name; keep those under the build id
        let path = self.file_path(&result.image_name).unwrap_or_else(|| {
            self.dir
                .join(format!("build-{}.json", result.build_id.simple()))
        });

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SandkitError::io("creating builds directory", e))?;

        let content = serde_json::to_string_pretty(result)?;
        fs::write(&path, content)
            .await
            .map_err(|e| SandkitError::io(format!("writing build record {}", path.display()), e))?;

        debug!("Saved build record {}", path.display());
        Ok(())
    }

    /// All records, most recent first. Unreadable files are skipped.
    pub async fn list_all(&self) -> SandkitResult<Vec<BuildResult>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut results = vec![];
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| SandkitError::io("reading builds directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SandkitError::io("reading build entry", e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Ok(content) = fs::read_to_string(&path).await {
                    match serde_json::from_str::<BuildResult>(&content) {
                        Ok(result) => results.push(result),
                        Err(e) => debug!("Skipping build record {}: {}", path.display(), e),
                    }
                }
            }
        }

        results.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::result::BuildRecorder;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_and_load() {
        let temp = TempDir::new().unwrap();
        let history = BuildHistory::new(temp.path().join("builds"));

        let result = BuildRecorder::new("java").cancel();
        history.save(&result).await.unwrap();

        let loaded = history.load("java").await.unwrap().unwrap();
        assert_eq!(loaded.build_id, result.build_id);
        assert_eq!(loaded.status, result.status);
        assert_eq!(loaded.transitions, result.transitions);
        assert!(history.load("node").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_record_replaces_previous() {
        let temp = TempDir::new().unwrap();
        let history = BuildHistory::new(temp.path());

        history.save(&BuildRecorder::new("java").cancel()).await.unwrap();
        let second = BuildRecorder::new("java").cancel();
        history.save(&second).await.unwrap();
        history.save(&BuildRecorder::new("node").cancel()).await.unwrap();
        std::fs::write(temp.path().join("garbage.json"), "{").unwrap();

        let all = history.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|r| r.build_id == second.build_id));
        assert_eq!(all[0].image_name, "node");
    }

    #[tokio::test]
    async fn missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let history = BuildHistory::new(temp.path().join("absent"));
        assert!(history.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsafe_image_name_stays_in_dir() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("state").join("builds");
        let history = BuildHistory::new(&dir);

        let result = BuildRecorder::new("../../escaped").cancel();
        history.save(&result).await.unwrap();

        assert!(!temp.path().join("escaped.json").exists());
        let kept = dir.join(format!("build-{}.json", result.build_id.simple()));
        assert!(kept.is_file());
        assert!(history.load("../../escaped").await.unwrap().is_none());
        assert_eq!(history.list_all().await.unwrap().len(), 1);
    }
}
