//! Timestamped copies of file content taken before every write.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::ApplyError;

#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

/// `<file name>_<YYYYmmdd_HHMMSS_micros>.backup`
pub fn backup_name(file: &Path, at: DateTime<Utc>) -> String {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string());
    format!("{}_{}.backup", name, at.format("%Y%m%d_%H%M%S_%6f"))
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store `content` as the pre-write state of `file`. Never overwrites
    /// an earlier backup.
    pub async fn create(&self, file: &Path, content: &str) -> Result<PathBuf, ApplyError> {
        let err = |message: String| ApplyError::Backup {
            path: file.to_path_buf(),
            message,
        };
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| err(e.to_string()))?;

        let base = backup_name(file, Utc::now());
        let mut target = self.dir.join(&base);
        let mut n = 1;
        while tokio::fs::try_exists(&target).await.unwrap_or(false) {
            target = self.dir.join(format!("{}.{}", base, n));
            n += 1;
        }

        tokio::fs::write(&target, content)
            .await
            .map_err(|e| err(e.to_string()))?;
        debug!("Backed up {} to {}", file.display(), target.display());
        Ok(target)
    }

    pub async fn read(&self, backup: &Path) -> Result<String, ApplyError> {
        tokio::fs::read_to_string(backup)
            .await
            .map_err(|e| ApplyError::Backup {
                path: backup.to_path_buf(),
                message: e.to_string(),
            })
    }

    /// Backups taken of `file`, oldest first.
    pub fn list_for(&self, file: &Path) -> Vec<PathBuf> {
        let Some(name) = file.file_name().map(|n| n.to_string_lossy().to_string()) else {
            return Vec::new();
        };
        let prefix = format!("{}_", name);
        let mut found: Vec<PathBuf> = walkdir::WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
            .map(|e| e.into_path())
            .collect();
        found.sort();
        found
    }
}
