//! Local CSV copy of saved weighings.

use super::SackWeighing;
use crate::error::ScaleResult;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Appends weighings to a CSV file, writing the header only into an empty file.
#[derive(Debug, Clone)]
pub struct CsvBackup {
    path: PathBuf,
}

impl CsvBackup {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one weighing, creating the file and parent directory if needed.
    pub fn append(&self, weighing: &SackWeighing) -> ScaleResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let is_empty = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_empty)
            .from_writer(file);
        writer.serialize(weighing)?;
        writer.flush()?;

        tracing::debug!(path = %self.path.display(), code = %weighing.code, "Weighing appended to CSV backup");
        Ok(())
    }

    /// Append on the blocking pool.
    pub async fn append_async(&self, weighing: SackWeighing) -> ScaleResult<()> {
        let backup = self.clone();
        tokio::task::spawn_blocking(move || backup.append(&weighing))
            .await
            .map_err(|e| crate::error::ScaleError::Storage(format!("CSV backup task failed: {e}")))?
    }
}
