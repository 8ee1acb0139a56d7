//! Local file-system adapter for the file port

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::application::ports::{FileError, FilePort, SelectionError};

/// Plain `tokio::fs` adapter. Directory selection is non-interactive:
/// the host passes a preselected path (CLI flag, environment) or the
/// selection reports as cancelled.
pub struct LocalFiles {
    preselected_dir: Option<PathBuf>,
}

impl LocalFiles {
    pub fn new() -> Self {
        Self {
            preselected_dir: None,
        }
    }

    pub fn with_preselected_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            preselected_dir: Some(dir.into()),
        }
    }
}

impl Default for LocalFiles {
    fn default() -> Self {
        Self::new()
    }
}

fn file_error(path: &Path, err: std::io::Error) -> FileError {
    FileError {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl FilePort for LocalFiles {
    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), FileError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| file_error(path, e))?;
        }
        fs::write(path, bytes).await.map_err(|e| file_error(path, e))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, FileError> {
        fs::read(path).await.map_err(|e| file_error(path, e))
    }

    async fn delete(&self, path: &Path) -> Result<(), FileError> {
        fs::remove_file(path).await.map_err(|e| file_error(path, e))
    }

    async fn create_dir(&self, path: &Path) -> Result<(), FileError> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| file_error(path, e))
    }

    async fn select_directory(&self) -> Result<PathBuf, SelectionError> {
        match &self.preselected_dir {
            Some(dir) if dir.is_dir() => Ok(dir.clone()),
            Some(dir) => Err(SelectionError::Io(format!(
                "{} is not a directory",
                dir.display()
            ))),
            None => Err(SelectionError::UserCancelled),
        }
    }
}
