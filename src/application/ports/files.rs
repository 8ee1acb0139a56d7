//! Host file-system port

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("File operation failed on {path}: {reason}")]
pub struct FileError {
    pub path: String,
    pub reason: String,
}

/// Why a directory selection produced no path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("Selection cancelled")]
    UserCancelled,

    #[error("Access to the selected directory was denied")]
    Denied,

    #[error("Selection failed: {0}")]
    Io(String),
}

/// Plain file operations delegated to the host.
#[async_trait]
pub trait FilePort: Send + Sync {
    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), FileError>;

    async fn read(&self, path: &Path) -> Result<Vec<u8>, FileError>;

    async fn delete(&self, path: &Path) -> Result<(), FileError>;

    /// Create a directory (and its parents). Explicit, never a probe
    /// write.
    async fn create_dir(&self, path: &Path) -> Result<(), FileError>;

    /// Ask the host for a directory.
    async fn select_directory(&self) -> Result<PathBuf, SelectionError>;
}
