//! File-system-backed stores
//!
//! Everything lives under one storage root:
//!
//! ```text
//! <root>/recordings/{segment_id}       segment bytes
//! <root>/recordings/{segment_id}.json  segment metadata (commit point)
//! <root>/sessions/{session_id}.json    session records
//! <root>/settings.json                 settings document
//! <root>/recovery/current.json         checkpoint slot
//! ```
//!
//! Writes go to a sibling `.tmp` file and rename into place, so a
//! reader never observes a partial record.

pub mod blob;
pub mod recovery;
pub mod session;

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;

pub use blob::FsBlobStore;
pub use recovery::FsRecoveryStore;
pub use session::FsSessionStore;

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write-then-rename so the destination is always whole.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await
}

/// Delete that treats an already-missing file as success.
pub(crate) async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
