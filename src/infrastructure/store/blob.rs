//! File-backed segment blob store

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::application::ports::{BlobError, BlobStore};
use crate::domain::ids::SegmentId;
use crate::domain::session::SegmentRef;

use super::{remove_if_exists, write_atomic};

/// Blob collection schema version (v2 introduced the metadata
/// sub-records next to the bytes)
const BLOB_SCHEMA_VERSION: u32 = 2;

const SAVE_ATTEMPTS: u32 = 3;

#[derive(Debug, Serialize, Deserialize)]
struct StoredSegment {
    version: u32,
    #[serde(flatten)]
    reference: SegmentRef,
}

/// Segment store under `<root>/recordings`. The metadata record is
/// renamed into place after the bytes, making it the commit marker:
/// bytes without metadata count as never saved.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn recordings_dir(&self) -> PathBuf {
        self.root.join("recordings")
    }

    fn bytes_path(&self, id: SegmentId) -> PathBuf {
        self.recordings_dir().join(id.to_string())
    }

    fn metadata_path(&self, id: SegmentId) -> PathBuf {
        self.recordings_dir().join(format!("{id}.json"))
    }

    async fn save_once(&self, reference: &SegmentRef, bytes: &[u8]) -> io::Result<()> {
        write_atomic(&self.bytes_path(reference.id), bytes).await?;
        let record = StoredSegment {
            version: BLOB_SCHEMA_VERSION,
            reference: reference.clone(),
        };
        let json = serde_json::to_vec_pretty(&record)?;
        write_atomic(&self.metadata_path(reference.id), &json).await
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn save(&self, reference: &SegmentRef, bytes: &[u8]) -> Result<(), BlobError> {
        let mut last: Option<io::Error> = None;
        for attempt in 1..=SAVE_ATTEMPTS {
            match self.save_once(reference, bytes).await {
                Ok(()) => {
                    debug!(segment = %reference.id, bytes = bytes.len(), "segment saved");
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        segment = %reference.id,
                        attempt,
                        error = %err,
                        "segment save failed"
                    );
                    last = Some(err);
                    if attempt < SAVE_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                    }
                }
            }
        }
        Err(BlobError::WriteFailed {
            id: reference.id,
            reason: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    async fn load(&self, reference: &SegmentRef) -> Result<Vec<u8>, BlobError> {
        // The metadata record is the commit marker; uncommitted bytes
        // are not readable.
        if !self.metadata_path(reference.id).exists() {
            return Err(BlobError::NotFound(reference.id));
        }
        match fs::read(self.bytes_path(reference.id)).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(reference.id))
            }
            Err(err) => Err(BlobError::Io(err.to_string())),
        }
    }

    async fn delete(&self, id: SegmentId) -> Result<(), BlobError> {
        // Metadata first so a crash mid-delete leaves an uncommitted
        // blob, not a committed one with missing bytes. Stray temp
        // files from interrupted writes go with it.
        let io_err = |e: io::Error| BlobError::Io(e.to_string());
        remove_if_exists(&self.metadata_path(id)).await.map_err(io_err)?;
        remove_if_exists(&self.bytes_path(id)).await.map_err(io_err)?;
        let dir = self.recordings_dir();
        remove_if_exists(&dir.join(format!("{id}.tmp"))).await.map_err(io_err)?;
        remove_if_exists(&dir.join(format!("{id}.json.tmp"))).await.map_err(io_err)
    }

    async fn list_orphans(
        &self,
        known: &HashSet<SegmentId>,
    ) -> Result<Vec<SegmentId>, BlobError> {
        let dir = self.recordings_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| BlobError::Io(e.to_string()))?;

        let mut present = HashSet::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BlobError::Io(e.to_string()))?
        {
            if let Some(id) = segment_id_from_path(&entry.path()) {
                present.insert(id);
            }
        }

        Ok(present.into_iter().filter(|id| !known.contains(id)).collect())
    }
}

fn segment_id_from_path(path: &Path) -> Option<SegmentId> {
    let stem = path.file_stem()?.to_str()?;
    stem.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::{AudioFormat, SessionMetadata, SessionName};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn reference(n: u128, sequence: u32) -> SegmentRef {
        let name = SessionName::new("Blob Test").unwrap();
        SegmentRef::new(
            SegmentId::from_uuid(Uuid::from_u128(n)),
            SessionMetadata {
                session_name: name,
                start_time: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
                duration_seconds: 30,
                file_size_bytes: 5,
                format: AudioFormat::Wav,
                quality_kbps: 320,
            },
            sequence,
        )
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let segment = reference(1, 1);

        store.save(&segment, b"audio").await.unwrap();
        assert_eq!(store.load(&segment).await.unwrap(), b"audio");
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let segment = reference(2, 1);
        assert!(matches!(
            store.load(&segment).await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_bytes_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let segment = reference(3, 1);

        store.save(&segment, b"bytes").await.unwrap();
        store.delete(segment.id).await.unwrap();
        assert!(matches!(
            store.load(&segment).await,
            Err(BlobError::NotFound(_))
        ));
        assert!(!store.bytes_path(segment.id).exists());
        assert!(!store.metadata_path(segment.id).exists());
    }

    #[tokio::test]
    async fn delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        store
            .delete(SegmentId::from_uuid(Uuid::from_u128(99)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn orphan_scan_excludes_known_segments() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let kept = reference(4, 1);
        let orphan = reference(5, 2);

        store.save(&kept, b"kept").await.unwrap();
        store.save(&orphan, b"orphan").await.unwrap();

        let known: HashSet<_> = [kept.id].into_iter().collect();
        let orphans = store.list_orphans(&known).await.unwrap();
        assert_eq!(orphans, vec![orphan.id]);
    }

    #[tokio::test]
    async fn orphan_scan_on_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.list_orphans(&HashSet::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn metadata_record_carries_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let segment = reference(6, 3);
        store.save(&segment, b"x").await.unwrap();

        let raw = fs::read(store.metadata_path(segment.id)).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["version"], 2);
        assert_eq!(value["sequence_index"], 3);
        assert_eq!(value["path"], format!("recordings/{}", segment.id));
    }
}
