//! File-backed recovery checkpoint slot

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::application::ports::{RecoveryStore, RecoveryStoreError};
use crate::domain::recording::RecoveryCheckpoint;

use super::{remove_if_exists, write_atomic};

const RECOVERY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoredCheckpoint {
    version: u32,
    #[serde(flatten)]
    checkpoint: RecoveryCheckpoint,
}

/// Single slot at `<root>/recovery/current.json`. Timestamps inside
/// the record serialize as ISO-8601 strings.
pub struct FsRecoveryStore {
    root: PathBuf,
}

impl FsRecoveryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn slot_path(&self) -> PathBuf {
        self.root.join("recovery").join("current.json")
    }
}

#[async_trait]
impl RecoveryStore for FsRecoveryStore {
    async fn put(&self, checkpoint: &RecoveryCheckpoint) -> Result<(), RecoveryStoreError> {
        let record = StoredCheckpoint {
            version: RECOVERY_SCHEMA_VERSION,
            checkpoint: checkpoint.clone(),
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| RecoveryStoreError(e.to_string()))?;
        write_atomic(&self.slot_path(), &json)
            .await
            .map_err(|e| RecoveryStoreError(e.to_string()))
    }

    async fn get(&self) -> Result<Option<RecoveryCheckpoint>, RecoveryStoreError> {
        match fs::read(self.slot_path()).await {
            Ok(raw) => {
                let record: StoredCheckpoint = serde_json::from_slice(&raw)
                    .map_err(|e| RecoveryStoreError(e.to_string()))?;
                Ok(Some(record.checkpoint))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(RecoveryStoreError(err.to_string())),
        }
    }

    async fn clear(&self) -> Result<(), RecoveryStoreError> {
        remove_if_exists(&self.slot_path())
            .await
            .map_err(|e| RecoveryStoreError(e.to_string()))
    }
}
