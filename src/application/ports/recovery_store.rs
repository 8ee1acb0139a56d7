//! Crash-recovery checkpoint store port

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::recording::RecoveryCheckpoint;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Recovery store failure: {0}")]
pub struct RecoveryStoreError(pub String);

/// Single-slot durable store for the live recording's checkpoint.
/// The slot is overwritten on every put and empty after clear.
#[async_trait]
pub trait RecoveryStore: Send + Sync {
    async fn put(&self, checkpoint: &RecoveryCheckpoint) -> Result<(), RecoveryStoreError>;

    async fn get(&self) -> Result<Option<RecoveryCheckpoint>, RecoveryStoreError>;

    async fn clear(&self) -> Result<(), RecoveryStoreError>;
}
