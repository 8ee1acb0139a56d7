//! Segment blob store port

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ids::SegmentId;
use crate::domain::session::SegmentRef;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    #[error("Failed to write segment {id}: {reason}")]
    WriteFailed { id: SegmentId, reason: String },

    #[error("Segment {0} not found")]
    NotFound(SegmentId),

    #[error("Blob store failure: {0}")]
    Io(String),
}

/// Object store for segment bytes, keyed by segment id.
///
/// Bytes and their metadata record commit together: a segment is
/// either fully saved or absent, never partially observable. Paths
/// are always `recordings/{segment_id}` and never carry user content.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist a finished segment atomically. Implementations retry
    /// transient write failures with exponential backoff before
    /// reporting [`BlobError::WriteFailed`].
    async fn save(&self, reference: &SegmentRef, bytes: &[u8]) -> Result<(), BlobError>;

    /// Read a segment back.
    async fn load(&self, reference: &SegmentRef) -> Result<Vec<u8>, BlobError>;

    /// Remove bytes and metadata together.
    async fn delete(&self, id: SegmentId) -> Result<(), BlobError>;

    /// Segments present in the store but referenced by no known
    /// session. Used by the startup purge.
    async fn list_orphans(
        &self,
        known: &HashSet<SegmentId>,
    ) -> Result<Vec<SegmentId>, BlobError>;
}
