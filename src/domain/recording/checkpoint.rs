//! Crash-recovery checkpoint record

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::session::{SegmentRef, SessionMetadata, SessionName};

/// How long a checkpoint stays eligible for recovery
pub const RECOVERY_WINDOW_HOURS: i64 = 24;

/// Durable snapshot of the live recording, overwritten on a fixed
/// cadence and cleared on clean stop.
///
/// Timestamps serialize as ISO-8601 strings in this record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryCheckpoint {
    pub session_name: SessionName,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: u64,
    pub is_paused: bool,
    pub current_segment_ref: Option<SegmentRef>,
    pub metadata: SessionMetadata,
}

impl RecoveryCheckpoint {
    /// A checkpoint older than the recovery window is purged instead
    /// of being offered.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.start_time) > Duration::hours(RECOVERY_WINDOW_HOURS)
    }
}
