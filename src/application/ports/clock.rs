//! Clock and identifier generation ports

use chrono::{DateTime, Utc};

use crate::domain::ids::{SegmentId, SessionId};

/// Wall-clock time source.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Source of fresh 128-bit identifiers. Ids are random and never
/// reused.
pub trait IdGen: Send + Sync {
    fn session_id(&self) -> SessionId;
    fn segment_id(&self) -> SegmentId;
}
