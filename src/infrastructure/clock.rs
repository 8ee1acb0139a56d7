//! System clock and uuid id generation

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::application::ports::{Clock, IdGen};
use crate::domain::ids::{SegmentId, SessionId};

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Random (v4) uuids; 122 bits of CSPRNG entropy per id.
pub struct UuidGen;

impl IdGen for UuidGen {
    fn session_id(&self) -> SessionId {
        SessionId::from_uuid(Uuid::new_v4())
    }

    fn segment_id(&self) -> SegmentId {
        SegmentId::from_uuid(Uuid::new_v4())
    }
}
