//! Session entities and value objects

pub mod metadata;
pub mod name;
pub mod options;
pub mod record;

pub use metadata::{AudioFormat, SessionMetadata};
pub use name::{sanitize, validate_session_name, SessionName, MAX_NAME_LEN};
pub use options::RecordingOptions;
pub use record::{validate_tag, SegmentRef, Session, MAX_NOTE_LEN, MAX_TAGS, MAX_TAG_LEN};
