//! Session and segment entities

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metadata::SessionMetadata;
use crate::domain::error::ValidationError;
use crate::domain::ids::{SegmentId, SessionId};

/// Maximum length of a single note in characters
pub const MAX_NOTE_LEN: usize = 1000;

/// Maximum number of tags per session
pub const MAX_TAGS: usize = 20;

/// Maximum tag length in characters
pub const MAX_TAG_LEN: usize = 50;

/// Reference from a session to one durable segment blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRef {
    pub id: SegmentId,
    /// Storage path, always `recordings/{segment_id}`. Never derived
    /// from user content.
    pub path: String,
    /// Metadata snapshot taken when the segment was finalized
    pub metadata: SessionMetadata,
    /// 1-based position within the session
    pub sequence_index: u32,
}

impl SegmentRef {
    pub fn new(id: SegmentId, metadata: SessionMetadata, sequence_index: u32) -> Self {
        Self {
            id,
            path: format!("recordings/{}", id),
            metadata,
            sequence_index,
        }
    }
}

/// One recorded gathering, possibly split across several segments.
///
/// Mutated by the engine while live; immutable afterwards except for
/// notes and tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub metadata: SessionMetadata,
    pub segments: Vec<SegmentRef>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Session {
    pub fn new(id: SessionId, created_at: DateTime<Utc>, metadata: SessionMetadata) -> Self {
        Self {
            id,
            created_at,
            metadata,
            segments: Vec::new(),
            notes: Vec::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Append a note after length validation.
    pub fn add_note(&mut self, note: impl Into<String>) -> Result<(), ValidationError> {
        let note = note.into();
        let len = note.chars().count();
        if len > MAX_NOTE_LEN {
            return Err(ValidationError::NoteTooLong {
                len,
                max: MAX_NOTE_LEN,
            });
        }
        self.notes.push(note);
        Ok(())
    }

    /// Add a single tag, rejecting duplicates.
    pub fn add_tag(&mut self, tag: impl Into<String>) -> Result<(), ValidationError> {
        let tag = tag.into();
        validate_tag(&tag)?;
        if self.tags.contains(&tag) {
            return Err(ValidationError::DuplicateTag { tag });
        }
        if self.tags.len() >= MAX_TAGS {
            return Err(ValidationError::TooManyTags { max: MAX_TAGS });
        }
        self.tags.insert(tag);
        Ok(())
    }

    /// Set-union a batch of tags with the existing set. Tags already
    /// present are skipped; every tag is validated first so the whole
    /// batch is rejected before any mutation.
    pub fn add_tags<I, S>(&mut self, tags: I) -> Result<(), ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let incoming: Vec<String> = tags.into_iter().map(Into::into).collect();
        for tag in &incoming {
            validate_tag(tag)?;
        }
        let fresh: Vec<String> = incoming
            .into_iter()
            .filter(|t| !self.tags.contains(t))
            .collect();
        if self.tags.len() + fresh.len() > MAX_TAGS {
            return Err(ValidationError::TooManyTags { max: MAX_TAGS });
        }
        self.tags.extend(fresh);
        Ok(())
    }

    /// Remove a tag; no-op when absent.
    pub fn remove_tag(&mut self, tag: &str) {
        self.tags.remove(tag);
    }

    /// True when every token matches at least one of name, a note, or
    /// a tag under case-insensitive substring comparison.
    pub fn matches_search(&self, tokens: &[String]) -> bool {
        let name = self.metadata.session_name.as_str().to_lowercase();
        tokens.iter().all(|token| {
            name.contains(token)
                || self.notes.iter().any(|n| n.to_lowercase().contains(token))
                || self.tags.iter().any(|t| t.to_lowercase().contains(token))
        })
    }

    /// Sum of persisted segment sizes plus whatever the metadata
    /// currently accounts for is tracked by the engine; this reports
    /// the persisted view.
    pub fn persisted_bytes(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| s.metadata.file_size_bytes)
            .sum()
    }
}

/// Tags are 1-50 characters of `[A-Za-z0-9_-]`.
pub fn validate_tag(tag: &str) -> Result<(), ValidationError> {
    let len = tag.chars().count();
    let ok = (1..=MAX_TAG_LEN).contains(&len)
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(ValidationError::TagInvalid {
            tag: tag.to_string(),
        })
    }
}
