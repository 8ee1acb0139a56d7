//! Session catalog use case
//!
//! Read-side operations over persisted sessions: listing, search,
//! annotation, export and deletion. All writes re-read the record
//! first so concurrent annotation stays last-writer-wins on fresh
//! state.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::domain::error::ValidationError;
use crate::domain::ids::SessionId;
use crate::domain::session::{AudioFormat, Session};

use super::ports::{BlobError, BlobStore, SessionStore, SessionStoreError};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    #[error("Export to a different format is not supported")]
    FormatConversionUnsupported,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] SessionStoreError),

    #[error(transparent)]
    Blob(#[from] BlobError),
}

pub struct Catalog {
    sessions: Arc<dyn SessionStore>,
    blobs: Arc<dyn BlobStore>,
}

impl Catalog {
    pub fn new(sessions: Arc<dyn SessionStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { sessions, blobs }
    }

    /// All sessions, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<Session>, CatalogError> {
        let mut sessions = self.sessions.get_all_sessions().await?;
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    /// Case-insensitive substring search. The query is split on ASCII
    /// whitespace and every token must match the name, a note or a
    /// tag. An empty query lists everything.
    pub async fn search(&self, query: &str) -> Result<Vec<Session>, CatalogError> {
        let tokens: Vec<String> = query
            .split_ascii_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        let mut sessions = self.list_sessions().await?;
        if !tokens.is_empty() {
            sessions.retain(|s| s.matches_search(&tokens));
        }
        Ok(sessions)
    }

    pub async fn get_session(&self, id: SessionId) -> Result<Session, CatalogError> {
        self.sessions
            .get_session(id)
            .await?
            .ok_or(CatalogError::SessionNotFound(id))
    }

    /// Append a note (at most 1000 characters).
    pub async fn add_note(&self, id: SessionId, note: &str) -> Result<(), CatalogError> {
        let mut session = self.get_session(id).await?;
        session.add_note(note)?;
        self.sessions.put_session(&session).await?;
        Ok(())
    }

    /// Union the given tags into the session's tag set.
    pub async fn add_tags<I, S>(&self, id: SessionId, tags: I) -> Result<(), CatalogError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut session = self.get_session(id).await?;
        session.add_tags(tags)?;
        self.sessions.put_session(&session).await?;
        Ok(())
    }

    /// Remove a tag; silently succeeds when it was absent.
    pub async fn remove_tag(&self, id: SessionId, tag: &str) -> Result<(), CatalogError> {
        let mut session = self.get_session(id).await?;
        session.remove_tag(tag);
        self.sessions.put_session(&session).await?;
        Ok(())
    }

    /// Concatenated segment bytes in sequence order. The bytes pass
    /// through unchanged; requesting a different container fails.
    pub async fn export(
        &self,
        id: SessionId,
        target: AudioFormat,
    ) -> Result<Vec<u8>, CatalogError> {
        let session = self.get_session(id).await?;
        if target != session.metadata.format {
            return Err(CatalogError::FormatConversionUnsupported);
        }

        let mut segments = session.segments.clone();
        segments.sort_by_key(|s| s.sequence_index);

        let mut bytes = Vec::with_capacity(session.metadata.file_size_bytes as usize);
        for segment in &segments {
            bytes.extend(self.blobs.load(segment).await?);
        }
        info!(session = %id, bytes = bytes.len(), "session exported");
        Ok(bytes)
    }

    /// Suggested export filename, `{session_name}.{extension}`.
    pub fn export_filename(session: &Session) -> String {
        format!(
            "{}.{}",
            session.metadata.session_name,
            session.metadata.format.extension()
        )
    }

    /// Delete the session record and every segment blob it owns.
    pub async fn delete_session(&self, id: SessionId) -> Result<(), CatalogError> {
        let session = self.get_session(id).await?;
        for segment in &session.segments {
            if let Err(err) = self.blobs.delete(segment.id).await {
                // Keep going; leftover blobs fall to the startup purge.
                warn!(segment = %segment.id, error = %err, "failed to delete segment blob");
            }
        }
        self.sessions.delete_session(id).await?;
        info!(session = %id, segments = session.segments.len(), "session deleted");
        Ok(())
    }
}
