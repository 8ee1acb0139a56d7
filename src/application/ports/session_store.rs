//! Session and settings store port

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::ids::SessionId;
use crate::domain::session::Session;
use crate::domain::settings::{Settings, SettingsError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionStoreError {
    #[error("Session store failure: {0}")]
    Failed(String),

    #[error(transparent)]
    InvalidSetting(#[from] SettingsError),
}

/// Durable store over two logical collections: session records keyed
/// by id, and one settings document. All writes are transactional
/// (a reader never observes a partial record); concurrent writers to
/// the same session record are last-writer-wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put_session(&self, session: &Session) -> Result<(), SessionStoreError>;

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, SessionStoreError>;

    /// All persisted sessions, in no particular order.
    async fn get_all_sessions(&self) -> Result<Vec<Session>, SessionStoreError>;

    /// Remove the session record. Cascading blob deletion is the
    /// caller's responsibility.
    async fn delete_session(&self, id: SessionId) -> Result<(), SessionStoreError>;

    /// Settings snapshot with defaults applied for missing keys.
    async fn get_settings(&self) -> Result<Settings, SessionStoreError>;

    /// Write one setting in its own transaction.
    async fn put_setting(&self, key: &str, value: Value) -> Result<(), SessionStoreError>;

    /// Apply several settings atomically in a single transaction.
    async fn update_settings(
        &self,
        entries: Map<String, Value>,
    ) -> Result<(), SessionStoreError>;

    async fn clear_settings(&self) -> Result<(), SessionStoreError>;
}
