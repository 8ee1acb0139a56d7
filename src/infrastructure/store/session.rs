//! File-backed session and settings store

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::application::ports::{SessionStore, SessionStoreError};
use crate::domain::ids::SessionId;
use crate::domain::session::Session;
use crate::domain::settings::Settings;

use super::{remove_if_exists, write_atomic};

const SESSION_SCHEMA_VERSION: u32 = 1;
const SETTINGS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    version: u32,
    #[serde(flatten)]
    session: Session,
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsDoc {
    version: u32,
    entries: Map<String, Value>,
}

/// Session records under `<root>/sessions`, settings document at
/// `<root>/settings.json`. Records write whole-file-at-a-time through
/// an atomic rename; concurrent writers to the same session are
/// last-writer-wins.
pub struct FsSessionStore {
    root: PathBuf,
    /// Serializes settings read-modify-write cycles
    settings_lock: Mutex<()>,
}

impl FsSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            settings_lock: Mutex::new(()),
        }
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    fn session_path(&self, id: SessionId) -> PathBuf {
        self.sessions_dir().join(format!("{id}.json"))
    }

    fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    async fn read_settings_entries(&self) -> Result<Map<String, Value>, SessionStoreError> {
        match fs::read(self.settings_path()).await {
            Ok(raw) => {
                let doc: SettingsDoc = serde_json::from_slice(&raw)
                    .map_err(|e| SessionStoreError::Failed(e.to_string()))?;
                Ok(doc.entries)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Map::new()),
            Err(err) => Err(SessionStoreError::Failed(err.to_string())),
        }
    }

    async fn write_settings_entries(
        &self,
        entries: Map<String, Value>,
    ) -> Result<(), SessionStoreError> {
        let doc = SettingsDoc {
            version: SETTINGS_SCHEMA_VERSION,
            entries,
        };
        let json = serde_json::to_vec_pretty(&doc)
            .map_err(|e| SessionStoreError::Failed(e.to_string()))?;
        write_atomic(&self.settings_path(), &json)
            .await
            .map_err(|e| SessionStoreError::Failed(e.to_string()))
    }
}

#[async_trait]
impl SessionStore for FsSessionStore {
    async fn put_session(&self, session: &Session) -> Result<(), SessionStoreError> {
        let record = StoredSession {
            version: SESSION_SCHEMA_VERSION,
            session: session.clone(),
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| SessionStoreError::Failed(e.to_string()))?;
        write_atomic(&self.session_path(session.id), &json)
            .await
            .map_err(|e| SessionStoreError::Failed(e.to_string()))?;
        debug!(session = %session.id, "session record written");
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, SessionStoreError> {
        match fs::read(self.session_path(id)).await {
            Ok(raw) => {
                let record: StoredSession = serde_json::from_slice(&raw)
                    .map_err(|e| SessionStoreError::Failed(e.to_string()))?;
                Ok(Some(record.session))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SessionStoreError::Failed(err.to_string())),
        }
    }

    async fn get_all_sessions(&self) -> Result<Vec<Session>, SessionStoreError> {
        let dir = self.sessions_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| SessionStoreError::Failed(e.to_string()))?;

        let mut sessions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SessionStoreError::Failed(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).await {
                Ok(raw) => match serde_json::from_slice::<StoredSession>(&raw) {
                    Ok(record) => sessions.push(record.session),
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping corrupt session record")
                    }
                },
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable session record")
                }
            }
        }
        Ok(sessions)
    }

    async fn delete_session(&self, id: SessionId) -> Result<(), SessionStoreError> {
        remove_if_exists(&self.session_path(id))
            .await
            .map_err(|e| SessionStoreError::Failed(e.to_string()))
    }

    async fn get_settings(&self) -> Result<Settings, SessionStoreError> {
        let entries = self.read_settings_entries().await?;
        Ok(Settings::from_entries(&entries))
    }

    async fn put_setting(&self, key: &str, value: Value) -> Result<(), SessionStoreError> {
        let _guard = self.settings_lock.lock().await;
        let entries = self.read_settings_entries().await?;
        let mut settings = Settings::from_entries(&entries);
        settings.apply(key, value)?;
        self.write_settings_entries(settings.to_entries()).await
    }

    async fn update_settings(
        &self,
        updates: Map<String, Value>,
    ) -> Result<(), SessionStoreError> {
        let _guard = self.settings_lock.lock().await;
        let entries = self.read_settings_entries().await?;
        let mut settings = Settings::from_entries(&entries);
        for (key, value) in updates {
            settings.apply(&key, value)?;
        }
        self.write_settings_entries(settings.to_entries()).await
    }

    async fn clear_settings(&self) -> Result<(), SessionStoreError> {
        let _guard = self.settings_lock.lock().await;
        remove_if_exists(&self.settings_path())
            .await
            .map_err(|e| SessionStoreError::Failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::{AudioFormat, SessionMetadata, SessionName};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use uuid::Uuid;

    fn sample_session(n: u128, name: &str) -> Session {
        let created = Utc.timestamp_millis_opt(1_700_000_000_000 + n as i64).unwrap();
        Session::new(
            SessionId::from_uuid(Uuid::from_u128(n)),
            created,
            SessionMetadata {
                session_name: SessionName::new(name).unwrap(),
                start_time: created,
                duration_seconds: 12,
                file_size_bytes: 34,
                format: AudioFormat::Wav,
                quality_kbps: 320,
            },
        )
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());
        let session = sample_session(1, "Round Trip");

        store.put_session(&session).await.unwrap();
        let loaded = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn get_missing_session_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());
        let id = SessionId::from_uuid(Uuid::from_u128(404));
        assert!(store.get_session(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());
        let mut session = sample_session(2, "First");

        store.put_session(&session).await.unwrap();
        session.add_note("updated").unwrap();
        store.put_session(&session).await.unwrap();

        let loaded = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.notes, vec!["updated"]);
        assert_eq!(store.get_all_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_all_skips_corrupt_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());
        store.put_session(&sample_session(3, "Good")).await.unwrap();

        fs::create_dir_all(store.sessions_dir()).await.unwrap();
        fs::write(store.sessions_dir().join("broken.json"), b"not json")
            .await
            .unwrap();

        let all = store.get_all_sessions().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn delete_session_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());
        let session = sample_session(4, "Doomed");

        store.put_session(&session).await.unwrap();
        store.delete_session(session.id).await.unwrap();
        assert!(store.get_session(session.id).await.unwrap().is_none());
        // deleting again is fine
        store.delete_session(session.id).await.unwrap();
    }

    #[tokio::test]
    async fn settings_default_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());
        assert_eq!(store.get_settings().await.unwrap(), Settings::default());
    }

    #[tokio::test]
    async fn put_setting_persists_and_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());

        store.put_setting("quality", json!(192)).await.unwrap();
        let settings = store.get_settings().await.unwrap();
        assert_eq!(settings.audio_quality, 192);

        let raw = fs::read(store.settings_path()).await.unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(doc["version"], 1);
        assert_eq!(doc["entries"]["quality"], json!(192));
        assert_eq!(doc["entries"]["audio_quality"], json!(192));
    }

    #[tokio::test]
    async fn invalid_setting_rejected_and_unwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());

        assert!(store.put_setting("audio_quality", json!(7)).await.is_err());
        assert_eq!(store.get_settings().await.unwrap().audio_quality, 320);
    }

    #[tokio::test]
    async fn update_settings_is_one_document_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());

        let mut updates = Map::new();
        updates.insert("audio_format".into(), json!("compressed"));
        updates.insert("split_interval_minutes".into(), json!(15));
        store.update_settings(updates).await.unwrap();

        let settings = store.get_settings().await.unwrap();
        assert_eq!(settings.audio_format, AudioFormat::Compressed);
        assert_eq!(settings.split_interval_minutes, 15);
    }

    #[tokio::test]
    async fn unknown_settings_survive_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());

        store.put_setting("mystery_key", json!([1, 2])).await.unwrap();
        store.put_setting("theme", json!("light")).await.unwrap();

        let settings = store.get_settings().await.unwrap();
        assert_eq!(settings.unknown["mystery_key"], json!([1, 2]));
    }

    #[tokio::test]
    async fn clear_settings_returns_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());

        store.put_setting("theme", json!("light")).await.unwrap();
        store.clear_settings().await.unwrap();
        assert_eq!(store.get_settings().await.unwrap(), Settings::default());
    }
}
