//! Shared test doubles for the engine scenario suites
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use tavern_tapes::application::ports::{
    AudioEncoder, BlobError, BlobStore, Clock, DeviceConfig, DeviceError, DeviceEvent,
    DeviceHandle, DevicePort, EncoderError, EncoderFactory, IdGen, InputDeviceInfo, PcmFrame,
    RecordingStatusPort, RecoveryStore, RecoveryStoreError, SessionStore, SessionStoreError,
};
use tavern_tapes::application::EngineDeps;
use tavern_tapes::domain::ids::{SegmentId, SessionId};
use tavern_tapes::domain::recording::RecoveryCheckpoint;
use tavern_tapes::domain::session::{SegmentRef, Session};
use tavern_tapes::domain::settings::Settings;

pub const SAMPLE_RATE: u32 = 44_100;
pub const CHANNELS: u16 = 2;

/// Interleaved samples in one second of capture
pub const SAMPLES_PER_SECOND: usize = SAMPLE_RATE as usize * CHANNELS as usize;

/// Produces frames of constant amplitude on a fixed cadence until the
/// handle is closed.
pub struct ScriptedDevice {
    pub frame_millis: u64,
    pub amplitude: i16,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self {
            frame_millis: 100,
            amplitude: 8_000,
        }
    }
}

#[async_trait]
impl DevicePort for ScriptedDevice {
    async fn enumerate_inputs(&self) -> Result<Vec<InputDeviceInfo>, DeviceError> {
        Ok(vec![InputDeviceInfo {
            id: "scripted".to_string(),
            label: "Scripted test input".to_string(),
        }])
    }

    async fn open(&self, _config: DeviceConfig) -> Result<DeviceHandle, DeviceError> {
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let frame_millis = self.frame_millis;
        let amplitude = self.amplitude;
        let samples = SAMPLES_PER_SECOND as u64 * frame_millis / 1000;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(frame_millis));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let frame = PcmFrame {
                            samples: vec![amplitude; samples as usize],
                            sample_rate: SAMPLE_RATE,
                            channels: CHANNELS,
                        };
                        if event_tx.send(DeviceEvent::Frame(frame)).await.is_err() {
                            break;
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        Ok(DeviceHandle::new(
            event_rx,
            Box::new(move || {
                let _ = stop_tx.send(true);
            }),
        ))
    }
}

/// Deterministic encoder: one chunk of `bytes_per_chunk` bytes per
/// second of samples, tail proportional to the leftover.
pub struct TestEncoder {
    accumulated: usize,
    bytes_per_chunk: usize,
}

#[async_trait]
impl AudioEncoder for TestEncoder {
    fn push(&mut self, frame: &PcmFrame) -> Result<Option<Vec<u8>>, EncoderError> {
        self.accumulated += frame.samples.len();
        if self.accumulated >= SAMPLES_PER_SECOND {
            self.accumulated -= SAMPLES_PER_SECOND;
            Ok(Some(vec![0xAB; self.bytes_per_chunk]))
        } else {
            Ok(None)
        }
    }

    async fn finish(self: Box<Self>) -> Result<Vec<u8>, EncoderError> {
        if self.accumulated == 0 {
            return Ok(Vec::new());
        }
        let tail = self.accumulated * self.bytes_per_chunk / SAMPLES_PER_SECOND;
        Ok(vec![0xCD; tail.max(1)])
    }
}

pub struct TestEncoderFactory {
    pub bytes_per_chunk: usize,
}

impl TestEncoderFactory {
    pub fn new() -> Self {
        Self {
            bytes_per_chunk: 4_096,
        }
    }
}

impl EncoderFactory for TestEncoderFactory {
    fn create(
        &self,
        _format: tavern_tapes::domain::session::AudioFormat,
        _quality_kbps: u32,
        _timeslice: Duration,
    ) -> Result<Box<dyn AudioEncoder>, EncoderError> {
        Ok(Box::new(TestEncoder {
            accumulated: 0,
            bytes_per_chunk: self.bytes_per_chunk,
        }))
    }
}

/// Encoder that never acknowledges `finish`.
pub struct StuckEncoder;

#[async_trait]
impl AudioEncoder for StuckEncoder {
    fn push(&mut self, _frame: &PcmFrame) -> Result<Option<Vec<u8>>, EncoderError> {
        Ok(None)
    }

    async fn finish(self: Box<Self>) -> Result<Vec<u8>, EncoderError> {
        std::future::pending().await
    }
}

pub struct StuckEncoderFactory;

impl EncoderFactory for StuckEncoderFactory {
    fn create(
        &self,
        _format: tavern_tapes::domain::session::AudioFormat,
        _quality_kbps: u32,
        _timeslice: Duration,
    ) -> Result<Box<dyn AudioEncoder>, EncoderError> {
        Ok(Box::new(StuckEncoder))
    }
}

#[derive(Default)]
pub struct MemBlobStore {
    pub blobs: Mutex<HashMap<SegmentId, (SegmentRef, Vec<u8>)>>,
}

#[async_trait]
impl BlobStore for MemBlobStore {
    async fn save(&self, reference: &SegmentRef, bytes: &[u8]) -> Result<(), BlobError> {
        self.blobs
            .lock()
            .unwrap()
            .insert(reference.id, (reference.clone(), bytes.to_vec()));
        Ok(())
    }

    async fn load(&self, reference: &SegmentRef) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .lock()
            .unwrap()
            .get(&reference.id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or(BlobError::NotFound(reference.id))
    }

    async fn delete(&self, id: SegmentId) -> Result<(), BlobError> {
        self.blobs.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn list_orphans(
        &self,
        known: &HashSet<SegmentId>,
    ) -> Result<Vec<SegmentId>, BlobError> {
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .keys()
            .filter(|id| !known.contains(id))
            .copied()
            .collect())
    }
}

#[derive(Default)]
pub struct MemSessionStore {
    pub sessions: Mutex<HashMap<SessionId, Session>>,
}

#[async_trait]
impl SessionStore for MemSessionStore {
    async fn put_session(&self, session: &Session) -> Result<(), SessionStoreError> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, SessionStoreError> {
        Ok(self.sessions.lock().unwrap().get(&id).cloned())
    }

    async fn get_all_sessions(&self) -> Result<Vec<Session>, SessionStoreError> {
        Ok(self.sessions.lock().unwrap().values().cloned().collect())
    }

    async fn delete_session(&self, id: SessionId) -> Result<(), SessionStoreError> {
        self.sessions.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn get_settings(&self) -> Result<Settings, SessionStoreError> {
        Ok(Settings::default())
    }

    async fn put_setting(
        &self,
        _key: &str,
        _value: serde_json::Value,
    ) -> Result<(), SessionStoreError> {
        Ok(())
    }

    async fn update_settings(
        &self,
        _entries: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), SessionStoreError> {
        Ok(())
    }

    async fn clear_settings(&self) -> Result<(), SessionStoreError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemRecoveryStore {
    pub slot: Mutex<Option<RecoveryCheckpoint>>,
}

#[async_trait]
impl RecoveryStore for MemRecoveryStore {
    async fn put(&self, checkpoint: &RecoveryCheckpoint) -> Result<(), RecoveryStoreError> {
        *self.slot.lock().unwrap() = Some(checkpoint.clone());
        Ok(())
    }

    async fn get(&self) -> Result<Option<RecoveryCheckpoint>, RecoveryStoreError> {
        Ok(self.slot.lock().unwrap().clone())
    }

    async fn clear(&self) -> Result<(), RecoveryStoreError> {
        *self.slot.lock().unwrap() = None;
        Ok(())
    }
}

pub struct FixedClock;

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 21, 30, 0).unwrap()
    }
}

/// Deterministic ids: session ids count up from 1, segment ids from
/// 0x1000.
pub struct SeqIdGen {
    next_session: AtomicU64,
    next_segment: AtomicU64,
}

impl SeqIdGen {
    pub fn new() -> Self {
        Self {
            next_session: AtomicU64::new(1),
            next_segment: AtomicU64::new(0x1000),
        }
    }
}

impl IdGen for SeqIdGen {
    fn session_id(&self) -> SessionId {
        let n = self.next_session.fetch_add(1, Ordering::SeqCst);
        SessionId::from_uuid(Uuid::from_u128(n as u128))
    }

    fn segment_id(&self) -> SegmentId {
        let n = self.next_segment.fetch_add(1, Ordering::SeqCst);
        SegmentId::from_uuid(Uuid::from_u128(n as u128))
    }
}

pub struct NullStatus;

impl RecordingStatusPort for NullStatus {
    fn recording_changed(&self, _is_recording: bool) {}
}

/// Handles to the shared stores behind an [`EngineDeps`].
pub struct TestStores {
    pub blobs: Arc<MemBlobStore>,
    pub sessions: Arc<MemSessionStore>,
    pub recovery: Arc<MemRecoveryStore>,
}

impl TestStores {
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(MemBlobStore::default()),
            sessions: Arc::new(MemSessionStore::default()),
            recovery: Arc::new(MemRecoveryStore::default()),
        }
    }

    /// Deps wired to these stores with the standard scripted device
    /// and deterministic encoder.
    pub fn deps(&self) -> EngineDeps {
        self.deps_with(Arc::new(ScriptedDevice::new()), Arc::new(TestEncoderFactory::new()))
    }

    pub fn deps_with(
        &self,
        device: Arc<dyn DevicePort>,
        encoders: Arc<dyn EncoderFactory>,
    ) -> EngineDeps {
        EngineDeps {
            device,
            encoders,
            blobs: Arc::clone(&self.blobs) as Arc<dyn BlobStore>,
            sessions: Arc::clone(&self.sessions) as Arc<dyn SessionStore>,
            recovery: Arc::clone(&self.recovery) as Arc<dyn RecoveryStore>,
            clock: Arc::new(FixedClock),
            ids: Arc::new(SeqIdGen::new()),
            status: Arc::new(NullStatus),
        }
    }

    /// The single stored session, if exactly one exists.
    pub fn only_session(&self) -> Session {
        let sessions = self.sessions.sessions.lock().unwrap();
        assert_eq!(sessions.len(), 1, "expected exactly one session");
        sessions.values().next().unwrap().clone()
    }

    /// Every persisted blob is referenced by a session and vice
    /// versa.
    pub fn assert_no_orphans(&self) {
        let referenced: HashSet<SegmentId> = self
            .sessions
            .sessions
            .lock()
            .unwrap()
            .values()
            .flat_map(|s| s.segments.iter().map(|seg| seg.id))
            .collect();
        let stored: HashSet<SegmentId> =
            self.blobs.blobs.lock().unwrap().keys().copied().collect();
        assert_eq!(referenced, stored, "blob/session references diverge");
    }
}
