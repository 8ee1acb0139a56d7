//! Recording engine use case
//!
//! A single task owns the recorder state machine. Control calls,
//! device frames and timer ticks all funnel through that task, so
//! state is never mutated across threads. Store operations are
//! awaited inside the task; frames queue in the device channel in
//! the meantime and are never reordered.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::domain::error::OptionsError;
use crate::domain::ids::{SegmentId, SessionId};
use crate::domain::recording::{
    IllegalTransition, LevelMeter, Recorder, RecorderState, RecoveryCheckpoint,
};
use crate::domain::session::{
    RecordingOptions, SegmentRef, Session, SessionMetadata, SessionName,
};

use super::ports::{
    AudioEncoder, BlobError, BlobStore, Clock, DeviceConfig, DeviceError, DeviceEvent,
    DeviceHandle, DevicePort, EncoderError, EncoderFactory, IdGen, PcmFrame,
    RecordingStatusPort, RecoveryStore, SessionStore, SessionStoreError, DEFAULT_TIMESLICE,
};

/// Checkpoint cadence while a session is live
pub const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5);

/// Hard ceiling on buffered chunks before a split is forced
pub const MAX_INFLIGHT_CHUNKS: usize = 100;

/// How long `stop` waits for the encoder before emergency cleanup
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Store writes on hot paths retry this many times
const RETRY_ATTEMPTS: u32 = 3;

/// Errors from `start` and `recover`
#[derive(Debug, Error)]
pub enum StartError {
    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("An interrupted session \"{}\" can be recovered", .0.session_name)]
    RecoveryAvailable(Box<RecoveryCheckpoint>),

    #[error("No interrupted session to recover")]
    NothingToRecover,

    #[error(transparent)]
    InvalidOptions(#[from] OptionsError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error("Recording engine is shut down")]
    EngineClosed,
}

/// Errors from `stop`
#[derive(Debug, Error)]
pub enum StopError {
    #[error("No recording in progress")]
    NotRecording,

    #[error("Encoder did not acknowledge stop in time")]
    Timeout { metadata: SessionMetadata },

    #[error("Encoder failed during finalize: {source}")]
    Encoder {
        source: EncoderError,
        metadata: SessionMetadata,
    },

    #[error(transparent)]
    Blob(BlobError),

    #[error(transparent)]
    Store(SessionStoreError),

    #[error("Recording engine is shut down")]
    EngineClosed,
}

/// Errors from the remaining control operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Illegal(#[from] IllegalTransition),

    #[error("Recording engine is shut down")]
    EngineClosed,
}

/// Advisory notifications pushed to the registered sink.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Normalized input loudness, 0..1
    Level(f32),
    /// Input has stayed below the dynamic threshold for 5 s
    SilenceDetected,
    /// A segment became durable
    SegmentFinalized(SegmentRef),
    /// The engine entered the failed state
    Fatal(String),
}

pub type EventSink = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Everything the engine needs, injected by the composition root.
pub struct EngineDeps {
    pub device: Arc<dyn DevicePort>,
    pub encoders: Arc<dyn EncoderFactory>,
    pub blobs: Arc<dyn BlobStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub recovery: Arc<dyn RecoveryStore>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGen>,
    pub status: Arc<dyn RecordingStatusPort>,
}

enum Command {
    Start {
        name: String,
        options: RecordingOptions,
        reply: oneshot::Sender<Result<(), StartError>>,
    },
    Recover {
        options: RecordingOptions,
        reply: oneshot::Sender<Result<(), StartError>>,
    },
    Pause {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Resume {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<SessionMetadata, StopError>>,
    },
    ForceStop {
        reply: oneshot::Sender<SessionMetadata>,
    },
    Cleanup {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    RecoveryState {
        reply: oneshot::Sender<Option<RecoveryCheckpoint>>,
    },
    DiscardRecovery {
        reply: oneshot::Sender<bool>,
    },
    CheckpointNow {
        reply: oneshot::Sender<()>,
    },
    QueryState {
        reply: oneshot::Sender<RecorderState>,
    },
    SetEventSink {
        sink: EventSink,
    },
}

/// Handle to the engine task. Cheap to clone; the task exits when the
/// last handle is dropped.
#[derive(Clone)]
pub struct RecordingEngine {
    commands: mpsc::Sender<Command>,
    level_rx: watch::Receiver<f32>,
}

impl RecordingEngine {
    /// Spawn the engine task and return its handle.
    pub fn spawn(deps: EngineDeps) -> Self {
        let (commands, cmd_rx) = mpsc::channel(64);
        let (level_tx, level_rx) = watch::channel(0.0f32);
        tokio::spawn(EngineTask::new(deps, cmd_rx, level_tx).run());
        Self { commands, level_rx }
    }

    async fn send<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
        closed: R,
    ) -> R {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(make(tx)).await.is_err() {
            return closed;
        }
        rx.await.unwrap_or(closed)
    }

    /// Begin a recording. The name is sanitized; an empty result is
    /// synthesized from the start timestamp.
    pub async fn start(&self, name: &str, options: RecordingOptions) -> Result<(), StartError> {
        let name = name.to_string();
        self.send(
            |reply| Command::Start {
                name,
                options,
                reply,
            },
            Err(StartError::EngineClosed),
        )
        .await
    }

    /// Resume an interrupted session from its checkpoint.
    pub async fn recover(&self, options: RecordingOptions) -> Result<(), StartError> {
        self.send(
            |reply| Command::Recover { options, reply },
            Err(StartError::EngineClosed),
        )
        .await
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        self.send(
            |reply| Command::Pause { reply },
            Err(EngineError::EngineClosed),
        )
        .await
    }

    pub async fn resume(&self) -> Result<(), EngineError> {
        self.send(
            |reply| Command::Resume { reply },
            Err(EngineError::EngineClosed),
        )
        .await
    }

    /// Finalize the recording and return its metadata.
    pub async fn stop(&self) -> Result<SessionMetadata, StopError> {
        self.send(
            |reply| Command::Stop { reply },
            Err(StopError::EngineClosed),
        )
        .await
    }

    /// Best-effort stop for stuck states. Always lands in idle.
    pub async fn force_stop(&self) -> Option<SessionMetadata> {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::ForceStop { reply: tx })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok()
    }

    /// Return the engine to idle after a fatal error.
    pub async fn cleanup(&self) -> Result<(), EngineError> {
        self.send(
            |reply| Command::Cleanup { reply },
            Err(EngineError::EngineClosed),
        )
        .await
    }

    pub async fn recovery_state(&self) -> Option<RecoveryCheckpoint> {
        self.send(|reply| Command::RecoveryState { reply }, None).await
    }

    /// Erase the checkpoint slot. Returns false when the engine is
    /// shut down.
    pub async fn clear_recovery_state(&self) -> bool {
        self.send(|reply| Command::DiscardRecovery { reply }, false)
            .await
    }

    /// Write one checkpoint immediately. Used by the crash-signal
    /// wiring.
    pub async fn checkpoint_now(&self) {
        self.send(|reply| Command::CheckpointNow { reply }, ()).await
    }

    pub async fn state(&self) -> RecorderState {
        self.send(|reply| Command::QueryState { reply }, RecorderState::Idle)
            .await
    }

    /// Register a sink for level, silence and segment notifications.
    pub async fn set_event_sink(&self, sink: EventSink) {
        let _ = self.commands.send(Command::SetEventSink { sink }).await;
    }

    /// Watch channel carrying the latest normalized level.
    pub fn level_watch(&self) -> watch::Receiver<f32> {
        self.level_rx.clone()
    }
}

/// Bookkeeping for the live recording.
struct LiveSession {
    name: SessionName,
    options: RecordingOptions,
    start_time: DateTime<Utc>,
    device: Option<DeviceHandle>,
    encoder: Option<Box<dyn AudioEncoder>>,
    meter: LevelMeter,
    session_id: Option<SessionId>,
    session: Option<Session>,
    /// Chunks of the current segment, in arrival order
    chunks: Vec<Vec<u8>>,
    segment_id: Option<SegmentId>,
    segment_bytes: u64,
    persisted_bytes: u64,
    next_sequence: u32,
    /// Active (unpaused) time accumulated before `active_since`
    active_accum: Duration,
    active_since: Option<Instant>,
    /// Wall instant of the last split (or of start)
    segment_started: Instant,
    /// Session duration when the current segment began
    segment_base_secs: u64,
}

impl LiveSession {
    fn new(
        name: SessionName,
        options: RecordingOptions,
        start_time: DateTime<Utc>,
        device: DeviceHandle,
        encoder: Box<dyn AudioEncoder>,
        prior_duration: Duration,
        first_sequence: u32,
    ) -> Self {
        Self {
            name,
            options,
            start_time,
            device: Some(device),
            encoder: Some(encoder),
            meter: LevelMeter::new(),
            session_id: None,
            session: None,
            chunks: Vec::new(),
            segment_id: None,
            segment_bytes: 0,
            persisted_bytes: 0,
            next_sequence: first_sequence,
            active_accum: prior_duration,
            active_since: Some(Instant::now()),
            segment_started: Instant::now(),
            segment_base_secs: prior_duration.as_secs(),
        }
    }

    fn is_paused(&self) -> bool {
        self.active_since.is_none()
    }

    fn pause(&mut self) {
        if let Some(since) = self.active_since.take() {
            self.active_accum += since.elapsed();
        }
        self.meter.reset_silence();
    }

    fn resume(&mut self) {
        if self.active_since.is_none() {
            self.active_since = Some(Instant::now());
        }
    }

    fn duration_secs(&self) -> u64 {
        let mut total = self.active_accum;
        if let Some(since) = self.active_since {
            total += since.elapsed();
        }
        total.as_secs()
    }

    fn total_bytes(&self) -> u64 {
        self.persisted_bytes + self.segment_bytes
    }

    fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            session_name: self.name.clone(),
            start_time: self.start_time,
            duration_seconds: self.duration_secs(),
            file_size_bytes: self.total_bytes(),
            format: self.options.format,
            quality_kbps: self.options.quality_kbps,
        }
    }

    /// Metadata snapshot covering only the current segment.
    fn segment_metadata(&self) -> SessionMetadata {
        SessionMetadata {
            session_name: self.name.clone(),
            start_time: self.start_time,
            duration_seconds: self.duration_secs().saturating_sub(self.segment_base_secs),
            file_size_bytes: self.segment_bytes,
            format: self.options.format,
            quality_kbps: self.options.quality_kbps,
        }
    }

    fn checkpoint(&self) -> RecoveryCheckpoint {
        let current_segment_ref = self.segment_id.map(|id| {
            SegmentRef::new(id, self.segment_metadata(), self.next_sequence)
        });
        RecoveryCheckpoint {
            session_name: self.name.clone(),
            start_time: self.start_time,
            duration_seconds: self.duration_secs(),
            is_paused: self.is_paused(),
            current_segment_ref,
            metadata: self.metadata(),
        }
    }

    fn split_due(&self) -> bool {
        if self.chunks.len() >= MAX_INFLIGHT_CHUNKS {
            return true;
        }
        if let Some(limit) = self.options.split_size_bytes() {
            if self.segment_bytes >= limit {
                return true;
            }
        }
        if let Some(interval) = self.options.split_interval_secs() {
            if self.segment_started.elapsed().as_secs() >= interval {
                return true;
            }
        }
        false
    }
}

struct EngineTask {
    deps: EngineDeps,
    cmd_rx: mpsc::Receiver<Command>,
    recorder: Recorder,
    live: Option<LiveSession>,
    event_sink: Option<EventSink>,
    level_tx: watch::Sender<f32>,
}

impl EngineTask {
    fn new(deps: EngineDeps, cmd_rx: mpsc::Receiver<Command>, level_tx: watch::Sender<f32>) -> Self {
        Self {
            deps,
            cmd_rx,
            recorder: Recorder::new(),
            live: None,
            event_sink: None,
            level_tx,
        }
    }

    async fn run(mut self) {
        let mut checkpoint_tick = tokio::time::interval(CHECKPOINT_INTERVAL);
        checkpoint_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let live_now = self.live.is_some();
            tokio::select! {
                command = self.cmd_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                _ = checkpoint_tick.tick(), if live_now && self.recorder.state().is_live() => {
                    self.write_checkpoint().await;
                }
                event = Self::next_device_event(&mut self.live), if live_now => {
                    self.handle_device_event(event).await;
                }
            }
        }

        info!("recording engine task exited");
    }

    async fn next_device_event(live: &mut Option<LiveSession>) -> Option<DeviceEvent> {
        match live.as_mut().and_then(|l| l.device.as_mut()) {
            Some(device) => device.next_event().await,
            None => std::future::pending().await,
        }
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(sink) = &self.event_sink {
            sink(event);
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start {
                name,
                options,
                reply,
            } => {
                let _ = reply.send(self.handle_start(&name, options).await);
            }
            Command::Recover { options, reply } => {
                let _ = reply.send(self.handle_recover(options).await);
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.handle_pause());
            }
            Command::Resume { reply } => {
                let _ = reply.send(self.handle_resume());
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.handle_stop().await);
            }
            Command::ForceStop { reply } => {
                let _ = reply.send(self.handle_force_stop().await);
            }
            Command::Cleanup { reply } => {
                let _ = reply.send(self.recorder.cleanup().map_err(EngineError::from));
            }
            Command::RecoveryState { reply } => {
                let checkpoint = self.deps.recovery.get().await.ok().flatten();
                let _ = reply.send(checkpoint);
            }
            Command::DiscardRecovery { reply } => {
                let ok = self.deps.recovery.clear().await.is_ok();
                let _ = reply.send(ok);
            }
            Command::CheckpointNow { reply } => {
                self.write_checkpoint().await;
                let _ = reply.send(());
            }
            Command::QueryState { reply } => {
                let _ = reply.send(self.recorder.state());
            }
            Command::SetEventSink { sink } => {
                self.event_sink = Some(sink);
            }
        }
    }

    async fn handle_start(
        &mut self,
        raw_name: &str,
        options: RecordingOptions,
    ) -> Result<(), StartError> {
        if self.recorder.state() != RecorderState::Idle {
            return Err(StartError::AlreadyRecording);
        }
        options.validate()?;

        // A pending checkpoint is offered, never silently consumed.
        if let Ok(Some(checkpoint)) = self.deps.recovery.get().await {
            if checkpoint.is_stale(self.deps.clock.now_utc()) {
                info!(
                    session = %checkpoint.session_name,
                    "purging stale recovery checkpoint"
                );
                let _ = self.deps.recovery.clear().await;
            } else {
                return Err(StartError::RecoveryAvailable(Box::new(checkpoint)));
            }
        }

        let start_time = self.deps.clock.now_utc();
        let name = SessionName::sanitize_or_synthesize(raw_name, start_time);
        self.begin_live(name, options, start_time, Duration::ZERO, 1, false)
            .await
    }

    async fn handle_recover(&mut self, options: RecordingOptions) -> Result<(), StartError> {
        if self.recorder.state() != RecorderState::Idle {
            return Err(StartError::AlreadyRecording);
        }
        let checkpoint = self
            .deps
            .recovery
            .get()
            .await
            .ok()
            .flatten()
            .ok_or(StartError::NothingToRecover)?;

        // Prior segments keep their container; the recovered tail must
        // match it.
        let mut options = options;
        options.format = checkpoint.metadata.format;
        options.quality_kbps = checkpoint.metadata.quality_kbps;
        options.validate()?;

        let first_sequence = checkpoint
            .current_segment_ref
            .as_ref()
            .map(|r| r.sequence_index + 1)
            .unwrap_or(1);

        info!(
            session = %checkpoint.session_name,
            duration = checkpoint.duration_seconds,
            "recovering interrupted session"
        );
        self.begin_live(
            checkpoint.session_name.clone(),
            options,
            checkpoint.start_time,
            Duration::from_secs(checkpoint.duration_seconds),
            first_sequence,
            true,
        )
        .await
    }

    /// Shared tail of `start` and `recover`: acquire the device and
    /// encoder, then enter the recording state. On any error every
    /// partial resource is released and the state is idle again.
    async fn begin_live(
        &mut self,
        name: SessionName,
        options: RecordingOptions,
        start_time: DateTime<Utc>,
        prior_duration: Duration,
        first_sequence: u32,
        recovering: bool,
    ) -> Result<(), StartError> {
        if recovering {
            self.recorder.recover().map_err(|_| StartError::AlreadyRecording)?;
        } else {
            self.recorder.begin_start().map_err(|_| StartError::AlreadyRecording)?;
        }

        let config = DeviceConfig {
            device_id: options.input_device_id.clone(),
            ..DeviceConfig::default()
        };
        let device = match self.deps.device.open(config).await {
            Ok(device) => device,
            Err(err) => {
                self.recorder.force_idle();
                return Err(err.into());
            }
        };

        let encoder = match self.deps.encoders.create(
            options.format,
            options.quality_kbps,
            DEFAULT_TIMESLICE,
        ) {
            Ok(encoder) => encoder,
            Err(err) => {
                device.close();
                self.recorder.force_idle();
                return Err(err.into());
            }
        };

        if !recovering {
            self.recorder
                .device_ready()
                .map_err(|_| StartError::AlreadyRecording)?;
        }

        info!(session = %name, format = %options.format, "recording started");
        self.live = Some(LiveSession::new(
            name,
            options,
            start_time,
            device,
            encoder,
            prior_duration,
            first_sequence,
        ));
        self.deps.status.recording_changed(true);
        self.write_checkpoint().await;
        Ok(())
    }

    fn handle_pause(&mut self) -> Result<(), EngineError> {
        self.recorder.pause()?;
        if let Some(live) = self.live.as_mut() {
            live.pause();
        }
        info!("recording paused");
        Ok(())
    }

    fn handle_resume(&mut self) -> Result<(), EngineError> {
        self.recorder.resume()?;
        if let Some(live) = self.live.as_mut() {
            live.resume();
        }
        info!("recording resumed");
        Ok(())
    }

    async fn handle_device_event(&mut self, event: Option<DeviceEvent>) {
        match event {
            Some(DeviceEvent::Frame(frame)) => self.on_frame(frame).await,
            Some(DeviceEvent::Lost(reason)) => self.on_device_lost(reason).await,
            None => self.on_device_lost("stream ended".to_string()).await,
        }
    }

    async fn on_frame(&mut self, frame: PcmFrame) {
        if self.recorder.state() != RecorderState::Recording {
            // Paused (or mid-transition): frames are dropped, duration
            // stays frozen, no segment flushes happen.
            return;
        }

        let reading = match self.live.as_mut() {
            Some(live) => live.meter.observe(&frame.samples, frame.duration_millis()),
            None => return,
        };
        self.level_tx.send_replace(reading.level);
        if let Some(sink) = &self.event_sink {
            sink(EngineEvent::Level(reading.level));
            if reading.silence_detected {
                sink(EngineEvent::SilenceDetected);
            }
        }

        let pushed = match self.live.as_mut().and_then(|l| l.encoder.as_mut()) {
            Some(encoder) => encoder.push(&frame),
            None => Ok(None),
        };
        match pushed {
            Ok(Some(chunk)) => self.on_chunk(chunk).await,
            Ok(None) => {}
            Err(err) => self.fail(format!("encoder error: {err}")).await,
        }
    }

    async fn on_chunk(&mut self, chunk: Vec<u8>) {
        {
            let Some(live) = self.live.as_mut() else { return };
            if live.session_id.is_none() {
                live.session_id = Some(self.deps.ids.session_id());
            }
            if live.segment_id.is_none() {
                live.segment_id = Some(self.deps.ids.segment_id());
            }
            live.segment_bytes += chunk.len() as u64;
            live.chunks.push(chunk);
        }

        let due = self.live.as_ref().map(|l| l.split_due()).unwrap_or(false);
        if due {
            if let Err(err) = self.split().await {
                self.fail(format!("split failed: {err}")).await;
            }
        }
    }

    /// Roll the live recording onto a fresh segment. The replacement
    /// encoder is created before the old one is finalized so capture
    /// continues uninterrupted; frames that arrive meanwhile wait in
    /// the device channel and land on the new encoder in order.
    async fn split(&mut self) -> Result<(), String> {
        self.recorder.begin_split().map_err(|e| e.to_string())?;

        let (format, quality) = {
            let live = self.live.as_ref().ok_or("no live session")?;
            (live.options.format, live.options.quality_kbps)
        };
        let next_encoder = self
            .deps
            .encoders
            .create(format, quality, DEFAULT_TIMESLICE)
            .map_err(|e| e.to_string())?;

        let old_encoder = self
            .live
            .as_mut()
            .and_then(|l| l.encoder.replace(next_encoder));

        let tail = match old_encoder {
            Some(encoder) => encoder.finish().await.map_err(|e| e.to_string())?,
            None => Vec::new(),
        };

        self.finalize_segment(tail).await.map_err(|e| e.to_string())?;

        if let Some(live) = self.live.as_mut() {
            live.segment_started = Instant::now();
            live.segment_base_secs = live.duration_secs();
        }
        self.recorder.split_done().map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Make the buffered chunks (plus the encoder tail) durable as one
    /// segment and write the session record.
    async fn finalize_segment(&mut self, tail: Vec<u8>) -> Result<(), StopError> {
        let Some(live) = self.live.as_mut() else {
            return Ok(());
        };

        if !tail.is_empty() {
            if live.session_id.is_none() {
                live.session_id = Some(self.deps.ids.session_id());
            }
            if live.segment_id.is_none() {
                live.segment_id = Some(self.deps.ids.segment_id());
            }
            live.segment_bytes += tail.len() as u64;
            live.chunks.push(tail);
        }

        if live.chunks.is_empty() || live.segment_id.is_none() {
            return Ok(());
        }

        let segment_id = live.segment_id.take().expect("checked above");
        let sequence = live.next_sequence;
        let reference = SegmentRef::new(segment_id, live.segment_metadata(), sequence);
        let bytes: Vec<u8> = live.chunks.concat();

        self.deps
            .blobs
            .save(&reference, &bytes)
            .await
            .map_err(StopError::Blob)?;

        let live = self.live.as_mut().expect("live session");
        live.persisted_bytes += live.segment_bytes;
        live.segment_bytes = 0;
        live.chunks.clear();
        live.next_sequence += 1;

        // The session record is created on the first durable segment
        // and updated on every later one.
        let session_id = live.session_id.expect("allocated with first chunk");
        let mut session = match live.session.take() {
            Some(session) => session,
            None => Session::new(session_id, live.start_time, live.metadata()),
        };
        session.metadata = live.metadata();
        session.segments.push(reference.clone());

        let result = self.put_session_with_retry(&session).await;
        match result {
            Ok(()) => {
                info!(
                    session = %session.metadata.session_name,
                    segment = %reference.id,
                    sequence,
                    bytes = bytes.len(),
                    "segment finalized"
                );
                if let Some(live) = self.live.as_mut() {
                    live.session = Some(session);
                }
                self.emit(EngineEvent::SegmentFinalized(reference));
                Ok(())
            }
            Err(err) => {
                // The blob would be unreachable without a session
                // record; remove it before reporting.
                warn!(segment = %reference.id, "session write failed, removing blob");
                let _ = self.deps.blobs.delete(reference.id).await;
                Err(StopError::Store(err))
            }
        }
    }

    async fn put_session_with_retry(
        &self,
        session: &Session,
    ) -> Result<(), SessionStoreError> {
        let mut last = None;
        for attempt in 1..=RETRY_ATTEMPTS {
            match self.deps.sessions.put_session(session).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(attempt, error = %err, "session store write failed");
                    last = Some(err);
                    if attempt < RETRY_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                    }
                }
            }
        }
        Err(last.unwrap_or_else(|| SessionStoreError::Failed("write failed".into())))
    }

    async fn handle_stop(&mut self) -> Result<SessionMetadata, StopError> {
        match self.recorder.state() {
            RecorderState::Recording => {}
            RecorderState::Paused => {
                // Self-resume so the encoder finalizes from a running
                // stream.
                let _ = self.recorder.resume();
                if let Some(live) = self.live.as_mut() {
                    live.resume();
                }
            }
            _ => return Err(StopError::NotRecording),
        }
        self.recorder.begin_stop().map_err(|_| StopError::NotRecording)?;

        // Freeze duration and release the device before finalizing.
        let (metadata, encoder) = match self.live.as_mut() {
            Some(live) => {
                live.pause();
                if let Some(device) = live.device.take() {
                    device.close();
                }
                (live.metadata(), live.encoder.take())
            }
            None => return Err(StopError::NotRecording),
        };

        let tail = match encoder {
            Some(encoder) => {
                match tokio::time::timeout(STOP_TIMEOUT, encoder.finish()).await {
                    Ok(Ok(tail)) => tail,
                    Ok(Err(err)) => {
                        error!(error = %err, "encoder failed during stop");
                        let synthetic = self.emergency_cleanup(&metadata).await;
                        return Err(StopError::Encoder {
                            source: err,
                            metadata: synthetic,
                        });
                    }
                    Err(_) => {
                        error!("encoder did not acknowledge stop within {:?}", STOP_TIMEOUT);
                        let synthetic = self.emergency_cleanup(&metadata).await;
                        return Err(StopError::Timeout {
                            metadata: synthetic,
                        });
                    }
                }
            }
            None => Vec::new(),
        };

        let finalize_result = self.finalize_segment(tail).await;
        let final_metadata = self
            .live
            .as_ref()
            .map(|l| l.metadata())
            .unwrap_or(metadata);

        self.live = None;
        self.deps.status.recording_changed(false);
        self.level_tx.send_replace(0.0);
        let _ = self.recorder.stopped();

        // The checkpoint outlives a failed finalize so the session
        // stays recoverable.
        finalize_result?;
        if let Err(err) = self.deps.recovery.clear().await {
            warn!(error = %err, "failed to clear recovery checkpoint");
        }
        info!(
            session = %final_metadata.session_name,
            duration = final_metadata.duration_seconds,
            bytes = final_metadata.file_size_bytes,
            "recording stopped"
        );
        Ok(final_metadata)
    }

    /// Tear everything down after a stuck or failed finalize. Returns
    /// the synthetic metadata handed back to the host.
    async fn emergency_cleanup(&mut self, metadata: &SessionMetadata) -> SessionMetadata {
        self.live = None;
        self.deps.status.recording_changed(false);
        self.level_tx.send_replace(0.0);
        let _ = self.deps.recovery.clear().await;
        self.recorder.force_idle();
        SessionMetadata::synthetic(
            metadata.session_name.clone(),
            metadata.start_time,
            metadata.duration_seconds,
        )
    }

    async fn handle_force_stop(&mut self) -> SessionMetadata {
        let metadata = self
            .live
            .as_ref()
            .map(|l| l.metadata())
            .unwrap_or_else(|| {
                SessionMetadata::synthetic(
                    SessionName::sanitize_or_synthesize("", self.deps.clock.now_utc()),
                    self.deps.clock.now_utc(),
                    0,
                )
            });

        if let Some(live) = self.live.as_mut() {
            live.pause();
            if let Some(device) = live.device.take() {
                device.close();
            }
            let encoder = live.encoder.take();
            if let Some(encoder) = encoder {
                // Shorter grace period than a clean stop; a stuck
                // encoder must not hold the engine hostage here.
                match tokio::time::timeout(Duration::from_secs(2), encoder.finish()).await {
                    Ok(Ok(tail)) => {
                        let _ = self.finalize_segment(tail).await;
                    }
                    _ => warn!("encoder ignored force stop; discarding tail"),
                }
            } else {
                let _ = self.finalize_segment(Vec::new()).await;
            }
        }

        let final_metadata = self
            .live
            .as_ref()
            .map(|l| l.metadata())
            .unwrap_or(metadata);
        self.live = None;
        self.deps.status.recording_changed(false);
        self.level_tx.send_replace(0.0);
        let _ = self.deps.recovery.clear().await;
        self.recorder.force_idle();
        info!("recording force-stopped");
        final_metadata
    }

    async fn on_device_lost(&mut self, reason: String) {
        error!(reason = %reason, "audio device lost");
        if let Some(live) = self.live.as_mut() {
            live.pause();
            live.device = None;
            let encoder = live.encoder.take();
            let tail = match encoder {
                Some(encoder) => {
                    match tokio::time::timeout(Duration::from_secs(2), encoder.finish()).await {
                        Ok(Ok(tail)) => tail,
                        _ => Vec::new(),
                    }
                }
                None => Vec::new(),
            };
            // Truncated session record; the checkpoint stays for
            // user-visible recovery.
            let _ = self.finalize_segment(tail).await;
        }
        self.write_checkpoint().await;
        self.live = None;
        self.deps.status.recording_changed(false);
        self.level_tx.send_replace(0.0);
        self.recorder.fail();
        self.emit(EngineEvent::Fatal(
            DeviceError::DeviceLost(reason).to_string(),
        ));
    }

    /// Fatal error path for blob/encoder failures: finalize nothing,
    /// keep the checkpoint, surface the failure.
    async fn fail(&mut self, reason: String) {
        error!(reason = %reason, "recording failed");
        self.write_checkpoint().await;
        if let Some(live) = self.live.as_mut() {
            if let Some(device) = live.device.take() {
                device.close();
            }
        }
        self.live = None;
        self.deps.status.recording_changed(false);
        self.level_tx.send_replace(0.0);
        self.recorder.fail();
        self.emit(EngineEvent::Fatal(reason));
    }

    async fn write_checkpoint(&mut self) {
        let Some(live) = self.live.as_ref() else {
            return;
        };
        let checkpoint = live.checkpoint();
        if let Err(err) = self.deps.recovery.put(&checkpoint).await {
            // Best effort; the next tick tries again.
            warn!(error = %err, "checkpoint write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{
        BlobError, DeviceConfig, InputDeviceInfo, RecoveryStoreError,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::{Map, Value};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct FixedClock;

    impl Clock for FixedClock {
        fn now_utc(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2025, 3, 1, 21, 30, 0).unwrap()
        }
    }

    struct SeqIds;

    impl IdGen for SeqIds {
        fn session_id(&self) -> SessionId {
            SessionId::from_uuid(Uuid::new_v4())
        }

        fn segment_id(&self) -> SegmentId {
            SegmentId::from_uuid(Uuid::new_v4())
        }
    }

    struct SilentDevice;

    #[async_trait]
    impl DevicePort for SilentDevice {
        async fn enumerate_inputs(&self) -> Result<Vec<InputDeviceInfo>, DeviceError> {
            Ok(vec![])
        }

        async fn open(&self, _config: DeviceConfig) -> Result<DeviceHandle, DeviceError> {
            let (_tx, rx) = mpsc::channel(8);
            // keep the sender alive so the stream never "ends"
            let handle = DeviceHandle::new(rx, Box::new(move || drop(_tx)));
            Ok(handle)
        }
    }

    struct DeniedDevice;

    #[async_trait]
    impl DevicePort for DeniedDevice {
        async fn enumerate_inputs(&self) -> Result<Vec<InputDeviceInfo>, DeviceError> {
            Ok(vec![])
        }

        async fn open(&self, _config: DeviceConfig) -> Result<DeviceHandle, DeviceError> {
            Err(DeviceError::PermissionDenied)
        }
    }

    struct NullEncoder;

    #[async_trait]
    impl AudioEncoder for NullEncoder {
        fn push(&mut self, _frame: &PcmFrame) -> Result<Option<Vec<u8>>, EncoderError> {
            Ok(None)
        }

        async fn finish(self: Box<Self>) -> Result<Vec<u8>, EncoderError> {
            Ok(Vec::new())
        }
    }

    struct NullEncoderFactory;

    impl EncoderFactory for NullEncoderFactory {
        fn create(
            &self,
            _format: crate::domain::session::AudioFormat,
            _quality_kbps: u32,
            _timeslice: Duration,
        ) -> Result<Box<dyn AudioEncoder>, EncoderError> {
            Ok(Box::new(NullEncoder))
        }
    }

    #[derive(Default)]
    struct MemoryBlobStore;

    #[async_trait]
    impl BlobStore for MemoryBlobStore {
        async fn save(&self, _r: &SegmentRef, _b: &[u8]) -> Result<(), BlobError> {
            Ok(())
        }

        async fn load(&self, r: &SegmentRef) -> Result<Vec<u8>, BlobError> {
            Err(BlobError::NotFound(r.id))
        }

        async fn delete(&self, _id: SegmentId) -> Result<(), BlobError> {
            Ok(())
        }

        async fn list_orphans(
            &self,
            _known: &HashSet<SegmentId>,
        ) -> Result<Vec<SegmentId>, BlobError> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct MemorySessionStore {
        sessions: Mutex<Vec<Session>>,
    }

    #[async_trait]
    impl SessionStore for MemorySessionStore {
        async fn put_session(&self, session: &Session) -> Result<(), SessionStoreError> {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.retain(|s| s.id != session.id);
            sessions.push(session.clone());
            Ok(())
        }

        async fn get_session(
            &self,
            id: SessionId,
        ) -> Result<Option<Session>, SessionStoreError> {
            Ok(self
                .sessions
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.id == id)
                .cloned())
        }

        async fn get_all_sessions(&self) -> Result<Vec<Session>, SessionStoreError> {
            Ok(self.sessions.lock().unwrap().clone())
        }

        async fn delete_session(&self, id: SessionId) -> Result<(), SessionStoreError> {
            self.sessions.lock().unwrap().retain(|s| s.id != id);
            Ok(())
        }

        async fn get_settings(
            &self,
        ) -> Result<crate::domain::settings::Settings, SessionStoreError> {
            Ok(Default::default())
        }

        async fn put_setting(&self, _k: &str, _v: Value) -> Result<(), SessionStoreError> {
            Ok(())
        }

        async fn update_settings(
            &self,
            _entries: Map<String, Value>,
        ) -> Result<(), SessionStoreError> {
            Ok(())
        }

        async fn clear_settings(&self) -> Result<(), SessionStoreError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryRecoveryStore {
        slot: Mutex<Option<RecoveryCheckpoint>>,
    }

    #[async_trait]
    impl RecoveryStore for MemoryRecoveryStore {
        async fn put(&self, cp: &RecoveryCheckpoint) -> Result<(), RecoveryStoreError> {
            *self.slot.lock().unwrap() = Some(cp.clone());
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

    #[derive(Default)]
    struct StatusSpy {
        recording: AtomicBool,
    }

    impl RecordingStatusPort for StatusSpy {
        fn recording_changed(&self, is_recording: bool) {
            self.recording.store(is_recording, Ordering::SeqCst);
        }
    }

    fn deps() -> (EngineDeps, Arc<MemoryRecoveryStore>, Arc<StatusSpy>) {
        let recovery = Arc::new(MemoryRecoveryStore::default());
        let status = Arc::new(StatusSpy::default());
        let deps = EngineDeps {
            device: Arc::new(SilentDevice),
            encoders: Arc::new(NullEncoderFactory),
            blobs: Arc::new(MemoryBlobStore),
            sessions: Arc::new(MemorySessionStore::default()),
            recovery: Arc::clone(&recovery) as Arc<dyn RecoveryStore>,
            clock: Arc::new(FixedClock),
            ids: Arc::new(SeqIds),
            status: Arc::clone(&status) as Arc<dyn RecordingStatusPort>,
        };
        (deps, recovery, status)
    }

    #[tokio::test]
    async fn start_then_stop_returns_to_idle() {
        let (deps, _, status) = deps();
        let engine = RecordingEngine::spawn(deps);

        engine
            .start("Goblin Ambush", RecordingOptions::default())
            .await
            .unwrap();
        assert_eq!(engine.state().await, RecorderState::Recording);
        assert!(status.recording.load(Ordering::SeqCst));

        let metadata = engine.stop().await.unwrap();
        assert_eq!(metadata.session_name.as_str(), "Goblin Ambush");
        assert_eq!(engine.state().await, RecorderState::Idle);
        assert!(!status.recording.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let (deps, _, _) = deps();
        let engine = RecordingEngine::spawn(deps);

        engine.start("one", RecordingOptions::default()).await.unwrap();
        let err = engine
            .start("two", RecordingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StartError::AlreadyRecording));
    }

    #[tokio::test]
    async fn device_denial_rolls_back_to_idle() {
        let (mut deps, _, _) = deps();
        deps.device = Arc::new(DeniedDevice);
        let engine = RecordingEngine::spawn(deps);

        let err = engine
            .start("denied", RecordingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StartError::Device(DeviceError::PermissionDenied)));
        assert_eq!(engine.state().await, RecorderState::Idle);
    }

    #[tokio::test]
    async fn invalid_options_rejected_without_side_effects() {
        let (deps, recovery, _) = deps();
        let engine = RecordingEngine::spawn(deps);

        let mut options = RecordingOptions::default();
        options.quality_kbps = 100;
        let err = engine.start("bad", options).await.unwrap_err();
        assert!(matches!(err, StartError::InvalidOptions(_)));
        assert_eq!(engine.state().await, RecorderState::Idle);
        assert!(recovery.slot.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn pause_and_resume_round_trip() {
        let (deps, _, _) = deps();
        let engine = RecordingEngine::spawn(deps);

        engine.start("", RecordingOptions::default()).await.unwrap();
        engine.pause().await.unwrap();
        assert_eq!(engine.state().await, RecorderState::Paused);
        engine.resume().await.unwrap();
        assert_eq!(engine.state().await, RecorderState::Recording);
    }

    #[tokio::test]
    async fn pause_outside_recording_is_illegal() {
        let (deps, _, _) = deps();
        let engine = RecordingEngine::spawn(deps);
        assert!(matches!(
            engine.pause().await,
            Err(EngineError::Illegal(_))
        ));
    }

    #[tokio::test]
    async fn stop_from_paused_self_resumes() {
        let (deps, recovery, _) = deps();
        let engine = RecordingEngine::spawn(deps);

        engine.start("paused stop", RecordingOptions::default()).await.unwrap();
        engine.pause().await.unwrap();
        let metadata = engine.stop().await.unwrap();
        assert_eq!(metadata.session_name.as_str(), "paused stop");
        assert_eq!(engine.state().await, RecorderState::Idle);
        assert!(recovery.slot.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn stop_without_recording_fails() {
        let (deps, _, _) = deps();
        let engine = RecordingEngine::spawn(deps);
        assert!(matches!(engine.stop().await, Err(StopError::NotRecording)));
    }

    #[tokio::test]
    async fn empty_name_is_synthesized() {
        let (deps, _, _) = deps();
        let engine = RecordingEngine::spawn(deps);

        engine.start("   ", RecordingOptions::default()).await.unwrap();
        let metadata = engine.stop().await.unwrap();
        assert_eq!(metadata.session_name.as_str(), "Session_2025-03-01_2130");
    }

    #[tokio::test]
    async fn checkpoint_written_at_start_and_cleared_on_stop() {
        let (deps, recovery, _) = deps();
        let engine = RecordingEngine::spawn(deps);

        engine.start("Campaign 5", RecordingOptions::default()).await.unwrap();
        {
            let slot = recovery.slot.lock().unwrap();
            let cp = slot.as_ref().expect("checkpoint after start");
            assert_eq!(cp.session_name.as_str(), "Campaign 5");
            assert!(!cp.is_paused);
        }
        engine.stop().await.unwrap();
        assert!(recovery.slot.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_checkpoint_blocks_start() {
        let (deps, recovery, _) = deps();
        {
            let engine = RecordingEngine::spawn(EngineDeps {
                device: Arc::new(SilentDevice),
                encoders: Arc::new(NullEncoderFactory),
                blobs: Arc::new(MemoryBlobStore),
                sessions: Arc::new(MemorySessionStore::default()),
                recovery: Arc::clone(&recovery) as Arc<dyn RecoveryStore>,
                clock: Arc::new(FixedClock),
                ids: Arc::new(SeqIds),
                status: Arc::new(StatusSpy::default()),
            });
            engine.start("left behind", RecordingOptions::default()).await.unwrap();
            // the engine is dropped mid-recording: checkpoint stays
        }

        let engine = RecordingEngine::spawn(deps);
        let err = engine
            .start("fresh", RecordingOptions::default())
            .await
            .unwrap_err();
        match err {
            StartError::RecoveryAvailable(cp) => {
                assert_eq!(cp.session_name.as_str(), "left behind");
            }
            other => panic!("expected RecoveryAvailable, got {other:?}"),
        }

        assert!(engine.clear_recovery_state().await);
        engine.start("fresh", RecordingOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn recover_adopts_checkpoint_identity() {
        let (deps, recovery, _) = deps();
        let name = SessionName::new("Campaign 5").unwrap();
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 20, 0, 0).unwrap();
        recovery
            .put(&RecoveryCheckpoint {
                session_name: name.clone(),
                start_time: start,
                duration_seconds: 30,
                is_paused: false,
                current_segment_ref: None,
                metadata: SessionMetadata {
                    session_name: name,
                    start_time: start,
                    duration_seconds: 30,
                    file_size_bytes: 4096,
                    format: crate::domain::session::AudioFormat::Wav,
                    quality_kbps: 320,
                },
            })
            .await
            .unwrap();

        let engine = RecordingEngine::spawn(deps);
        engine.recover(RecordingOptions::default()).await.unwrap();
        assert_eq!(engine.state().await, RecorderState::Recording);

        let metadata = engine.stop().await.unwrap();
        assert_eq!(metadata.session_name.as_str(), "Campaign 5");
        assert!(metadata.duration_seconds >= 30);
        assert!(recovery.slot.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn recover_without_checkpoint_fails() {
        let (deps, _, _) = deps();
        let engine = RecordingEngine::spawn(deps);
        assert!(matches!(
            engine.recover(RecordingOptions::default()).await,
            Err(StartError::NothingToRecover)
        ));
    }

    #[tokio::test]
    async fn force_stop_always_lands_idle() {
        let (deps, recovery, _) = deps();
        let engine = RecordingEngine::spawn(deps);

        engine.start("stuck", RecordingOptions::default()).await.unwrap();
        let metadata = engine.force_stop().await.expect("metadata");
        assert_eq!(metadata.session_name.as_str(), "stuck");
        assert_eq!(engine.state().await, RecorderState::Idle);
        assert!(recovery.slot.lock().unwrap().is_none());
    }
}
