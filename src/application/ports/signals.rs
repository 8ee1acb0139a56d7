//! Host signal ports

use async_trait::async_trait;

/// Delivers a "save now" notification shortly before the host
/// terminates the process. The engine answers with one synchronous
/// checkpoint write.
#[async_trait]
pub trait CrashSignalPort: Send {
    /// Resolves when the host signals imminent termination.
    async fn recv(&mut self);
}

/// Lets the host mirror recording state (tray icon, power-save
/// inhibition). Called on every live/idle boundary.
pub trait RecordingStatusPort: Send + Sync {
    fn recording_changed(&self, is_recording: bool);
}
