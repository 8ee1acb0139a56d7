//! Host signal adapters

use async_trait::async_trait;
use tracing::info;

use crate::application::ports::{CrashSignalPort, RecordingStatusPort};

/// Crash signal backed by the process termination signals. On Unix
/// this listens for SIGTERM and SIGINT; elsewhere Ctrl-C only.
pub struct TerminationSignal;

impl TerminationSignal {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TerminationSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CrashSignalPort for TerminationSignal {
    async fn recv(&mut self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
            tokio::select! {
                _ = term.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

/// Status emitter for hosts without a tray: state changes land in the
/// log.
pub struct LogStatus;

impl RecordingStatusPort for LogStatus {
    fn recording_changed(&self, is_recording: bool) {
        info!(recording = is_recording, "recording status changed");
    }
}
