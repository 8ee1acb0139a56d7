//! Recorder state machine

use std::fmt;

use thiserror::Error;

/// States of the recording engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecorderState {
    #[default]
    Idle,
    Starting,
    Recording,
    Paused,
    Splitting,
    Stopping,
    Failed,
}

impl RecorderState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Recording => "recording",
            Self::Paused => "paused",
            Self::Splitting => "splitting",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }

    /// True while a session is live (a checkpoint slot exists).
    pub const fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Recording | Self::Paused | Self::Splitting | Self::Stopping
        )
    }
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error when an invalid state transition is attempted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot {action} while {current_state}")]
pub struct IllegalTransition {
    pub current_state: RecorderState,
    pub action: &'static str,
}

/// Recorder lifecycle entity.
///
/// State machine:
///   IDLE -> STARTING -> RECORDING        (start, device-ready)
///   RECORDING <-> PAUSED                 (pause, resume)
///   RECORDING -> SPLITTING -> RECORDING  (split-trigger, segment-finalized)
///   RECORDING | PAUSED -> STOPPING -> IDLE
///   any -> FAILED -> IDLE                (fatal error, cleanup)
///   IDLE -> RECORDING                    (recover from checkpoint)
#[derive(Debug, Default)]
pub struct Recorder {
    state: RecorderState,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            state: RecorderState::Idle,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    fn expect(
        &mut self,
        action: &'static str,
        allowed: &[RecorderState],
        next: RecorderState,
    ) -> Result<(), IllegalTransition> {
        if allowed.contains(&self.state) {
            self.state = next;
            Ok(())
        } else {
            Err(IllegalTransition {
                current_state: self.state,
                action,
            })
        }
    }

    pub fn begin_start(&mut self) -> Result<(), IllegalTransition> {
        self.expect("start", &[RecorderState::Idle], RecorderState::Starting)
    }

    pub fn device_ready(&mut self) -> Result<(), IllegalTransition> {
        self.expect(
            "acquire device",
            &[RecorderState::Starting],
            RecorderState::Recording,
        )
    }

    pub fn pause(&mut self) -> Result<(), IllegalTransition> {
        self.expect("pause", &[RecorderState::Recording], RecorderState::Paused)
    }

    pub fn resume(&mut self) -> Result<(), IllegalTransition> {
        self.expect("resume", &[RecorderState::Paused], RecorderState::Recording)
    }

    pub fn begin_split(&mut self) -> Result<(), IllegalTransition> {
        self.expect(
            "split",
            &[RecorderState::Recording],
            RecorderState::Splitting,
        )
    }

    pub fn split_done(&mut self) -> Result<(), IllegalTransition> {
        self.expect(
            "finish split",
            &[RecorderState::Splitting],
            RecorderState::Recording,
        )
    }

    pub fn begin_stop(&mut self) -> Result<(), IllegalTransition> {
        self.expect(
            "stop",
            &[RecorderState::Recording, RecorderState::Paused],
            RecorderState::Stopping,
        )
    }

    pub fn stopped(&mut self) -> Result<(), IllegalTransition> {
        self.expect(
            "finish stopping",
            &[RecorderState::Stopping],
            RecorderState::Idle,
        )
    }

    pub fn recover(&mut self) -> Result<(), IllegalTransition> {
        self.expect("recover", &[RecorderState::Idle], RecorderState::Recording)
    }

    /// Fatal error from any state.
    pub fn fail(&mut self) {
        self.state = RecorderState::Failed;
    }

    /// Return to idle after a failure has been cleaned up.
    pub fn cleanup(&mut self) -> Result<(), IllegalTransition> {
        self.expect("clean up", &[RecorderState::Failed], RecorderState::Idle)
    }

    /// Forced return to idle regardless of state. Used by the
    /// emergency paths (`force_stop`, stop timeout).
    pub fn force_idle(&mut self) {
        self.state = RecorderState::Idle;
    }
}
