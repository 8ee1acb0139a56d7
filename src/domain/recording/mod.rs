//! Recorder state machine, checkpointing and level metering

pub mod checkpoint;
pub mod level;
pub mod state;

pub use checkpoint::{RecoveryCheckpoint, RECOVERY_WINDOW_HOURS};
pub use level::{LevelMeter, LevelReading, SILENCE_MILLIS};
pub use state::{IllegalTransition, Recorder, RecorderState};
