//! Port interfaces (traits) for external systems
//!
//! These traits define the boundaries between the application
//! and infrastructure layers.

pub mod blob_store;
pub mod clock;
pub mod device;
pub mod encoder;
pub mod files;
pub mod recovery_store;
pub mod session_store;
pub mod signals;

// Re-export common types
pub use blob_store::{BlobError, BlobStore};
pub use clock::{Clock, IdGen};
pub use device::{
    DeviceConfig, DeviceError, DeviceEvent, DeviceHandle, DevicePort, InputDeviceInfo, PcmFrame,
    CHANNELS, SAMPLE_RATE,
};
pub use encoder::{AudioEncoder, EncoderError, EncoderFactory, DEFAULT_TIMESLICE};
pub use files::{FileError, FilePort, SelectionError};
pub use recovery_store::{RecoveryStore, RecoveryStoreError};
pub use session_store::{SessionStore, SessionStoreError};
pub use signals::{CrashSignalPort, RecordingStatusPort};
