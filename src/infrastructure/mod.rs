//! Infrastructure layer: adapter implementations

pub mod audio;
pub mod clock;
pub mod files;
pub mod signals;
pub mod store;

pub use audio::{CodecFactory, CpalDevicePort, OpusChunkEncoder, WavEncoder};
pub use clock::{SystemClock, UuidGen};
pub use files::LocalFiles;
pub use signals::{LogStatus, TerminationSignal};
pub use store::{FsBlobStore, FsRecoveryStore, FsSessionStore};
