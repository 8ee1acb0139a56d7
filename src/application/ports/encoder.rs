//! Encoder port

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::device::PcmFrame;
use crate::domain::session::AudioFormat;

/// Default chunk cadence
pub const DEFAULT_TIMESLICE: Duration = Duration::from_secs(1);

/// Encoder failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncoderError {
    #[error("Audio device dropped mid-stream")]
    DeviceDropped,

    #[error("Encoder cannot satisfy the requested constraints: {0}")]
    ConstraintFailed(String),

    #[error("Encoder failure: {0}")]
    Internal(String),
}

/// One live encoder instance, bound to a single segment.
///
/// Frames go in; roughly every timeslice of accumulated audio comes
/// back out as an encoded chunk. For WAV the chunk sequence forms
/// container-valid prefixes; for the compressed container chunks are
/// frame-aligned and concatenate to the final blob.
#[async_trait]
pub trait AudioEncoder: Send + Sync {
    /// Feed one PCM frame. Returns an encoded chunk whenever a full
    /// timeslice has accumulated.
    fn push(&mut self, frame: &PcmFrame) -> Result<Option<Vec<u8>>, EncoderError>;

    /// Finalize the stream and return the remaining tail bytes. The
    /// tail may be empty when no audio arrived since the last chunk.
    async fn finish(self: Box<Self>) -> Result<Vec<u8>, EncoderError>;
}

/// Creates encoders; one per segment.
pub trait EncoderFactory: Send + Sync {
    fn create(
        &self,
        format: AudioFormat,
        quality_kbps: u32,
        timeslice: Duration,
    ) -> Result<Box<dyn AudioEncoder>, EncoderError>;
}
