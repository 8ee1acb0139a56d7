//! Audio adapters: capture device and encoders

pub mod cpal_device;
pub mod opus_encoder;
pub mod wav_encoder;

use std::time::Duration;

use crate::application::ports::{
    AudioEncoder, EncoderError, EncoderFactory, CHANNELS, SAMPLE_RATE,
};
use crate::domain::session::AudioFormat;

pub use cpal_device::CpalDevicePort;
pub use opus_encoder::OpusChunkEncoder;
pub use wav_encoder::WavEncoder;

/// Creates the encoder matching the configured container.
pub struct CodecFactory;

impl CodecFactory {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CodecFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderFactory for CodecFactory {
    fn create(
        &self,
        format: AudioFormat,
        quality_kbps: u32,
        timeslice: Duration,
    ) -> Result<Box<dyn AudioEncoder>, EncoderError> {
        let timeslice_millis = timeslice.as_millis().max(1) as u64;
        match format {
            AudioFormat::Wav => Ok(Box::new(WavEncoder::new(
                SAMPLE_RATE,
                CHANNELS,
                timeslice_millis,
            ))),
            AudioFormat::Compressed => Ok(Box::new(OpusChunkEncoder::new(
                SAMPLE_RATE,
                quality_kbps,
                timeslice_millis,
            )?)),
            AudioFormat::Unknown => Err(EncoderError::ConstraintFailed(
                "cannot encode to an unknown container".to_string(),
            )),
        }
    }
}
