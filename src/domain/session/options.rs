//! Recording options value object

use serde::{Deserialize, Serialize};

use super::metadata::AudioFormat;
use crate::domain::error::OptionsError;

pub const MIN_QUALITY_KBPS: u32 = 64;
pub const MAX_QUALITY_KBPS: u32 = 320;
pub const QUALITY_STEP_KBPS: u32 = 32;
pub const MIN_SPLIT_INTERVAL_MIN: u32 = 1;
pub const MAX_SPLIT_INTERVAL_MIN: u32 = 120;
pub const MIN_SPLIT_SIZE_MB: u64 = 1;

/// Options a recording is started with.
///
/// Either split trigger may be unset; when both are set, whichever
/// fires first ends the segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingOptions {
    pub format: AudioFormat,
    pub quality_kbps: u32,
    pub split_interval_minutes: Option<u32>,
    pub split_size_mb: Option<u64>,
    pub input_device_id: Option<String>,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            format: AudioFormat::Wav,
            quality_kbps: MAX_QUALITY_KBPS,
            split_interval_minutes: Some(30),
            split_size_mb: Some(500),
            input_device_id: None,
        }
    }
}

impl RecordingOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.quality_kbps < MIN_QUALITY_KBPS
            || self.quality_kbps > MAX_QUALITY_KBPS
            || (self.quality_kbps - MIN_QUALITY_KBPS) % QUALITY_STEP_KBPS != 0
        {
            return Err(OptionsError::QualityOutOfRange {
                value: self.quality_kbps,
                min: MIN_QUALITY_KBPS,
                max: MAX_QUALITY_KBPS,
                step: QUALITY_STEP_KBPS,
            });
        }
        if let Some(minutes) = self.split_interval_minutes {
            if !(MIN_SPLIT_INTERVAL_MIN..=MAX_SPLIT_INTERVAL_MIN).contains(&minutes) {
                return Err(OptionsError::SplitIntervalOutOfRange {
                    value: minutes,
                    min: MIN_SPLIT_INTERVAL_MIN,
                    max: MAX_SPLIT_INTERVAL_MIN,
                });
            }
        }
        if let Some(mb) = self.split_size_mb {
            if mb < MIN_SPLIT_SIZE_MB {
                return Err(OptionsError::SplitSizeTooSmall {
                    value: mb,
                    min: MIN_SPLIT_SIZE_MB,
                });
            }
        }
        Ok(())
    }

    /// Split size trigger in bytes, if configured.
    pub fn split_size_bytes(&self) -> Option<u64> {
        self.split_size_mb.map(|mb| mb * 1024 * 1024)
    }

    /// Split interval trigger in seconds, if configured.
    pub fn split_interval_secs(&self) -> Option<u64> {
        self.split_interval_minutes.map(|m| u64::from(m) * 60)
    }
}
