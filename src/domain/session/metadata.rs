//! Session metadata value objects

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::name::SessionName;

/// Container the encoder produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// Uncompressed PCM in a RIFF/WAVE container
    #[default]
    Wav,
    /// Opus in an Ogg container at the configured bitrate
    Compressed,
    /// Placeholder used in synthetic metadata when a recording could
    /// not be finalized normally
    Unknown,
}

impl AudioFormat {
    /// File extension used on export.
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Compressed => "ogg",
            Self::Unknown => "bin",
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Compressed => "compressed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wav" => Ok(Self::Wav),
            "compressed" | "ogg" | "opus" => Ok(Self::Compressed),
            other => Err(format!("unknown audio format \"{}\"", other)),
        }
    }
}

/// Snapshot of a recording's accounting at a point in time.
///
/// `duration_seconds` counts active (non-paused) wall seconds since
/// start and never decreases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_name: SessionName,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    pub duration_seconds: u64,
    pub file_size_bytes: u64,
    pub format: AudioFormat,
    pub quality_kbps: u32,
}

impl SessionMetadata {
    /// Best-effort metadata for a recording whose real accounting was
    /// lost (encoder failure, forced stop).
    pub fn synthetic(
        session_name: SessionName,
        start_time: DateTime<Utc>,
        duration_seconds: u64,
    ) -> Self {
        Self {
            session_name,
            start_time,
            duration_seconds,
            file_size_bytes: 0,
            format: AudioFormat::Unknown,
            quality_kbps: 0,
        }
    }
}
