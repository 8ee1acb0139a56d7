//! Streaming WAV encoder
//!
//! Emits the RIFF header with the streaming (unknown-size) length
//! convention in the first chunk, then raw little-endian PCM. Sizes
//! are never patched afterwards, so every chunk boundary is a
//! container-valid prefix and the concatenation of all chunks equals
//! the final blob byte for byte.

use async_trait::async_trait;

use crate::application::ports::{AudioEncoder, EncoderError, PcmFrame};

/// RIFF/data length marker for streams of unknown final size
const STREAMING_SIZE: u32 = u32::MAX;

const BITS_PER_SAMPLE: u16 = 16;

pub struct WavEncoder {
    sample_rate: u32,
    channels: u16,
    /// Interleaved samples per emitted chunk
    samples_per_slice: usize,
    pending: Vec<u8>,
    pending_samples: usize,
    header_written: bool,
}

impl WavEncoder {
    pub fn new(sample_rate: u32, channels: u16, timeslice_millis: u64) -> Self {
        let per_second = sample_rate as usize * channels as usize;
        let samples_per_slice = (per_second as u64 * timeslice_millis / 1000).max(1) as usize;
        Self {
            sample_rate,
            channels,
            samples_per_slice,
            pending: Vec::new(),
            pending_samples: 0,
            header_written: false,
        }
    }

    /// Canonical 44-byte RIFF/WAVE header for 16-bit PCM.
    fn header(&self) -> Vec<u8> {
        let byte_rate = self.sample_rate * u32::from(self.channels) * u32::from(BITS_PER_SAMPLE) / 8;
        let block_align = self.channels * BITS_PER_SAMPLE / 8;

        let mut header = Vec::with_capacity(44);
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&STREAMING_SIZE.to_le_bytes());
        header.extend_from_slice(b"WAVE");
        header.extend_from_slice(b"fmt ");
        header.extend_from_slice(&16u32.to_le_bytes());
        header.extend_from_slice(&1u16.to_le_bytes()); // PCM
        header.extend_from_slice(&self.channels.to_le_bytes());
        header.extend_from_slice(&self.sample_rate.to_le_bytes());
        header.extend_from_slice(&byte_rate.to_le_bytes());
        header.extend_from_slice(&block_align.to_le_bytes());
        header.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
        header.extend_from_slice(b"data");
        header.extend_from_slice(&STREAMING_SIZE.to_le_bytes());
        header
    }
}

#[async_trait]
impl AudioEncoder for WavEncoder {
    fn push(&mut self, frame: &PcmFrame) -> Result<Option<Vec<u8>>, EncoderError> {
        if frame.sample_rate != self.sample_rate || frame.channels != self.channels {
            return Err(EncoderError::ConstraintFailed(format!(
                "expected {} Hz / {} ch, got {} Hz / {} ch",
                self.sample_rate, self.channels, frame.sample_rate, frame.channels
            )));
        }

        if !self.header_written {
            self.pending = self.header();
            self.header_written = true;
        }

        self.pending.reserve(frame.samples.len() * 2);
        for sample in &frame.samples {
            self.pending.extend_from_slice(&sample.to_le_bytes());
        }
        self.pending_samples += frame.samples.len();

        if self.pending_samples >= self.samples_per_slice {
            self.pending_samples = 0;
            Ok(Some(std::mem::take(&mut self.pending)))
        } else {
            Ok(None)
        }
    }

    async fn finish(self: Box<Self>) -> Result<Vec<u8>, EncoderError> {
        Ok(self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: Vec<i16>) -> PcmFrame {
        PcmFrame {
            samples,
            sample_rate: 44_100,
            channels: 2,
        }
    }

    fn tenth_second() -> PcmFrame {
        frame(vec![100i16; 8820])
    }

    #[tokio::test]
    async fn first_chunk_starts_with_riff_header() {
        let mut encoder = WavEncoder::new(44_100, 2, 1000);
        let mut chunk = None;
        for _ in 0..10 {
            chunk = encoder.push(&tenth_second()).unwrap();
            if chunk.is_some() {
                break;
            }
        }
        let chunk = chunk.expect("one second of audio yields a chunk");
        assert_eq!(&chunk[0..4], b"RIFF");
        assert_eq!(&chunk[8..12], b"WAVE");
        assert_eq!(&chunk[12..16], b"fmt ");
        assert_eq!(&chunk[36..40], b"data");
        // streaming length markers
        assert_eq!(chunk[4..8], u32::MAX.to_le_bytes());
        assert_eq!(chunk[40..44], u32::MAX.to_le_bytes());
    }

    #[tokio::test]
    async fn chunk_cadence_is_one_timeslice() {
        let mut encoder = WavEncoder::new(44_100, 2, 1000);
        let mut chunks = 0;
        for _ in 0..25 {
            if encoder.push(&tenth_second()).unwrap().is_some() {
                chunks += 1;
            }
        }
        // 2.5 s of audio at a 1 s timeslice
        assert_eq!(chunks, 2);
    }

    #[tokio::test]
    async fn concatenation_is_header_plus_all_samples() {
        let mut encoder = WavEncoder::new(44_100, 2, 1000);
        let mut blob = Vec::new();
        for _ in 0..15 {
            if let Some(chunk) = encoder.push(&tenth_second()).unwrap() {
                blob.extend(chunk);
            }
        }
        blob.extend(Box::new(encoder).finish().await.unwrap());

        let total_samples = 8820 * 15;
        assert_eq!(blob.len(), 44 + total_samples * 2);
        // sample bytes survive verbatim
        assert_eq!(&blob[44..46], &100i16.to_le_bytes());
    }

    #[tokio::test]
    async fn empty_stream_finishes_empty() {
        let encoder = WavEncoder::new(44_100, 2, 1000);
        let tail = Box::new(encoder).finish().await.unwrap();
        assert!(tail.is_empty());
    }

    #[tokio::test]
    async fn mismatched_frame_is_rejected() {
        let mut encoder = WavEncoder::new(44_100, 2, 1000);
        let bad = PcmFrame {
            samples: vec![0i16; 100],
            sample_rate: 48_000,
            channels: 2,
        };
        assert!(matches!(
            encoder.push(&bad),
            Err(EncoderError::ConstraintFailed(_))
        ));
    }
}
