//! Opus/Ogg encoder for the compressed container
//!
//! Each timeslice of captured audio becomes a self-contained Ogg
//! Opus stream; concatenating the chunks yields a chained Ogg file,
//! which is the documented container for sequential streams. Opus
//! only operates in the 48 kHz family, so the 44.1 kHz capture is
//! resampled per block before encoding.

use std::io::Cursor;

use async_trait::async_trait;
use ogg::writing::{PacketWriteEndInfo, PacketWriter};
use rubato::{FftFixedIn, Resampler};

use crate::application::ports::{AudioEncoder, EncoderError, PcmFrame};

/// Opus operating sample rate
pub const OPUS_SAMPLE_RATE: u32 = 48_000;

/// Opus frame size in samples per channel (20 ms at 48 kHz)
pub const FRAME_SIZE: usize = 960;

const CHANNELS: usize = 2;

/// Resampler block size in frames
const RESAMPLE_BLOCK: usize = 1024;

pub struct OpusChunkEncoder {
    input_rate: u32,
    quality_kbps: u32,
    /// Interleaved input samples per emitted chunk
    samples_per_slice: usize,
    buffer: Vec<i16>,
    serial: u32,
}

impl OpusChunkEncoder {
    pub fn new(
        input_rate: u32,
        quality_kbps: u32,
        timeslice_millis: u64,
    ) -> Result<Self, EncoderError> {
        // Probe the codec once so constraint problems surface at
        // creation rather than on the first frame.
        opus::Encoder::new(OPUS_SAMPLE_RATE, opus::Channels::Stereo, opus::Application::Audio)
            .map_err(|e| EncoderError::ConstraintFailed(e.to_string()))?;

        let per_second = input_rate as usize * CHANNELS;
        let samples_per_slice = (per_second as u64 * timeslice_millis / 1000).max(1) as usize;
        Ok(Self {
            input_rate,
            quality_kbps,
            samples_per_slice,
            buffer: Vec::new(),
            serial: initial_serial(),
        })
    }

    fn encode_block(&mut self, samples: &[i16]) -> Result<Vec<u8>, EncoderError> {
        let resampled = if self.input_rate == OPUS_SAMPLE_RATE {
            samples.to_vec()
        } else {
            resample_interleaved(samples, self.input_rate, OPUS_SAMPLE_RATE)?
        };

        let mut encoder = opus::Encoder::new(
            OPUS_SAMPLE_RATE,
            opus::Channels::Stereo,
            opus::Application::Audio,
        )
        .map_err(|e| EncoderError::Internal(e.to_string()))?;
        encoder
            .set_bitrate(opus::Bitrate::Bits(self.quality_kbps as i32 * 1000))
            .map_err(|e| EncoderError::Internal(e.to_string()))?;
        encoder
            .set_vbr(true)
            .map_err(|e| EncoderError::Internal(e.to_string()))?;

        let serial = self.serial;
        self.serial = self.serial.wrapping_add(1);

        let mut ogg_data = Vec::new();
        {
            let mut writer = PacketWriter::new(Cursor::new(&mut ogg_data));
            write_opus_headers(&mut writer, serial)?;

            let interleaved_frame = FRAME_SIZE * CHANNELS;
            let frame_count = resampled.len().div_ceil(interleaved_frame).max(1);
            let mut granule: u64 = 0;

            for (index, chunk) in resampled
                .chunks(interleaved_frame)
                .chain(resampled.is_empty().then_some([].as_slice()))
                .enumerate()
            {
                let frame = if chunk.len() < interleaved_frame {
                    let mut padded = vec![0i16; interleaved_frame];
                    padded[..chunk.len()].copy_from_slice(chunk);
                    padded
                } else {
                    chunk.to_vec()
                };

                let mut packet = vec![0u8; 4000];
                let len = encoder
                    .encode(&frame, &mut packet)
                    .map_err(|e| EncoderError::Internal(e.to_string()))?;
                packet.truncate(len);

                granule += FRAME_SIZE as u64;
                let end_info = if index + 1 == frame_count {
                    PacketWriteEndInfo::EndStream
                } else {
                    PacketWriteEndInfo::NormalPacket
                };

                writer
                    .write_packet(packet, serial, end_info, granule)
                    .map_err(|e| EncoderError::Internal(e.to_string()))?;
            }
        }

        Ok(ogg_data)
    }
}

#[async_trait]
impl AudioEncoder for OpusChunkEncoder {
    fn push(&mut self, frame: &PcmFrame) -> Result<Option<Vec<u8>>, EncoderError> {
        if frame.channels as usize != CHANNELS || frame.sample_rate != self.input_rate {
            return Err(EncoderError::ConstraintFailed(format!(
                "expected {} Hz / {} ch, got {} Hz / {} ch",
                self.input_rate, CHANNELS, frame.sample_rate, frame.channels
            )));
        }

        self.buffer.extend_from_slice(&frame.samples);
        if self.buffer.len() < self.samples_per_slice {
            return Ok(None);
        }

        let block: Vec<i16> = self.buffer.drain(..self.samples_per_slice).collect();
        self.encode_block(&block).map(Some)
    }

    async fn finish(mut self: Box<Self>) -> Result<Vec<u8>, EncoderError> {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }
        let block = std::mem::take(&mut self.buffer);
        self.encode_block(&block)
    }
}

/// Opus identification and comment headers (required by RFC 7845).
fn write_opus_headers<W: std::io::Write>(
    writer: &mut PacketWriter<W>,
    serial: u32,
) -> Result<(), EncoderError> {
    let mut id_header = Vec::with_capacity(19);
    id_header.extend_from_slice(b"OpusHead");
    id_header.push(1); // version
    id_header.push(CHANNELS as u8);
    id_header.extend_from_slice(&0u16.to_le_bytes()); // pre-skip
    id_header.extend_from_slice(&OPUS_SAMPLE_RATE.to_le_bytes());
    id_header.extend_from_slice(&0i16.to_le_bytes()); // output gain
    id_header.push(0); // channel mapping family

    writer
        .write_packet(id_header, serial, PacketWriteEndInfo::EndPage, 0)
        .map_err(|e| EncoderError::Internal(e.to_string()))?;

    let mut comment_header = Vec::new();
    comment_header.extend_from_slice(b"OpusTags");
    let vendor = b"tavern-tapes";
    comment_header.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    comment_header.extend_from_slice(vendor);
    comment_header.extend_from_slice(&0u32.to_le_bytes()); // no user comments

    writer
        .write_packet(comment_header, serial, PacketWriteEndInfo::EndPage, 0)
        .map_err(|e| EncoderError::Internal(e.to_string()))?;

    Ok(())
}

/// Resample interleaved stereo between fixed rates.
fn resample_interleaved(
    samples: &[i16],
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<i16>, EncoderError> {
    // deinterleave into planar f32
    let frames = samples.len() / CHANNELS;
    let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); CHANNELS];
    for frame in samples.chunks_exact(CHANNELS) {
        for (channel, &sample) in frame.iter().enumerate() {
            planar[channel].push(f32::from(sample) / 32768.0);
        }
    }

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLE_BLOCK,
        2,
        CHANNELS,
    )
    .map_err(|e| EncoderError::Internal(format!("resampler init failed: {e}")))?;

    let mut out: Vec<Vec<f32>> = vec![Vec::new(); CHANNELS];
    let mut position = 0;
    while position < frames {
        let needed = resampler.input_frames_next();
        let end = (position + needed).min(frames);

        let mut block: Vec<Vec<f32>> = planar
            .iter()
            .map(|ch| ch[position..end].to_vec())
            .collect();
        for channel in &mut block {
            channel.resize(needed, 0.0);
        }

        let resampled = resampler
            .process(&block, None)
            .map_err(|e| EncoderError::Internal(format!("resampling failed: {e}")))?;
        for (channel, data) in out.iter_mut().zip(resampled) {
            channel.extend(data);
        }
        position = end;
    }

    // re-interleave
    let out_frames = out[0].len();
    let mut interleaved = Vec::with_capacity(out_frames * CHANNELS);
    for i in 0..out_frames {
        for channel in &out {
            interleaved.push((channel[i] * 32767.0).clamp(-32768.0, 32767.0) as i16);
        }
    }
    Ok(interleaved)
}

/// Distinct starting serial per encoder instance; chained streams
/// within a segment increment from here.
fn initial_serial() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (duration.as_secs() as u32) ^ duration.subsec_nanos()
}
