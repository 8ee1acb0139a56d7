//! Input level meter with dynamic silence detection

use std::collections::VecDeque;

/// Number of recent loudness samples the meter remembers
pub const RING_CAPACITY: usize = 100;

/// Silence must persist this long before the signal is raised
pub const SILENCE_MILLIS: u64 = 5_000;

/// Floor for the dynamic silence threshold
pub const THRESHOLD_FLOOR: f32 = 0.005;

/// One meter observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelReading {
    /// Normalized loudness, 0..1
    pub level: f32,
    /// True exactly once when sustained silence is first detected
    pub silence_detected: bool,
}

/// Measures loudness from a tap of the PCM stream.
///
/// Keeps a ring of the last [`RING_CAPACITY`] readings; the silence
/// threshold adapts to `max(0.005, 0.1 * mean(ring))`. The meter is
/// advisory only and never feeds back into segmentation or duration.
#[derive(Debug)]
pub struct LevelMeter {
    ring: VecDeque<f32>,
    silence_millis: u64,
    silence_raised: bool,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelMeter {
    pub fn new() -> Self {
        Self {
            ring: VecDeque::with_capacity(RING_CAPACITY),
            silence_millis: 0,
            silence_raised: false,
        }
    }

    /// Feed one frame of interleaved samples covering `frame_millis`
    /// of audio.
    pub fn observe(&mut self, samples: &[i16], frame_millis: u64) -> LevelReading {
        let level = rms_level(samples);

        if self.ring.len() == RING_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(level);

        let mut silence_detected = false;
        if level < self.threshold() {
            self.silence_millis = self.silence_millis.saturating_add(frame_millis);
            if self.silence_millis >= SILENCE_MILLIS && !self.silence_raised {
                self.silence_raised = true;
                silence_detected = true;
            }
        } else {
            self.silence_millis = 0;
            self.silence_raised = false;
        }

        LevelReading {
            level,
            silence_detected,
        }
    }

    /// Dynamic threshold below which audio counts as silent.
    pub fn threshold(&self) -> f32 {
        if self.ring.is_empty() {
            return THRESHOLD_FLOOR;
        }
        let avg: f32 = self.ring.iter().sum::<f32>() / self.ring.len() as f32;
        (0.1 * avg).max(THRESHOLD_FLOOR)
    }

    /// Clear silence accounting; called on pause and on leaving the
    /// recording state.
    pub fn reset_silence(&mut self) {
        self.silence_millis = 0;
        self.silence_raised = false;
    }
}

/// Root-mean-square of the frame, normalized to 0..1.
fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = f64::from(s);
            v * v
        })
        .sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    (rms / f64::from(i16::MAX)) as f32
}
