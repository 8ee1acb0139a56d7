//! Audio input device port

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Sample rate requested from every input device
pub const SAMPLE_RATE: u32 = 44_100;

/// Channel count requested from every input device
pub const CHANNELS: u16 = 2;

/// Device acquisition and streaming errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("No audio input device available")]
    NoInputDevice,

    #[error("Device cannot satisfy the requested constraints: {0}")]
    ConstraintsUnsatisfiable(String),

    #[error("Audio device lost: {0}")]
    DeviceLost(String),
}

/// One enumerable input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDeviceInfo {
    pub id: String,
    pub label: String,
}

/// Constraints a device is opened with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Processing hints; drivers are free to ignore them
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// None selects the host default input
    pub device_id: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            device_id: None,
        }
    }
}

/// A block of interleaved signed PCM samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFrame {
    /// Audio this frame covers, in milliseconds.
    pub fn duration_millis(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let frames = self.samples.len() as u64 / u64::from(self.channels);
        frames * 1000 / u64::from(self.sample_rate)
    }
}

/// What an open device delivers on its stream.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Frame(PcmFrame),
    /// The driver dropped the stream; no more frames will arrive
    Lost(String),
}

/// Handle to an open capture stream. Closing (or dropping) the handle
/// releases the device.
pub struct DeviceHandle {
    events: mpsc::Receiver<DeviceEvent>,
    shutdown: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl DeviceHandle {
    pub fn new(
        events: mpsc::Receiver<DeviceEvent>,
        shutdown: Box<dyn FnOnce() + Send + Sync>,
    ) -> Self {
        Self {
            events,
            shutdown: Some(shutdown),
        }
    }

    /// Next frame or loss notification; `None` once the stream ends.
    pub async fn next_event(&mut self) -> Option<DeviceEvent> {
        self.events.recv().await
    }

    /// Stop capture and release the device.
    pub fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown();
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown();
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle").finish_non_exhaustive()
    }
}

/// Port for the host audio system.
#[async_trait]
pub trait DevicePort: Send + Sync {
    /// List available input devices.
    async fn enumerate_inputs(&self) -> Result<Vec<InputDeviceInfo>, DeviceError>;

    /// Open a capture stream with the given constraints. The device
    /// is owned exclusively by the returned handle.
    async fn open(&self, config: DeviceConfig) -> Result<DeviceHandle, DeviceError>;
}
