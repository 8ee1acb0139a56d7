//! Cross-platform audio input using cpal
//!
//! The cpal stream is not Send, so each open device lives on its own
//! thread; frames cross into the async world over a bounded channel.
//! Closing the returned handle flips a stop flag that ends the
//! thread and drops the stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use crate::application::ports::{
    DeviceConfig, DeviceError, DeviceEvent, DeviceHandle, DevicePort, InputDeviceInfo, PcmFrame,
};

/// Frames buffered between the driver thread and the engine task
const FRAME_CHANNEL_CAPACITY: usize = 256;

pub struct CpalDevicePort;

impl CpalDevicePort {
    pub fn new() -> Self {
        Self
    }

    fn find_device(device_id: Option<&str>) -> Result<cpal::Device, DeviceError> {
        let host = cpal::default_host();
        match device_id {
            None => host.default_input_device().ok_or(DeviceError::NoInputDevice),
            Some(wanted) => {
                let devices = host
                    .input_devices()
                    .map_err(|e| DeviceError::DeviceLost(e.to_string()))?;
                for device in devices {
                    if device.name().map(|n| n == wanted).unwrap_or(false) {
                        return Ok(device);
                    }
                }
                Err(DeviceError::NoInputDevice)
            }
        }
    }

    /// Pick a stream config honoring the requested rate and channel
    /// count, in i16 or f32 sample format.
    fn stream_config(
        device: &cpal::Device,
        requested: &DeviceConfig,
    ) -> Result<(StreamConfig, SampleFormat), DeviceError> {
        let supported = device
            .supported_input_configs()
            .map_err(|e| DeviceError::ConstraintsUnsatisfiable(e.to_string()))?;

        let mut fallback: Option<cpal::SupportedStreamConfigRange> = None;
        for config in supported {
            if config.sample_format() != SampleFormat::I16
                && config.sample_format() != SampleFormat::F32
            {
                continue;
            }
            if config.channels() != requested.channels {
                continue;
            }
            let covers_rate = config.min_sample_rate().0 <= requested.sample_rate
                && config.max_sample_rate().0 >= requested.sample_rate;
            if covers_rate {
                let sample_format = config.sample_format();
                let stream = StreamConfig {
                    channels: requested.channels,
                    sample_rate: SampleRate(requested.sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };
                return Ok((stream, sample_format));
            }
            fallback.get_or_insert(config);
        }

        match fallback {
            Some(_) => Err(DeviceError::ConstraintsUnsatisfiable(format!(
                "device does not support {} Hz",
                requested.sample_rate
            ))),
            None => Err(DeviceError::ConstraintsUnsatisfiable(format!(
                "no {}-channel input config available",
                requested.channels
            ))),
        }
    }
}

impl Default for CpalDevicePort {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DevicePort for CpalDevicePort {
    async fn enumerate_inputs(&self) -> Result<Vec<InputDeviceInfo>, DeviceError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| DeviceError::DeviceLost(e.to_string()))?;
        let mut inputs = Vec::new();
        for device in devices {
            match device.name() {
                Ok(name) => inputs.push(InputDeviceInfo {
                    id: name.clone(),
                    label: name,
                }),
                Err(err) => warn!(error = %err, "skipping unnamed input device"),
            }
        }
        Ok(inputs)
    }

    async fn open(&self, config: DeviceConfig) -> Result<DeviceHandle, DeviceError> {
        let (event_tx, event_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), DeviceError>>();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        std::thread::spawn(move || {
            let device = match CpalDevicePort::find_device(config.device_id.as_deref()) {
                Ok(device) => device,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            let (stream_config, sample_format) =
                match CpalDevicePort::stream_config(&device, &config) {
                    Ok(pair) => pair,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

            let sample_rate = stream_config.sample_rate.0;
            let channels = stream_config.channels;
            let data_tx = event_tx.clone();
            let error_tx = event_tx.clone();

            let send_frame = move |samples: Vec<i16>| {
                let frame = PcmFrame {
                    samples,
                    sample_rate,
                    channels,
                };
                // Never block inside the driver callback. A full
                // channel means the consumer is stalled; dropping the
                // frame is the only safe move here.
                if let Err(mpsc::error::TrySendError::Full(_)) =
                    data_tx.try_send(DeviceEvent::Frame(frame))
                {
                    warn!("frame channel full, dropping audio frame");
                }
            };

            let error_callback = move |err: cpal::StreamError| {
                error!(error = %err, "audio stream error");
                let _ = error_tx.try_send(DeviceEvent::Lost(err.to_string()));
            };

            let stream_result = match sample_format {
                SampleFormat::I16 => {
                    let send_frame = send_frame.clone();
                    device.build_input_stream(
                        &stream_config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            send_frame(data.to_vec());
                        },
                        error_callback,
                        None,
                    )
                }
                SampleFormat::F32 => device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let samples: Vec<i16> = data
                            .iter()
                            .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
                            .collect();
                        send_frame(samples);
                    },
                    error_callback,
                    None,
                ),
                other => {
                    let _ = ready_tx.send(Err(DeviceError::ConstraintsUnsatisfiable(format!(
                        "unsupported sample format {other:?}"
                    ))));
                    return;
                }
            };

            let stream = match stream_result {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = ready_tx.send(Err(map_build_error(err)));
                    return;
                }
            };

            if let Err(err) = stream.play() {
                let _ = ready_tx.send(Err(DeviceError::DeviceLost(err.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            while !stop_flag.load(Ordering::SeqCst) {
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
            drop(stream);
        });

        ready_rx
            .await
            .map_err(|_| DeviceError::DeviceLost("device thread exited".to_string()))??;

        let handle = DeviceHandle::new(
            event_rx,
            Box::new(move || stop.store(true, Ordering::SeqCst)),
        );
        Ok(handle)
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> DeviceError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            DeviceError::DeviceLost("device not available".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported => {
            DeviceError::ConstraintsUnsatisfiable("stream config not supported".to_string())
        }
        other => DeviceError::DeviceLost(other.to_string()),
    }
}
