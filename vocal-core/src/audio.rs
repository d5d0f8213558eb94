//! # Audio Capture Module
//!
//! Microphone capture through CPAL (Cross-Platform Audio Library) and the
//! `SampleBuffer` frames the estimators consume.
//!
//! ## Features
//! - Default or named input device selection
//! - Any channel count, down-mixed to mono
//! - Overlapping frames (50% hop) streamed over a bounded channel
//! - `BufferSource` trait so analysis loops can run on synthetic data

use crate::error::{ConfigError, ConfigResult};
use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{error, info, warn};
use std::time::Duration;

/// Default number of samples per analysis frame (~46ms at 44.1kHz).
pub const BUFFER_SIZE: usize = 2048;

/// Preferred capture rate when the device supports it.
pub const PREFERRED_SAMPLE_RATE: u32 = 44_100;

/// Frames kept in flight between the audio callback and the analysis loop.
const FRAME_QUEUE_DEPTH: usize = 8;

/// One analysis frame of mono samples and the rate they were captured at.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Wraps captured samples. The length must be a non-zero power of two.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> ConfigResult<Self> {
        if samples.is_empty() || !samples.len().is_power_of_two() {
            return Err(ConfigError::InvalidBufferLength(samples.len()));
        }
        if sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        Ok(Self { samples, sample_rate })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Root-mean-square level of the frame.
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }
}

pub(crate) fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Anything that can hand the analysis loop its next frame.
pub trait BufferSource {
    /// Returns the freshest frame, or `None` when nothing arrived before `timeout`
    /// or the source has closed.
    fn next_buffer(&mut self, timeout: Duration) -> Option<SampleBuffer>;
}

/// A live microphone stream. Dropping it stops the stream and releases the device.
pub struct AudioSession {
    stream: cpal::Stream,
    frames: Receiver<Vec<f32>>,
    sample_rate: u32,
    buffer_size: usize,
    device_name: String,
}

impl std::fmt::Debug for AudioSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSession")
            .field("device_name", &self.device_name)
            .field("sample_rate", &self.sample_rate)
            .field("buffer_size", &self.buffer_size)
            .finish_non_exhaustive()
    }
}

impl AudioSession {
    /// Starts capturing from `device_name`, or the host default input when `None`.
    ///
    /// # Arguments
    /// * `device_name` - Exact input device name as reported by [`list_input_devices`]
    /// * `buffer_size` - Samples per frame, a power of two
    pub fn start(device_name: Option<&str>, buffer_size: usize) -> Result<Self> {
        if buffer_size == 0 || !buffer_size.is_power_of_two() {
            return Err(ConfigError::InvalidBufferLength(buffer_size).into());
        }

        let host = cpal::default_host();
        let device = match device_name {
            Some(wanted) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| anyhow!("No input device named {wanted:?}"))?,
            None => host
                .default_input_device()
                .ok_or_else(|| anyhow!("No input device available"))?,
        };
        let device_name = device.name()?;
        info!("Using audio input device: {device_name}");

        let configs = device.supported_input_configs()?.collect::<Vec<_>>();
        let supported_config = find_supported_config(configs, PREFERRED_SAMPLE_RATE)
            .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

        let sample_rate = cpal::SampleRate(
            PREFERRED_SAMPLE_RATE.clamp(
                supported_config.min_sample_rate().0,
                supported_config.max_sample_rate().0,
            ),
        );
        let config: cpal::StreamConfig = supported_config.with_sample_rate(sample_rate).into();
        let channels = config.channels as usize;
        info!("Selected sample rate: {} Hz, {} channel(s)", sample_rate.0, channels);

        let (sender, frames) = crossbeam_channel::bounded(FRAME_QUEUE_DEPTH);
        let mut framer = Framer::new(buffer_size, sender);

        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                framer.push_interleaved(data, channels);
            },
            |err| error!("An error occurred on the audio stream: {err}"),
            None,
        )?;
        stream.play()?;

        Ok(Self {
            stream,
            frames,
            sample_rate: sample_rate.0,
            buffer_size,
            device_name,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Pauses the stream; the device is released when the session drops.
    pub fn stop(self) {
        if let Err(e) = self.stream.pause() {
            warn!("Error pausing stream: {e}");
        }
    }
}

impl BufferSource for AudioSession {
    fn next_buffer(&mut self, timeout: Duration) -> Option<SampleBuffer> {
        let mut latest = match self.frames.recv_timeout(timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Audio frame channel closed");
                return None;
            }
        };
        // Skip frames that piled up while the caller was busy.
        while let Ok(frame) = self.frames.try_recv() {
            latest = frame;
        }
        SampleBuffer::new(latest, self.sample_rate).ok()
    }
}

/// Names of every input device the default host exposes.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let names = host
        .input_devices()?
        .filter_map(|device| device.name().ok())
        .collect();
    Ok(names)
}

/// Accumulates interleaved callback data into overlapping mono frames.
struct Framer {
    buffer_size: usize,
    hop: usize,
    pending: Vec<f32>,
    sender: Sender<Vec<f32>>,
}

impl Framer {
    fn new(buffer_size: usize, sender: Sender<Vec<f32>>) -> Self {
        Self {
            buffer_size,
            hop: (buffer_size / 2).max(1),
            pending: Vec::with_capacity(buffer_size * 2),
            sender,
        }
    }

    fn push_interleaved(&mut self, data: &[f32], channels: usize) {
        if channels <= 1 {
            self.pending.extend_from_slice(data);
        } else {
            self.pending.extend(
                data.chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }

        while self.pending.len() >= self.buffer_size {
            let frame = self.pending[..self.buffer_size].to_vec();
            // Drop the frame if the consumer is behind; it only wants the newest.
            let _ = self.sender.try_send(frame);
            self.pending.drain(..self.hop);
        }
    }
}

/// Picks an f32 input configuration whose rate range sits closest to `target_rate`,
/// preferring fewer channels on ties.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let distance = if target_rate < min {
                min - target_rate
            } else if target_rate > max {
                target_rate - max
            } else {
                0
            };
            (distance, c.channels())
        })
}
