//! Microphone capture
//!
//! The cpal callback downmixes to mono and hands chunks over a bounded
//! channel; a full channel drops the chunk rather than stalling the audio
//! thread.

use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::segmenter::{ListenLimits, collect_utterance};
use super::wav::SAMPLE_RATE;
use crate::{Error, Result};

/// Chunks buffered between the audio thread and the reader
const CHUNK_QUEUE: usize = 64;

/// One open input device, recording while a stream is running
///
/// Dropping it stops the stream and releases the device.
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    chunks: Option<Receiver<Vec<f32>>>,
}

/// Pick an input device by index or by (partial) name
fn select_input(host: &cpal::Host, selector: Option<&str>) -> Result<Device> {
    let Some(selector) = selector.map(str::trim).filter(|s| !s.is_empty()) else {
        return host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()));
    };

    let mut devices = host.input_devices().map_err(|e| Error::Audio(e.to_string()))?;
    if let Ok(index) = selector.parse::<usize>() {
        return devices
            .nth(index)
            .ok_or_else(|| Error::Audio(format!("no input device at index {index}")));
    }

    let wanted = selector.to_lowercase();
    devices
        .find(|d| d.name().is_ok_and(|name| name.to_lowercase().contains(&wanted)))
        .ok_or_else(|| Error::Audio(format!("no input device matching '{selector}'")))
}

/// Names of the available input devices, in index order
///
/// # Errors
///
/// Returns error if the audio host cannot enumerate devices
pub fn input_device_names() -> Result<Vec<String>> {
    let devices = cpal::default_host()
        .input_devices()
        .map_err(|e| Error::Audio(e.to_string()))?;
    Ok(devices.map(|d| d.name().unwrap_or_default()).collect())
}

/// Average interleaved frames down to one channel
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    data.chunks(channels).map(|frame| frame.iter().sum::<f32>() * scale).collect()
}

impl AudioCapture {
    /// Open an input device (the default one when `selector` is `None`)
    ///
    /// Any channel count is accepted; the device must support 16 kHz.
    ///
    /// # Errors
    ///
    /// Returns error if the device is missing or cannot record at 16 kHz
    pub fn open(selector: Option<&str>) -> Result<Self> {
        let device = select_input(&cpal::default_host(), selector)?;

        let range = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| {
                c.sample_format() == cpal::SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| Error::Audio(format!("input device cannot record at {SAMPLE_RATE} Hz")))?;
        let config = range.with_sample_rate(SampleRate(SAMPLE_RATE)).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            channels = config.channels,
            "microphone opened"
        );

        Ok(Self {
            device,
            config,
            stream: None,
            chunks: None,
        })
    }

    /// Start recording
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be started
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let (tx, rx): (SyncSender<Vec<f32>>, _) = sync_channel(CHUNK_QUEUE);
        let channels = usize::from(self.config.channels);
        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Err(TrySendError::Full(_)) = tx.try_send(downmix(data, channels)) {
                        tracing::trace!("capture reader behind, chunk dropped");
                    }
                },
                |err| tracing::error!(error = %err, "microphone stream error"),
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        self.stream = Some(stream);
        self.chunks = Some(rx);
        Ok(())
    }

    /// Stop recording and release the stream
    pub fn stop(&mut self) {
        self.chunks = None;
        if self.stream.take().is_some() {
            tracing::trace!("microphone stream stopped");
        }
    }

    /// Everything recorded since the last read
    #[must_use]
    pub fn drain(&self) -> Vec<f32> {
        let mut samples = Vec::new();
        if let Some(chunks) = &self.chunks {
            for chunk in chunks.try_iter() {
                samples.extend(chunk);
            }
        }
        samples
    }

    /// Record one utterance within `limits`
    ///
    /// Returns `None` when nobody spoke or `cancel` was set. The stream is
    /// stopped before this returns.
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot start or the device goes away
    pub fn record_utterance(&mut self, limits: ListenLimits, cancel: &AtomicBool) -> Result<Option<Vec<f32>>> {
        self.start()?;
        let samples = match &self.chunks {
            Some(chunks) => collect_utterance(chunks, limits, cancel),
            None => Ok(None),
        };
        self.stop();
        samples
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
