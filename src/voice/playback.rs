//! Speaker playback
//!
//! A [`Clip`] carries its own sample rate (`OpenAI` speech is 24 kHz,
//! `ElevenLabs` 44.1 kHz); the output stream is opened at that rate.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use crate::{Error, Result};

/// Extra time allowed past a clip's length before playback is cut off
const PLAYBACK_SLACK: Duration = Duration::from_millis(500);

/// Lets the device drain its last buffer before the stream drops
const DRAIN_DELAY: Duration = Duration::from_millis(100);

/// Mono audio ready to play
#[derive(Debug, Clone)]
pub struct Clip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Clip {
    /// Sine tone, for speaker checks
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn tone(frequency: f32, duration: Duration, sample_rate: u32) -> Self {
        let count = (duration.as_secs_f32() * sample_rate as f32) as usize;
        let samples = (0..count)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
            })
            .collect();
        Self { samples, sample_rate }
    }

    /// Decode an MP3 stream, downmixed to mono
    ///
    /// # Errors
    ///
    /// Returns error on a corrupt or empty stream
    pub fn from_mp3(mp3: &[u8]) -> Result<Self> {
        let mut decoder = minimp3::Decoder::new(Cursor::new(mp3));
        let mut samples = Vec::new();
        let mut sample_rate = None;

        loop {
            match decoder.next_frame() {
                Ok(frame) => {
                    sample_rate.get_or_insert(frame.sample_rate);
                    let channels = frame.channels.max(1);
                    #[allow(clippy::cast_precision_loss)]
                    let scale = 1.0 / (32768.0 * channels as f32);
                    samples.extend(
                        frame
                            .data
                            .chunks(channels)
                            .map(|pcm| pcm.iter().map(|&s| f32::from(s)).sum::<f32>() * scale),
                    );
                }
                Err(minimp3::Error::Eof) => break,
                Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
            }
        }

        let sample_rate = sample_rate
            .and_then(|rate| u32::try_from(rate).ok())
            .ok_or_else(|| Error::Audio("MP3 stream has no frames".to_string()))?;
        Ok(Self { samples, sample_rate })
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.samples.len() as u64 * 1000 / u64::from(self.sample_rate))
    }
}

/// The default output device
///
/// Playback blocks the calling thread until the clip has played, so async
/// callers go through `spawn_blocking`.
pub struct AudioPlayback {
    device: Device,
}

impl AudioPlayback {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if there is no output device
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;
        tracing::debug!(device = device.name().unwrap_or_default(), "speaker opened");
        Ok(Self { device })
    }

    /// Output config at `rate`, mono if the device allows, else the fewest
    /// channels it has
    fn config_for(&self, rate: u32) -> Result<StreamConfig> {
        let range = self
            .device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| {
                c.sample_format() == cpal::SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(rate)
                    && c.max_sample_rate() >= SampleRate(rate)
            })
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| Error::Audio(format!("speaker cannot play {rate} Hz")))?;
        Ok(range.with_sample_rate(SampleRate(rate)).config())
    }

    /// Play `clip` to completion
    ///
    /// # Errors
    ///
    /// Returns error if the output stream cannot be started
    pub fn play(&self, clip: &Clip) -> Result<()> {
        if clip.samples.is_empty() {
            return Ok(());
        }

        let config = self.config_for(clip.sample_rate)?;
        let channels = usize::from(config.channels);
        let samples: Arc<[f32]> = clip.samples.clone().into();
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);
            self.device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut pos = position.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            frame.fill(samples.get(pos).copied().unwrap_or(0.0));
                            pos = (pos + 1).min(samples.len());
                        }
                        position.store(pos, Ordering::Relaxed);
                        if pos == samples.len() {
                            finished.store(true, Ordering::Release);
                        }
                    },
                    |err| tracing::error!(error = %err, "speaker stream error"),
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let deadline = Instant::now() + clip.duration() + PLAYBACK_SLACK;
        while !finished.load(Ordering::Acquire) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        std::thread::sleep(DRAIN_DELAY);
        drop(stream);

        if !finished.load(Ordering::Acquire) {
            tracing::warn!(
                played = position.load(Ordering::Relaxed),
                total = samples.len(),
                "playback cut off"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_length() {
        let clip = Clip::tone(440.0, Duration::from_millis(500), 24_000);
        assert_eq!(clip.samples.len(), 12_000);
        assert_eq!(clip.duration(), Duration::from_millis(500));
        assert!(clip.samples.iter().all(|s| s.abs() <= 0.3));
    }

    #[test]
    fn test_garbage_is_not_mp3() {
        assert!(Clip::from_mp3(b"definitely not audio").is_err());
        assert!(Clip::from_mp3(&[]).is_err());
    }
}
