//! Utterance segmentation
//!
//! Energy-based voice activity detection: waits for speech onset, accumulates
//! the utterance, and reports it complete after a run of trailing silence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// Minimum RMS energy considered speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum utterance length (0.3 s at 16 kHz)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Trailing silence that ends an utterance (0.6 s at 16 kHz)
const SILENCE_SAMPLES: usize = 9600;

/// How often a blocked reader checks for cancellation
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Time bounds on one utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenLimits {
    /// How long to wait for speech to start
    pub onset: Duration,
    /// Longest utterance kept once speech has started
    pub phrase: Duration,
}

/// Segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Waiting for speech
    Idle,
    /// Speech started, accumulating
    Speaking,
    /// Utterance finished; take it with [`Segmenter::take_utterance`]
    Complete,
}

/// Splits a sample stream into utterances
#[derive(Debug)]
pub struct Segmenter {
    state: SegmentState,
    threshold: f32,
    buffer: Vec<f32>,
    silence: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(ENERGY_THRESHOLD)
    }
}

impl Segmenter {
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self {
            state: SegmentState::Idle,
            threshold,
            buffer: Vec::new(),
            silence: 0,
        }
    }

    /// Feed a chunk of samples; returns the state after the chunk
    pub fn push(&mut self, samples: &[f32]) -> SegmentState {
        if samples.is_empty() {
            return self.state;
        }
        let energy = rms(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            SegmentState::Idle => {
                if is_speech {
                    self.state = SegmentState::Speaking;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    self.silence = 0;
                    tracing::trace!(energy, "speech onset");
                }
            }
            SegmentState::Speaking => {
                self.buffer.extend_from_slice(samples);
                if is_speech {
                    self.silence = 0;
                } else {
                    self.silence += samples.len();
                }

                if self.silence > SILENCE_SAMPLES {
                    if self.buffer.len() - self.silence > MIN_SPEECH_SAMPLES {
                        tracing::debug!(samples = self.buffer.len(), "utterance complete");
                        self.state = SegmentState::Complete;
                    } else {
                        tracing::trace!("too short, discarding");
                        self.reset();
                    }
                }
            }
            SegmentState::Complete => {}
        }

        self.state
    }

    /// Whether speech has started but not finished
    #[must_use]
    pub fn in_speech(&self) -> bool {
        self.state == SegmentState::Speaking
    }

    /// Take the finished utterance, or whatever was captured so far when
    /// speech is still going on; resets the segmenter
    pub fn take_utterance(&mut self) -> Option<Vec<f32>> {
        let samples = match self.state {
            SegmentState::Idle => None,
            SegmentState::Speaking if self.buffer.len() <= MIN_SPEECH_SAMPLES => None,
            SegmentState::Speaking | SegmentState::Complete => Some(std::mem::take(&mut self.buffer)),
        };
        self.reset();
        samples
    }

    pub fn reset(&mut self) {
        self.state = SegmentState::Idle;
        self.buffer.clear();
        self.silence = 0;
    }

    #[must_use]
    pub const fn state(&self) -> SegmentState {
        self.state
    }
}

/// Read sample chunks until one utterance is complete
///
/// Returns `None` if speech does not start within `limits.onset`, or once
/// `cancel` is set. Speech that starts just before the onset deadline is
/// followed to its end; only `limits.phrase` cuts it short.
///
/// # Errors
///
/// Returns error if the sending side goes away
pub fn collect_utterance(
    chunks: &Receiver<Vec<f32>>,
    limits: ListenLimits,
    cancel: &AtomicBool,
) -> Result<Option<Vec<f32>>> {
    let mut segmenter = Segmenter::default();
    let started = Instant::now();
    let mut onset: Option<Instant> = None;

    loop {
        if cancel.load(Ordering::Acquire) {
            tracing::trace!("utterance cancelled");
            return Ok(None);
        }

        let deadline = onset.map_or(started + limits.onset, |at| at + limits.phrase);
        let Some(left) = deadline.checked_duration_since(Instant::now()) else {
            break;
        };

        match chunks.recv_timeout(left.min(CANCEL_POLL)) {
            Ok(chunk) => match segmenter.push(&chunk) {
                SegmentState::Complete => break,
                SegmentState::Speaking => {
                    onset.get_or_insert_with(Instant::now);
                }
                SegmentState::Idle => onset = None,
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::Audio("microphone stream ended".to_string()));
            }
        }
    }

    Ok(segmenter.take_utterance())
}

/// RMS energy of a chunk
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
