//! Voice processing module
//!
//! Two capabilities sit behind traits: [`Listen`] (microphone to transcript)
//! and [`Speak`] (text to the speakers). Both take a [`MicLease`], so a call
//! can only happen while its caller owns the microphone.
//!
//! - [`DeviceVoice`]: cpal capture and playback with HTTP STT/TTS (`audio`
//!   feature)
//! - [`ConsoleVoice`]: stdin lines in, stdout lines out

mod commands;
mod console;
mod listener;
mod mic;
mod segmenter;
mod stt;
mod tts;
mod wav;

#[cfg(feature = "audio")]
mod capture;
#[cfg(feature = "audio")]
mod device;
#[cfg(feature = "audio")]
mod playback;

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

pub use commands::{CommandKind, CommandPhrases, VoiceCommand};
pub use console::ConsoleVoice;
pub use listener::CommandListener;
pub use mic::{MicArbiter, MicLease, MicOwner};
pub use segmenter::{ListenLimits, SegmentState, Segmenter, collect_utterance, rms};
pub use stt::SpeechToText;
pub use tts::TextToSpeech;
pub use wav::{SAMPLE_RATE, samples_to_wav};

#[cfg(feature = "audio")]
pub use capture::{AudioCapture, input_device_names};
#[cfg(feature = "audio")]
pub use device::DeviceVoice;
#[cfg(feature = "audio")]
pub use playback::{AudioPlayback, Clip};

/// Speech-to-text capability
#[async_trait]
pub trait Listen: Send + Sync {
    /// Record one utterance and transcribe it
    ///
    /// `timeout` bounds the wait for speech to start; an utterance already
    /// under way is heard to its end. Returns `Ok(None)` when nobody spoke.
    ///
    /// # Errors
    ///
    /// Returns error if the device or the transcription service fails
    async fn listen(&self, lease: &MicLease, timeout: Duration) -> Result<Option<String>>;
}

/// Text-to-speech capability; returns once playback has finished
#[async_trait]
pub trait Speak: Send + Sync {
    /// Say `text`
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn speak(&self, lease: &MicLease, text: &str) -> Result<()>;
}

/// Combined voice I/O
pub trait Voice: Listen + Speak {}

impl<T: Listen + Speak> Voice for T {}

/// Speak, retrying once on failure
///
/// # Errors
///
/// Returns the second error if both attempts fail
pub async fn speak_with_retry(voice: &dyn Speak, lease: &MicLease, text: &str) -> Result<()> {
    match voice.speak(lease, text).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::warn!(error = %e, "speech failed, retrying once");
            voice.speak(lease, text).await
        }
    }
}

/// Listen, retrying once on failure (a silent timeout is not a failure)
///
/// # Errors
///
/// Returns the second error if both attempts fail
pub async fn listen_with_retry(
    voice: &dyn Listen,
    lease: &MicLease,
    timeout: Duration,
) -> Result<Option<String>> {
    match voice.listen(lease, timeout).await {
        Ok(heard) => Ok(heard),
        Err(e) => {
            tracing::warn!(error = %e, "listen failed, retrying once");
            voice.listen(lease, timeout).await
        }
    }
}
