//! Microphone and speaker voice backed by HTTP STT/TTS

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    AudioCapture, AudioPlayback, Clip, Listen, ListenLimits, MicLease, SAMPLE_RATE, Speak, SpeechToText,
    TextToSpeech, samples_to_wav,
};
use crate::config::{ApiKeys, VoiceConfig};
use crate::{Error, Result};

/// Real audio devices
///
/// Each listen opens the input device, records one utterance, and closes it
/// again. The capture thread holds a share of the caller's lease, so the
/// microphone is not handed on before the device is closed, even when the
/// caller gives up on the listen.
pub struct DeviceVoice {
    mic: Option<String>,
    phrase_limit: Duration,
    stt: SpeechToText,
    tts: TextToSpeech,
}

/// Sets the flag when the owning future is dropped
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

impl DeviceVoice {
    /// Build from config and check that both devices can be opened
    ///
    /// # Errors
    ///
    /// Returns error if an API key is missing or a device is unavailable
    pub fn new(voice: &VoiceConfig, keys: &ApiKeys) -> Result<Self> {
        let stt = SpeechToText::from_config(voice, keys)?;
        let tts = TextToSpeech::from_config(voice, keys)?;

        drop(AudioCapture::open(voice.mic.as_deref())?);
        drop(AudioPlayback::new()?);

        Ok(Self {
            mic: voice.mic.clone(),
            phrase_limit: voice.phrase_limit,
            stt,
            tts,
        })
    }
}

#[async_trait]
impl Listen for DeviceVoice {
    async fn listen(&self, lease: &MicLease, timeout: Duration) -> Result<Option<String>> {
        let mic = self.mic.clone();
        let limits = ListenLimits {
            onset: timeout,
            phrase: self.phrase_limit,
        };
        let cancel = Arc::new(AtomicBool::new(false));
        let _cancel_on_drop = CancelOnDrop(Arc::clone(&cancel));
        let held = lease.share();

        let samples = tokio::task::spawn_blocking(move || {
            let samples = AudioCapture::open(mic.as_deref())
                .and_then(|mut capture| capture.record_utterance(limits, &cancel));
            // Device is closed by now; only then may the next owner have it
            drop(held);
            samples
        })
        .await
        .map_err(|e| Error::Audio(format!("capture task failed: {e}")))??;

        let Some(samples) = samples else {
            return Ok(None);
        };

        tracing::debug!(owner = %lease.owner(), samples = samples.len(), "utterance captured");
        let wav = samples_to_wav(&samples, SAMPLE_RATE)?;
        self.stt.transcribe(&wav).await
    }
}

#[async_trait]
impl Speak for DeviceVoice {
    async fn speak(&self, lease: &MicLease, text: &str) -> Result<()> {
        let mp3 = self.tts.synthesize(text).await?;
        tracing::debug!(owner = %lease.owner(), bytes = mp3.len(), "playing speech");

        let held = lease.share();
        tokio::task::spawn_blocking(move || {
            let played = Clip::from_mp3(&mp3).and_then(|clip| AudioPlayback::new()?.play(&clip));
            drop(held);
            played
        })
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}
