//! Speech-to-text over HTTP
//!
//! One utterance per request: the caller hands over a WAV clip and gets back
//! the cleaned-up transcript, or `None` when the service heard nothing usable.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};

use crate::config::{ApiKeys, SttProvider, VoiceConfig};
use crate::{Error, Result};

/// Upper bound on one transcription request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const WHISPER_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const DEEPGRAM_URL: &str = "https://api.deepgram.com/v1/listen";
const DEEPGRAM_MODEL: &str = "nova-2";

/// Whisper's answers to near-silent clips
const PHANTOM_TRANSCRIPTS: &[&str] = &["you", "thank you.", "thanks for watching!", "."];

#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

impl DeepgramResponse {
    fn into_transcript(self) -> String {
        self.results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| a.transcript)
            .unwrap_or_default()
    }
}

/// Transcribes utterances with the configured service
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Build the configured provider
    ///
    /// # Errors
    ///
    /// Returns error if the provider's API key is missing
    pub fn from_config(voice: &VoiceConfig, keys: &ApiKeys) -> Result<Self> {
        let (key, model) = match voice.stt_provider {
            SttProvider::Whisper => (keys.openai.as_deref(), voice.stt_model.as_str()),
            SttProvider::Deepgram => (keys.deepgram.as_deref(), DEEPGRAM_MODEL),
        };
        let api_key = key.filter(|k| !k.is_empty()).ok_or_else(|| {
            Error::Config(format!("{} API key required for speech-to-text", voice.stt_provider))
        })?;

        Ok(Self {
            client: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            provider: voice.stt_provider,
        })
    }

    /// Transcribe one WAV clip
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the key is rejected and [`Error::Stt`]
    /// for any other service failure
    pub async fn transcribe(&self, wav: &[u8]) -> Result<Option<String>> {
        tracing::debug!(provider = %self.provider, bytes = wav.len(), "transcribing");

        let request = match self.provider {
            SttProvider::Whisper => {
                let file = Part::bytes(wav.to_vec())
                    .file_name("utterance.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?;
                self.client
                    .post(WHISPER_URL)
                    .bearer_auth(&self.api_key)
                    .multipart(Form::new().part("file", file).text("model", self.model.clone()))
            }
            SttProvider::Deepgram => self
                .client
                .post(DEEPGRAM_URL)
                .query(&[("model", self.model.as_str()), ("punctuate", "true")])
                .header("Authorization", format!("Token {}", self.api_key))
                .header("Content-Type", "audio/wav")
                .body(wav.to_vec()),
        };

        let response = request.send().await.map_err(|e| {
            tracing::warn!(provider = %self.provider, error = %e, "transcription request failed");
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(provider = %self.provider, %status, %body, "transcription rejected");
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    Error::Config(format!("{} rejected the API key", self.provider))
                }
                _ => Error::Stt(format!("{} returned {status}: {body}", self.provider)),
            });
        }

        let raw = match self.provider {
            SttProvider::Whisper => response.json::<WhisperResponse>().await?.text,
            SttProvider::Deepgram => response.json::<DeepgramResponse>().await?.into_transcript(),
        };

        let transcript = clean_transcript(&raw);
        tracing::debug!(transcript = transcript.as_deref().unwrap_or(""), "transcription complete");
        Ok(transcript)
    }
}

/// Collapse whitespace and drop empty or phantom transcripts
fn clean_transcript(raw: &str) -> Option<String> {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() || PHANTOM_TRANSCRIPTS.contains(&text.to_lowercase().as_str()) {
        return None;
    }
    Some(text)
}
