//! Text-to-speech over HTTP, MP3 output
//!
//! Warden says the same few lines over and over (alerts, the opening
//! challenge, the final warning), so finished clips are kept in a small
//! least-recently-used cache keyed by text.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use tokio::sync::Mutex;

use crate::config::{ApiKeys, TtsProvider, VoiceConfig};
use crate::{Error, Result};

/// Upper bound on one synthesis request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const OPENAI_URL: &str = "https://api.openai.com/v1/audio/speech";
const ELEVENLABS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";
const ELEVENLABS_MODEL: &str = "eleven_monolingual_v1";

/// Clips kept before the least recently used one is evicted
const CACHE_ENTRIES: NonZeroUsize = NonZeroUsize::new(32).expect("32 is non-zero");

/// Only lines this short are cached; replies are rarely repeated
const CACHE_MAX_CHARS: usize = 120;

#[derive(serde::Serialize)]
struct OpenAiSpeech<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
}

#[derive(serde::Serialize)]
struct ElevenLabsSpeech<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// Synthesizes speech with the configured service
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    provider: TtsProvider,
    model: String,
    voice: String,
    speed: f32,
    cache: Mutex<LruCache<String, Arc<[u8]>>>,
}

impl TextToSpeech {
    /// Build the configured provider
    ///
    /// # Errors
    ///
    /// Returns error if the provider's API key is missing
    pub fn from_config(voice: &VoiceConfig, keys: &ApiKeys) -> Result<Self> {
        let (key, model) = match voice.tts_provider {
            TtsProvider::OpenAi => (keys.openai.as_deref(), voice.tts_model.as_str()),
            TtsProvider::ElevenLabs => (keys.elevenlabs.as_deref(), ELEVENLABS_MODEL),
        };
        let api_key = key.filter(|k| !k.is_empty()).ok_or_else(|| {
            Error::Config(format!("{} API key required for text-to-speech", voice.tts_provider))
        })?;

        Ok(Self {
            client: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            api_key: api_key.to_string(),
            provider: voice.tts_provider,
            model: model.to_string(),
            voice: voice.tts_voice.clone(),
            speed: voice.tts_speed,
            cache: Mutex::new(LruCache::new(CACHE_ENTRIES)),
        })
    }

    /// Synthesize `text` to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if `text` is blank or the service fails
    pub async fn synthesize(&self, text: &str) -> Result<Arc<[u8]>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Tts("nothing to say".to_string()));
        }
        if let Some(clip) = self.cached(text).await {
            tracing::trace!(text, "speech clip from cache");
            return Ok(clip);
        }

        let request = match self.provider {
            TtsProvider::OpenAi => self.client.post(OPENAI_URL).bearer_auth(&self.api_key).json(&OpenAiSpeech {
                model: &self.model,
                input: text,
                voice: &self.voice,
                speed: self.speed,
            }),
            TtsProvider::ElevenLabs => self
                .client
                .post(format!("{ELEVENLABS_URL}/{}", self.voice))
                .header("xi-api-key", &self.api_key)
                .json(&ElevenLabsSpeech {
                    text,
                    model_id: &self.model,
                }),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(provider = %self.provider, %status, %body, "synthesis rejected");
            return Err(Error::Tts(format!("{} returned {status}: {body}", self.provider)));
        }

        let clip: Arc<[u8]> = response.bytes().await?.to_vec().into();
        if clip.is_empty() {
            return Err(Error::Tts(format!("{} returned no audio", self.provider)));
        }
        tracing::debug!(provider = %self.provider, bytes = clip.len(), "speech synthesized");

        self.remember(text, &clip).await;
        Ok(clip)
    }

    async fn cached(&self, text: &str) -> Option<Arc<[u8]>> {
        self.cache.lock().await.get(text).cloned()
    }

    async fn remember(&self, text: &str, clip: &Arc<[u8]>) {
        if text.chars().count() > CACHE_MAX_CHARS {
            return;
        }
        let replaced = self.cache.lock().await.push(text.to_string(), Arc::clone(clip));
        if let Some((evicted, _)) = replaced.filter(|(key, _)| key.as_str() != text) {
            tracing::trace!(text = %evicted, "speech clip evicted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openai() -> TextToSpeech {
        let keys = ApiKeys {
            openai: Some("sk-test".to_string()),
            ..ApiKeys::default()
        };
        TextToSpeech::from_config(&VoiceConfig::default(), &keys).unwrap()
    }

    #[test]
    fn test_provider_needs_its_own_key() {
        let voice = VoiceConfig {
            tts_provider: TtsProvider::ElevenLabs,
            ..VoiceConfig::default()
        };
        let keys = ApiKeys {
            openai: Some("sk-test".to_string()),
            ..ApiKeys::default()
        };
        assert!(TextToSpeech::from_config(&voice, &keys).is_err());
        assert!(TextToSpeech::from_config(&VoiceConfig::default(), &keys).is_ok());
    }

    #[tokio::test]
    async fn test_cache_keeps_short_lines_only() {
        let tts = openai();
        let clip: Arc<[u8]> = vec![1, 2, 3].into();

        tts.remember("Leave immediately.", &clip).await;
        tts.remember(&"x".repeat(CACHE_MAX_CHARS + 1), &clip).await;

        assert_eq!(tts.cached("Leave immediately.").await.as_deref(), Some(&[1, 2, 3][..]));
        assert!(tts.cached(&"x".repeat(CACHE_MAX_CHARS + 1)).await.is_none());
    }

    #[tokio::test]
    async fn test_full_cache_evicts_least_recently_used() {
        let tts = openai();
        let clip: Arc<[u8]> = vec![0].into();
        let alert = "Warning! You are being recorded.";

        tts.remember(alert, &clip).await;
        for i in 0..CACHE_ENTRIES.get() {
            tts.remember(&format!("line {i}"), &clip).await;
            // The alert keeps being spoken while replies come and go
            if i % 8 == 0 {
                assert!(tts.cached(alert).await.is_some());
            }
        }

        assert!(tts.cached(alert).await.is_some());
        assert!(tts.cached("line 0").await.is_none());
        assert!(tts.cached("line 1").await.is_some());
        assert_eq!(tts.cache.lock().await.len(), CACHE_ENTRIES.get());
    }

    #[tokio::test]
    async fn test_blank_text_rejected() {
        assert!(openai().synthesize("   ").await.is_err());
    }
}
