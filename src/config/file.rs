//! TOML configuration file loading
//!
//! Supports `~/.config/warden/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct WardenConfigFile {
    /// Camera configuration
    #[serde(default)]
    pub camera: CameraFileConfig,

    /// Recognition configuration
    #[serde(default)]
    pub recognition: RecognitionFileConfig,

    /// Guard-mode configuration
    #[serde(default)]
    pub guard: GuardFileConfig,

    /// Conversation configuration
    #[serde(default)]
    pub conversation: ConversationFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Data directory override (incident log)
    pub data_dir: Option<String>,
}

/// Camera configuration
#[derive(Debug, Default, Deserialize)]
pub struct CameraFileConfig {
    /// Source selector: device index, `/dev/videoN`, `replay:<dir>` or `stub://`
    pub source: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Capture rate for replay and synthetic sources
    pub fps: Option<u32>,
    /// Submit every Nth frame to recognition
    pub process_every_n_frames: Option<u32>,
    /// Reopen attempts after a mid-run read failure
    pub reopen_attempts: Option<u32>,
}

/// Recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognitionFileConfig {
    /// Path to the enrollment database (JSON)
    pub enrollment_path: Option<String>,
    /// Face encoder service endpoint
    pub encoder_url: Option<String>,
    pub encoder_timeout_secs: Option<f64>,
    /// Euclidean match tolerance
    pub tolerance: Option<f32>,
    /// Downscale factor applied before matching
    pub downscale: Option<f32>,
    /// Seconds without a published result before readers see stale data
    pub staleness_secs: Option<f64>,
}

/// Guard-mode configuration
#[derive(Debug, Default, Deserialize)]
pub struct GuardFileConfig {
    pub debounce_threshold: Option<u32>,
    pub grace_period_secs: Option<f64>,
    pub reengage_cooldown_secs: Option<f64>,
    /// `best-effort` or `mandatory`
    pub alert_policy: Option<String>,
    /// Start with guard mode already on
    pub start_armed: Option<bool>,
}

/// Conversation configuration
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    pub max_turns: Option<u32>,
    pub turn_timeout_secs: Option<f64>,
    pub accept_commands: Option<bool>,
    pub opening: Option<String>,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub responder_timeout_secs: Option<f64>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Input device name or index
    pub mic: Option<String>,
    /// Use stdin/stdout instead of microphone and speakers
    pub text_voice: Option<bool>,
    /// `whisper` or `deepgram`
    pub stt_provider: Option<String>,
    pub stt_model: Option<String>,
    /// `openai` or `elevenlabs`
    pub tts_provider: Option<String>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_speed: Option<f32>,
    /// Seconds a command listen waits for speech to start
    pub listen_chunk_secs: Option<f64>,
    /// Max seconds of one utterance
    pub phrase_limit_secs: Option<f64>,
    /// Trigger phrases
    #[serde(default)]
    pub phrases: PhrasesFileConfig,
}

/// Trigger phrase overrides
#[derive(Debug, Default, Deserialize)]
pub struct PhrasesFileConfig {
    pub guard_on: Option<Vec<String>>,
    pub guard_off: Option<Vec<String>>,
    pub quit: Option<Vec<String>>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from an explicit path or the standard location
///
/// A missing file at the standard location yields defaults. An explicit path
/// that is missing or unparseable is an error, since the operator asked for it.
///
/// # Errors
///
/// Returns error if an explicitly requested file cannot be read or parsed
pub fn load_config_file(explicit: Option<&Path>) -> crate::Result<WardenConfigFile> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(WardenConfigFile::default());
    };

    if !path.exists() {
        return Ok(WardenConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(WardenConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(WardenConfigFile::default())
        }
    }
}

/// Return the config file path: `~/.config/warden/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("warden").join("config.toml"))
}
