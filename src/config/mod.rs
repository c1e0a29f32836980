//! Configuration management for Warden
//!
//! Values resolve with priority: CLI flag > environment > TOML file > default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::guard::AlertPolicy;
use crate::voice::CommandPhrases;
use crate::{Error, Result};

pub use file::WardenConfigFile;

/// Fixed opening challenge spoken when a conversation starts
pub const DEFAULT_OPENING: &str =
    "Attention! I have detected an unknown person. Please identify yourself immediately.";

/// Warden configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Camera configuration
    pub camera: CameraConfig,

    /// Recognition configuration
    pub recognition: RecognitionConfig,

    /// Guard-mode configuration
    pub guard: GuardConfig,

    /// Conversation configuration
    pub conversation: ConversationConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Data directory (incident log)
    pub data_dir: PathBuf,
}

/// Camera configuration
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Source selector: device index, `/dev/videoN`, `replay:<dir>` or `stub://`
    pub source: String,
    pub width: u32,
    pub height: u32,
    /// Capture rate for replay and synthetic sources
    pub fps: u32,
    /// Submit every Nth captured frame to recognition
    pub process_every_n_frames: u32,
    /// Reopen attempts after a mid-run read failure
    pub reopen_attempts: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: "0".to_string(),
            width: 640,
            height: 480,
            fps: 15,
            process_every_n_frames: 3,
            reopen_attempts: 3,
        }
    }
}

/// Recognition configuration
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    /// Enrollment database path
    pub enrollment_path: PathBuf,
    /// Face encoder service endpoint
    pub encoder_url: String,
    pub encoder_timeout: Duration,
    /// Max euclidean distance for a match
    pub tolerance: f32,
    /// Downscale factor applied before matching
    pub downscale: f32,
    /// Age after which a published result is flagged stale
    pub staleness: Duration,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            enrollment_path: default_data_dir().join("enrollment.json"),
            encoder_url: "http://127.0.0.1:8765/encode".to_string(),
            encoder_timeout: Duration::from_secs(5),
            tolerance: 0.6,
            downscale: 0.25,
            staleness: Duration::from_secs(5),
        }
    }
}

/// Guard-mode configuration
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Consecutive unknown detections before alerting
    pub debounce_threshold: u32,
    /// Time without detection before an intruder event is dropped
    pub grace_period: Duration,
    /// Quiet period after a session before a new alert
    pub reengage_cooldown: Duration,
    /// What to do when the alert cannot be spoken
    pub alert_policy: AlertPolicy,
    /// Start with guard mode on
    pub start_armed: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            debounce_threshold: 3,
            grace_period: Duration::from_secs(3),
            reengage_cooldown: Duration::from_secs(10),
            alert_policy: AlertPolicy::BestEffort,
            start_armed: false,
        }
    }
}

/// Conversation configuration
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Turns after which the session completes
    pub max_turns: u32,
    /// Per-turn listen timeout
    pub turn_timeout: Duration,
    /// Forward spoken Quit/GuardOff to the guard machine during a session
    pub accept_commands: bool,
    /// Opening challenge
    pub opening: String,
    /// Chat model identifier
    pub llm_model: String,
    /// OpenAI-compatible API base URL
    pub llm_base_url: String,
    /// Max wait for one responder reply
    pub responder_timeout: Duration,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: 5,
            turn_timeout: Duration::from_secs(10),
            accept_commands: true,
            opening: DEFAULT_OPENING.to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            llm_base_url: "https://api.openai.com/v1".to_string(),
            responder_timeout: Duration::from_secs(20),
        }
    }
}

/// Speech-to-text backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SttProvider {
    #[default]
    Whisper,
    Deepgram,
}

/// Text-to-speech backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsProvider {
    #[default]
    OpenAi,
    ElevenLabs,
}

impl std::fmt::Display for SttProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Whisper => "Whisper",
            Self::Deepgram => "Deepgram",
        })
    }
}

impl std::fmt::Display for TtsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::OpenAi => "OpenAI",
            Self::ElevenLabs => "ElevenLabs",
        })
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Input device name or index (default device when unset)
    pub mic: Option<String>,
    /// Use stdin/stdout instead of microphone and speakers
    pub text_voice: bool,
    pub stt_provider: SttProvider,
    pub stt_model: String,
    pub tts_provider: TtsProvider,
    pub tts_model: String,
    pub tts_voice: String,
    pub tts_speed: f32,
    /// How long one command-listen cycle waits for speech to start
    pub listen_chunk: Duration,
    /// Longest utterance recorded once speech has started
    pub phrase_limit: Duration,
    /// Trigger phrases
    pub phrases: CommandPhrases,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            mic: None,
            text_voice: false,
            stt_provider: SttProvider::Whisper,
            stt_model: "whisper-1".to_string(),
            tts_provider: TtsProvider::OpenAi,
            tts_model: "tts-1".to_string(),
            tts_voice: "onyx".to_string(),
            tts_speed: 1.0,
            listen_chunk: Duration::from_secs(3),
            phrase_limit: Duration::from_secs(5),
            phrases: CommandPhrases::default(),
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, TTS, chat)
    pub openai: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,
}

/// Values given on the command line; they win over every other source
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub enrollment: Option<PathBuf>,
    pub camera: Option<String>,
    pub mic: Option<String>,
    pub text_voice: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            recognition: RecognitionConfig::default(),
            guard: GuardConfig::default(),
            conversation: ConversationConfig::default(),
            voice: VoiceConfig::default(),
            api_keys: ApiKeys::default(),
            data_dir: default_data_dir(),
        }
    }
}

/// Default data directory: `~/.local/share/warden` on Linux
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("warden"))
}

impl Config {
    /// Load configuration from the process environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if the config file or a value in it is invalid
    pub fn load(overrides: &CliOverrides) -> Result<Self> {
        let fc = file::load_config_file(overrides.config_path.as_deref())?;
        let config = Self::resolve(fc, |key| std::env::var(key).ok(), overrides)?;
        config.validate()?;

        if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
            tracing::warn!(
                path = %config.data_dir.display(),
                error = %e,
                "failed to create data directory"
            );
        }

        Ok(config)
    }

    /// Merge file values, environment lookups and CLI overrides onto defaults
    ///
    /// # Errors
    ///
    /// Returns error if an enumerated value (policy, provider) is unknown
    #[allow(clippy::too_many_lines)]
    pub fn resolve(
        fc: WardenConfigFile,
        env: impl Fn(&str) -> Option<String>,
        overrides: &CliOverrides,
    ) -> Result<Self> {
        let d = Self::default();

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
        };

        let camera = CameraConfig {
            source: overrides
                .camera
                .clone()
                .or_else(|| env("WARDEN_CAMERA"))
                .or(fc.camera.source)
                .unwrap_or(d.camera.source),
            width: fc.camera.width.unwrap_or(d.camera.width),
            height: fc.camera.height.unwrap_or(d.camera.height),
            fps: fc.camera.fps.unwrap_or(d.camera.fps),
            process_every_n_frames: fc
                .camera
                .process_every_n_frames
                .unwrap_or(d.camera.process_every_n_frames),
            reopen_attempts: fc.camera.reopen_attempts.unwrap_or(d.camera.reopen_attempts),
        };

        let recognition = RecognitionConfig {
            enrollment_path: overrides
                .enrollment
                .clone()
                .or_else(|| env("WARDEN_ENROLLMENT").map(PathBuf::from))
                .or_else(|| fc.recognition.enrollment_path.map(PathBuf::from))
                .unwrap_or(d.recognition.enrollment_path),
            encoder_url: env("WARDEN_ENCODER_URL")
                .or(fc.recognition.encoder_url)
                .unwrap_or(d.recognition.encoder_url),
            encoder_timeout: secs_or(
                fc.recognition.encoder_timeout_secs,
                d.recognition.encoder_timeout,
            ),
            tolerance: fc.recognition.tolerance.unwrap_or(d.recognition.tolerance),
            downscale: fc.recognition.downscale.unwrap_or(d.recognition.downscale),
            staleness: secs_or(fc.recognition.staleness_secs, d.recognition.staleness),
        };

        let alert_policy = match env("WARDEN_ALERT_POLICY").or(fc.guard.alert_policy) {
            Some(s) => s.parse()?,
            None => d.guard.alert_policy,
        };
        let guard = GuardConfig {
            debounce_threshold: fc
                .guard
                .debounce_threshold
                .unwrap_or(d.guard.debounce_threshold),
            grace_period: secs_or(fc.guard.grace_period_secs, d.guard.grace_period),
            reengage_cooldown: secs_or(fc.guard.reengage_cooldown_secs, d.guard.reengage_cooldown),
            alert_policy,
            start_armed: env("WARDEN_START_ARMED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(fc.guard.start_armed)
                .unwrap_or(d.guard.start_armed),
        };

        let conversation = ConversationConfig {
            max_turns: fc.conversation.max_turns.unwrap_or(d.conversation.max_turns),
            turn_timeout: secs_or(fc.conversation.turn_timeout_secs, d.conversation.turn_timeout),
            accept_commands: fc
                .conversation
                .accept_commands
                .unwrap_or(d.conversation.accept_commands),
            opening: fc.conversation.opening.unwrap_or(d.conversation.opening),
            llm_model: env("WARDEN_LLM_MODEL")
                .or(fc.conversation.llm_model)
                .unwrap_or(d.conversation.llm_model),
            llm_base_url: env("WARDEN_LLM_BASE_URL")
                .or(fc.conversation.llm_base_url)
                .unwrap_or(d.conversation.llm_base_url),
            responder_timeout: secs_or(
                fc.conversation.responder_timeout_secs,
                d.conversation.responder_timeout,
            ),
        };

        let stt_provider = match fc.voice.stt_provider.as_deref() {
            None => d.voice.stt_provider,
            Some(s) if s.eq_ignore_ascii_case("whisper") => SttProvider::Whisper,
            Some(s) if s.eq_ignore_ascii_case("deepgram") => SttProvider::Deepgram,
            Some(other) => return Err(Error::Config(format!("unknown stt_provider: {other}"))),
        };
        let tts_provider = match fc.voice.tts_provider.as_deref() {
            None => d.voice.tts_provider,
            Some(s) if s.eq_ignore_ascii_case("openai") => TtsProvider::OpenAi,
            Some(s) if s.eq_ignore_ascii_case("elevenlabs") => TtsProvider::ElevenLabs,
            Some(other) => return Err(Error::Config(format!("unknown tts_provider: {other}"))),
        };

        let default_phrases = d.voice.phrases;
        let phrases = CommandPhrases::new(
            fc.voice.phrases.guard_on.unwrap_or(default_phrases.guard_on),
            fc.voice.phrases.guard_off.unwrap_or(default_phrases.guard_off),
            fc.voice.phrases.quit.unwrap_or(default_phrases.quit),
        );

        let voice = VoiceConfig {
            mic: overrides
                .mic
                .clone()
                .or_else(|| env("WARDEN_MIC"))
                .or(fc.voice.mic),
            text_voice: overrides.text_voice || fc.voice.text_voice.unwrap_or(d.voice.text_voice),
            stt_provider,
            stt_model: env("WARDEN_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or(d.voice.stt_model),
            tts_provider,
            tts_model: env("WARDEN_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or(d.voice.tts_model),
            tts_voice: fc.voice.tts_voice.unwrap_or(d.voice.tts_voice),
            tts_speed: fc.voice.tts_speed.unwrap_or(d.voice.tts_speed),
            listen_chunk: secs_or(fc.voice.listen_chunk_secs, d.voice.listen_chunk),
            phrase_limit: secs_or(fc.voice.phrase_limit_secs, d.voice.phrase_limit),
            phrases,
        };

        let data_dir = env("WARDEN_DATA_DIR")
            .or(fc.data_dir)
            .map_or(d.data_dir, PathBuf::from);

        Ok(Self {
            camera,
            recognition,
            guard,
            conversation,
            voice,
            api_keys,
            data_dir,
        })
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns error describing the first out-of-range value
    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(Error::Config(format!(
                "camera width must be between 1 and 4096, got {}",
                self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(Error::Config(format!(
                "camera height must be between 1 and 4096, got {}",
                self.camera.height
            )));
        }
        if self.camera.fps == 0 || self.camera.fps > 120 {
            return Err(Error::Config(format!(
                "camera fps must be between 1 and 120, got {}",
                self.camera.fps
            )));
        }
        if self.camera.process_every_n_frames == 0 {
            return Err(Error::Config(
                "process_every_n_frames must be at least 1".to_string(),
            ));
        }
        if !(self.recognition.tolerance > 0.0 && self.recognition.tolerance <= 2.0) {
            return Err(Error::Config(format!(
                "tolerance must be in (0.0, 2.0], got {}",
                self.recognition.tolerance
            )));
        }
        if !(self.recognition.downscale > 0.0 && self.recognition.downscale <= 1.0) {
            return Err(Error::Config(format!(
                "downscale must be in (0.0, 1.0], got {}",
                self.recognition.downscale
            )));
        }
        if self.guard.debounce_threshold == 0 {
            return Err(Error::Config("debounce_threshold must be at least 1".to_string()));
        }
        if self.conversation.max_turns == 0 || self.conversation.max_turns > 50 {
            return Err(Error::Config(format!(
                "max_turns must be between 1 and 50, got {}",
                self.conversation.max_turns
            )));
        }
        if self.conversation.turn_timeout < Duration::from_secs(1)
            || self.conversation.turn_timeout > Duration::from_secs(120)
        {
            return Err(Error::Config(format!(
                "turn_timeout must be between 1 and 120 seconds, got {:?}",
                self.conversation.turn_timeout
            )));
        }
        if !(0.25..=4.0).contains(&self.voice.tts_speed) {
            return Err(Error::Config(format!(
                "tts_speed must be between 0.25 and 4.0, got {}",
                self.voice.tts_speed
            )));
        }
        if self.voice.phrase_limit < Duration::from_secs(1) || self.voice.phrase_limit > Duration::from_secs(30) {
            return Err(Error::Config(format!(
                "phrase_limit must be between 1 and 30 seconds, got {:?}",
                self.voice.phrase_limit
            )));
        }
        if self.voice.phrases.is_empty() {
            return Err(Error::Config("at least one trigger phrase is required".to_string()));
        }
        Ok(())
    }

    /// Path of the JSON-lines incident log
    #[must_use]
    pub fn incident_log_path(&self) -> PathBuf {
        self.data_dir.join("incidents.jsonl")
    }
}

fn secs_or(value: Option<f64>, default: Duration) -> Duration {
    value
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map_or(default, Duration::from_secs_f64)
}
