//! Error types for Warden

use thiserror::Error;

/// Result type alias for Warden operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Warden
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Camera device error
    #[error("camera error: {0}")]
    Camera(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Chat responder error (timeout, malformed reply, API failure)
    #[error("chat error: {0}")]
    Chat(String),

    /// Face matcher fault that stops recognition
    #[error("matcher error: {0}")]
    Matcher(String),

    /// Enrollment database error
    #[error("enrollment error: {0}")]
    Enrollment(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Image decoding or encoding error
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    /// Whether this error means a camera or audio device is unusable
    #[must_use]
    pub const fn is_device_fault(&self) -> bool {
        matches!(self, Self::Camera(_) | Self::Audio(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_fault_classification() {
        assert!(Error::Camera("gone".into()).is_device_fault());
        assert!(Error::Audio("no input".into()).is_device_fault());
        assert!(!Error::Tts("quota".into()).is_device_fault());
        assert!(!Error::Chat("timeout".into()).is_device_fault());
    }

    #[test]
    fn test_display_prefixes() {
        assert_eq!(Error::Chat("timeout".into()).to_string(), "chat error: timeout");
        assert_eq!(Error::Camera("gone".into()).to_string(), "camera error: gone");
    }
}
