//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use image::RgbImage;

use warden::config::{ConversationConfig, GuardConfig};
use warden::frame::{Frame, Region};
use warden::matcher::{EncodedFace, FaceEncoder, FaceMatch, Identity, MatchError};
use warden::recognition::RecognitionResult;
use warden::voice::{Listen, MicLease, Speak};
use warden::{Error, Result};

/// Voice that replays scripted transcripts and records what it says
///
/// `None` entries are silent turns. Once the script runs out every listen
/// waits out its timeout and hears nothing.
pub struct ScriptedVoice {
    heard: Mutex<VecDeque<Option<String>>>,
    spoken: Mutex<Vec<String>>,
    speak_attempts: AtomicUsize,
    speak_delay: Duration,
    fail_speech: bool,
}

impl ScriptedVoice {
    pub fn new(heard: &[Option<&str>]) -> Arc<Self> {
        Self::build(heard, Duration::ZERO, false)
    }

    /// Every speak call sleeps first, so the speaking state can be observed
    pub fn slow(heard: &[Option<&str>], speak_delay: Duration) -> Arc<Self> {
        Self::build(heard, speak_delay, false)
    }

    /// Every speak call fails after `speak_delay`
    pub fn mute(heard: &[Option<&str>], speak_delay: Duration) -> Arc<Self> {
        Self::build(heard, speak_delay, true)
    }

    fn build(heard: &[Option<&str>], speak_delay: Duration, fail_speech: bool) -> Arc<Self> {
        Arc::new(Self {
            heard: Mutex::new(heard.iter().map(|h| h.map(str::to_string)).collect()),
            spoken: Mutex::new(Vec::new()),
            speak_attempts: AtomicUsize::new(0),
            speak_delay,
            fail_speech,
        })
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    /// Speak calls made, failed ones included
    pub fn speak_attempts(&self) -> usize {
        self.speak_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Listen for ScriptedVoice {
    async fn listen(&self, _lease: &MicLease, timeout: Duration) -> Result<Option<String>> {
        let next = self.heard.lock().unwrap().pop_front();
        match next {
            Some(heard) => Ok(heard),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Speak for ScriptedVoice {
    async fn speak(&self, _lease: &MicLease, text: &str) -> Result<()> {
        self.speak_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.speak_delay.is_zero() {
            tokio::time::sleep(self.speak_delay).await;
        }
        if self.fail_speech {
            return Err(Error::Tts("speaker unplugged".to_string()));
        }
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Encoder that returns the same faces for every image
pub struct FixedEncoder {
    faces: Vec<EncodedFace>,
}

impl FixedEncoder {
    pub fn one_face(encoding: &[f32]) -> Arc<Self> {
        Arc::new(Self {
            faces: vec![EncodedFace {
                region: Region::new(10, 10, 20, 20),
                encoding: encoding.to_vec(),
            }],
        })
    }
}

#[async_trait]
impl FaceEncoder for FixedEncoder {
    async fn encode(&self, _image: &RgbImage) -> std::result::Result<Vec<EncodedFace>, MatchError> {
        if self.faces.is_empty() {
            return Err(MatchError::NoFace);
        }
        Ok(self.faces.clone())
    }
}

/// Blank test frame
pub fn frame(seq: u64) -> Frame {
    Frame::new(seq, RgbImage::new(64, 48))
}

/// Result for frame `seq` with one face per label (`None` = unknown)
pub fn result(seq: u64, labels: &[Option<&str>]) -> Arc<RecognitionResult> {
    let faces = labels
        .iter()
        .map(|label| FaceMatch {
            region: Region::new(0, 0, 32, 32),
            identity: label.map_or(Identity::Unknown, |l| Identity::Known(l.to_string())),
            confidence: 0.8,
        })
        .collect();

    Arc::new(RecognitionResult {
        frame_seq: seq,
        captured_at: Instant::now(),
        captured_wall: Utc::now(),
        published_at: Instant::now(),
        faces,
    })
}

pub fn guard_config() -> GuardConfig {
    GuardConfig {
        debounce_threshold: 3,
        grace_period: Duration::from_secs(3),
        reengage_cooldown: Duration::from_secs(10),
        start_armed: true,
        ..GuardConfig::default()
    }
}

pub fn conversation_config() -> ConversationConfig {
    ConversationConfig {
        turn_timeout: Duration::from_millis(100),
        responder_timeout: Duration::from_secs(1),
        ..ConversationConfig::default()
    }
}
