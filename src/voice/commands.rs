//! Voice command parsing

use chrono::{DateTime, Utc};

/// Command a transcript maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    GuardOn,
    GuardOff,
    Quit,
    /// No trigger phrase matched; never forwarded
    Unrecognized,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::GuardOn => "guard-on",
            Self::GuardOff => "guard-off",
            Self::Quit => "quit",
            Self::Unrecognized => "unrecognized",
        };
        f.write_str(name)
    }
}

/// A recognized command, consumed once by the guard machine
#[derive(Debug, Clone)]
pub struct VoiceCommand {
    pub kind: CommandKind,
    pub at: DateTime<Utc>,
    /// What was heard (or typed)
    pub transcript: String,
}

impl VoiceCommand {
    #[must_use]
    pub fn new(kind: CommandKind, transcript: impl Into<String>) -> Self {
        Self {
            kind,
            at: Utc::now(),
            transcript: transcript.into(),
        }
    }
}

/// Trigger phrases for each command
///
/// Matching is a case-insensitive substring test. Guard-off phrases are tried
/// first, then guard-on, then quit, so "stop guard" never reads as guard-on
/// and shutdown needs the least ambiguous utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPhrases {
    pub guard_on: Vec<String>,
    pub guard_off: Vec<String>,
    pub quit: Vec<String>,
}

impl Default for CommandPhrases {
    fn default() -> Self {
        Self::new(
            vec![
                "guard my room".to_string(),
                "guard on".to_string(),
                "start guard".to_string(),
            ],
            vec!["stop guard".to_string(), "guard off".to_string()],
            vec!["quit".to_string(), "exit".to_string(), "close".to_string()],
        )
    }
}

fn normalize(phrases: Vec<String>) -> Vec<String> {
    phrases
        .into_iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

impl CommandPhrases {
    #[must_use]
    pub fn new(guard_on: Vec<String>, guard_off: Vec<String>, quit: Vec<String>) -> Self {
        Self {
            guard_on: normalize(guard_on),
            guard_off: normalize(guard_off),
            quit: normalize(quit),
        }
    }

    /// True when no phrase at all is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guard_on.is_empty() && self.guard_off.is_empty() && self.quit.is_empty()
    }

    /// Map a transcript to a command
    #[must_use]
    pub fn parse(&self, transcript: &str) -> CommandKind {
        let heard = transcript.to_lowercase();
        let hit = |phrases: &[String]| phrases.iter().any(|p| heard.contains(p.as_str()));

        if hit(&self.guard_off) {
            CommandKind::GuardOff
        } else if hit(&self.guard_on) {
            CommandKind::GuardOn
        } else if hit(&self.quit) {
            CommandKind::Quit
        } else {
            CommandKind::Unrecognized
        }
    }
}
