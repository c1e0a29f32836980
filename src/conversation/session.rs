//! Conversation session record

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::guard::IntruderEvent;
use crate::voice::CommandKind;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    TimedOut,
    Aborted,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Why a session stopped
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum EndReason {
    /// Turn limit reached
    MaxTurns,
    /// Responder asked to close
    CloseCue,
    /// Visitor stayed silent for too many turns
    ListenTimeouts,
    /// Quit or guard-off spoken during the session
    Command(CommandKind),
    /// Stopped from outside (operator quit or guard off)
    Cancelled,
    /// Responder failed or returned nothing usable
    ResponderFault(String),
    /// The session task died before reporting
    TaskFailed,
}

impl EndReason {
    /// Status a session ends with for this reason
    #[must_use]
    pub const fn status(&self) -> SessionStatus {
        match self {
            Self::MaxTurns | Self::CloseCue => SessionStatus::Completed,
            Self::ListenTimeouts => SessionStatus::TimedOut,
            Self::Command(_) | Self::Cancelled | Self::ResponderFault(_) | Self::TaskFailed => {
                SessionStatus::Aborted
            }
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxTurns => f.write_str("max turns"),
            Self::CloseCue => f.write_str("close cue"),
            Self::ListenTimeouts => f.write_str("no response"),
            Self::Command(kind) => write!(f, "command {kind}"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::ResponderFault(e) => write!(f, "responder fault: {e}"),
            Self::TaskFailed => f.write_str("task failed"),
        }
    }
}

/// Who said a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Warden,
    Visitor,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TranscriptLine {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// One challenge dialogue with an unknown person
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConversationSession {
    pub id: Uuid,
    pub target: IntruderEvent,
    /// Completed visitor/warden exchanges
    pub turn_count: u32,
    pub transcript: Vec<TranscriptLine>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub end_reason: Option<EndReason>,
}

impl ConversationSession {
    #[must_use]
    pub fn new(target: IntruderEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            turn_count: 0,
            transcript: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            status: SessionStatus::Active,
            end_reason: None,
        }
    }

    pub fn record(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.transcript.push(TranscriptLine {
            speaker,
            text: text.into(),
            at: Utc::now(),
        });
    }

    /// Close the session; later calls keep the first reason
    pub fn finish(&mut self, reason: EndReason) {
        if self.status != SessionStatus::Active {
            return;
        }
        self.status = reason.status();
        self.end_reason = Some(reason);
        self.ended_at = Some(Utc::now());
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// What the visitor said, in order
    pub fn visitor_lines(&self) -> impl Iterator<Item = &str> {
        self.transcript
            .iter()
            .filter(|l| l.speaker == Speaker::Visitor)
            .map(|l| l.text.as_str())
    }

    /// Human-readable transcript for the log
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = format!(
            "session {} ({}, {} turns",
            self.id.simple(),
            self.status,
            self.turn_count
        );
        if let Some(reason) = &self.end_reason {
            let _ = write!(out, ", {reason}");
        }
        out.push(')');

        for line in &self.transcript {
            let who = match line.speaker {
                Speaker::Warden => "warden",
                Speaker::Visitor => "visitor",
            };
            let _ = write!(out, "\n  {who}: {}", line.text);
        }
        out
    }
}
