//! Guard mode
//!
//! One [`GuardService`] task owns the [`GuardMachine`] and is the only writer
//! of [`GuardState`]. Voice commands, recognition results, and completions of
//! the alert and conversation tasks all arrive at that one loop, so
//! transitions are strictly serialized.

mod intruder;
mod machine;
mod service;
mod state;

use std::str::FromStr;

use crate::Error;

pub use intruder::{IntruderEvent, IntruderTracker};
pub use machine::{Action, GuardEvent, GuardMachine, Step};
pub use service::{ALERT_LINES, GuardHandle, GuardService};
pub use state::{GuardState, Transition};

/// What happens when the intruder alert cannot be spoken
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AlertPolicy {
    /// Challenge the intruder anyway
    #[default]
    BestEffort,
    /// Stand down to monitoring
    Mandatory,
}

impl FromStr for AlertPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best-effort" | "best_effort" => Ok(Self::BestEffort),
            "mandatory" => Ok(Self::Mandatory),
            other => Err(Error::Config(format!("unknown alert policy: {other}"))),
        }
    }
}

impl std::fmt::Display for AlertPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BestEffort => f.write_str("best-effort"),
            Self::Mandatory => f.write_str("mandatory"),
        }
    }
}
