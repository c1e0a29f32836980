//! Guard states and the allowed transitions between them

/// Guard-mode state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardState {
    /// Guard mode off; recognition results are ignored
    Idle,
    /// Watching for unknown faces
    Monitoring,
    /// Speaking the intruder alert
    Alerting,
    /// Challenge dialogue in progress
    Conversing,
}

impl std::fmt::Display for GuardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Monitoring => "monitoring",
            Self::Alerting => "alerting",
            Self::Conversing => "conversing",
        };
        f.write_str(name)
    }
}

/// Every legal `(from, to)` pair
const EDGES: &[(GuardState, GuardState)] = &[
    (GuardState::Idle, GuardState::Monitoring),
    (GuardState::Monitoring, GuardState::Idle),
    (GuardState::Monitoring, GuardState::Alerting),
    (GuardState::Alerting, GuardState::Conversing),
    (GuardState::Alerting, GuardState::Monitoring),
    (GuardState::Conversing, GuardState::Monitoring),
    // Quit
    (GuardState::Alerting, GuardState::Idle),
    (GuardState::Conversing, GuardState::Idle),
];

impl GuardState {
    /// Whether `self -> to` is an edge of the machine
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        EDGES.contains(&(self, to))
    }

    /// Whether guard mode is on
    #[must_use]
    pub const fn is_armed(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// A state change, as published to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: GuardState,
    pub to: GuardState,
}
