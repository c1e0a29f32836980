//! Guard state machine core
//!
//! [`GuardMachine::handle`] is a pure step function: it takes one event and a
//! clock reading and returns the transitions taken plus the side effects the
//! caller must run. It never sleeps, speaks, or spawns, which keeps every
//! edge testable without devices.

use std::time::{Duration, Instant};

use uuid::Uuid;

use super::{AlertPolicy, GuardState, IntruderEvent, IntruderTracker, Transition};
use crate::config::GuardConfig;
use crate::conversation::SessionStatus;
use crate::voice::CommandKind;

/// Input to the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEvent {
    Command(CommandKind),
    /// One recognition cycle finished
    Recognition { has_unknown: bool },
    /// The alert task returned
    AlertFinished { delivered: bool },
    /// The conversation task returned
    SessionEnded { status: SessionStatus },
}

/// Side effect requested by a step
#[derive(Debug, Clone)]
pub enum Action {
    StartAlert(IntruderEvent),
    StartSession(IntruderEvent),
    AbortSession,
    Shutdown,
}

/// Outcome of one event
#[derive(Debug, Default)]
pub struct Step {
    pub transitions: Vec<Transition>,
    pub actions: Vec<Action>,
}

impl Step {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.transitions.is_empty() && self.actions.is_empty()
    }
}

/// Authoritative guard state plus intruder bookkeeping
#[derive(Debug)]
pub struct GuardMachine {
    state: GuardState,
    tracker: IntruderTracker,
    /// Event the current alert or session is about
    engaged: Option<IntruderEvent>,
    /// Pending event already reported as queued
    queued: Option<Uuid>,
    deferred_off: bool,
    cooldown_until: Option<Instant>,
    threshold: u32,
    cooldown: Duration,
    policy: AlertPolicy,
}

impl GuardMachine {
    #[must_use]
    pub const fn new(config: &GuardConfig) -> Self {
        Self {
            state: GuardState::Idle,
            tracker: IntruderTracker::new(config.grace_period),
            engaged: None,
            queued: None,
            deferred_off: false,
            cooldown_until: None,
            threshold: config.debounce_threshold,
            cooldown: config.reengage_cooldown,
            policy: config.alert_policy,
        }
    }

    #[must_use]
    pub const fn state(&self) -> GuardState {
        self.state
    }

    /// Unknown presence noticed while a session was running
    #[must_use]
    pub fn pending(&self) -> Option<&IntruderEvent> {
        if self.state == GuardState::Conversing {
            self.tracker.current()
        } else {
            None
        }
    }

    #[must_use]
    pub const fn engaged(&self) -> Option<&IntruderEvent> {
        self.engaged.as_ref()
    }

    #[must_use]
    pub const fn off_deferred(&self) -> bool {
        self.deferred_off
    }

    /// Apply one event
    pub fn handle(&mut self, event: GuardEvent, now: Instant) -> Step {
        let mut step = Step::default();
        match event {
            GuardEvent::Command(kind) => self.on_command(kind, &mut step),
            GuardEvent::Recognition { has_unknown } => self.on_recognition(has_unknown, now, &mut step),
            GuardEvent::AlertFinished { delivered } => self.on_alert_finished(delivered, now, &mut step),
            GuardEvent::SessionEnded { status } => self.on_session_ended(status, now, &mut step),
        }
        step
    }

    fn on_command(&mut self, kind: CommandKind, step: &mut Step) {
        match (kind, self.state) {
            (CommandKind::Quit, state) => {
                if state == GuardState::Conversing {
                    step.actions.push(Action::AbortSession);
                }
                if state != GuardState::Idle {
                    self.transition(GuardState::Idle, step);
                }
                self.disarm();
                step.actions.push(Action::Shutdown);
            }
            (CommandKind::GuardOn, GuardState::Idle) => {
                self.tracker.clear();
                self.cooldown_until = None;
                self.transition(GuardState::Monitoring, step);
            }
            (CommandKind::GuardOn, GuardState::Alerting | GuardState::Conversing) if self.deferred_off => {
                tracing::info!("pending guard-off cancelled");
                self.deferred_off = false;
            }
            (CommandKind::GuardOff, GuardState::Monitoring) => {
                self.transition(GuardState::Idle, step);
                self.disarm();
            }
            (CommandKind::GuardOff, GuardState::Alerting) => {
                tracing::info!("guard-off deferred until the alert finishes");
                self.deferred_off = true;
            }
            (CommandKind::GuardOff, GuardState::Conversing) => {
                tracing::info!("guard-off ends the conversation");
                self.deferred_off = true;
                step.actions.push(Action::AbortSession);
            }
            (kind, state) => {
                tracing::debug!(command = %kind, %state, "command ignored");
            }
        }
    }

    fn on_recognition(&mut self, has_unknown: bool, now: Instant, step: &mut Step) {
        match self.state {
            GuardState::Idle => {}
            GuardState::Monitoring => {
                let Some(event) = self.tracker.observe(has_unknown, now) else {
                    return;
                };
                if event.consecutive_detections < self.threshold {
                    return;
                }
                if self.cooldown_until.is_some_and(|until| now < until) {
                    tracing::debug!(event = %event.short_id(), "intruder seen during cooldown");
                    return;
                }
                self.cooldown_until = None;

                let Some(event) = self.tracker.take() else {
                    return;
                };
                tracing::warn!(
                    event = %event.short_id(),
                    detections = event.consecutive_detections,
                    "intruder confirmed"
                );
                self.engaged = Some(event.clone());
                self.transition(GuardState::Alerting, step);
                step.actions.push(Action::StartAlert(event));
            }
            GuardState::Alerting => {
                if let Some(event) = self.engaged.as_mut().filter(|_| has_unknown) {
                    event.refresh(now);
                }
            }
            GuardState::Conversing => {
                if let Some(event) = self.engaged.as_mut().filter(|_| has_unknown) {
                    event.refresh(now);
                }
                let Some(pending) = self.tracker.observe(has_unknown, now) else {
                    return;
                };
                if self.queued != Some(pending.id) {
                    tracing::info!(event = %pending.short_id(), "unknown presence queued behind active session");
                    self.queued = Some(pending.id);
                }
            }
        }
    }

    fn on_alert_finished(&mut self, delivered: bool, now: Instant, step: &mut Step) {
        if self.state != GuardState::Alerting {
            tracing::debug!(state = %self.state, "stale alert completion ignored");
            return;
        }

        if self.deferred_off {
            self.engaged = None;
            self.transition(GuardState::Monitoring, step);
            self.apply_deferred_off(step);
            return;
        }

        if !delivered && self.policy == AlertPolicy::Mandatory {
            tracing::warn!("alert not delivered, standing down");
            self.engaged = None;
            self.cooldown_until = Some(now + self.cooldown);
            self.transition(GuardState::Monitoring, step);
            return;
        }

        let present = self
            .engaged
            .as_ref()
            .is_some_and(|e| e.present_at(now, self.tracker.grace()));
        match self.engaged.clone() {
            Some(event) if present => {
                self.transition(GuardState::Conversing, step);
                step.actions.push(Action::StartSession(event));
            }
            _ => {
                tracing::info!("intruder left before the challenge");
                self.engaged = None;
                self.transition(GuardState::Monitoring, step);
            }
        }
    }

    fn on_session_ended(&mut self, status: SessionStatus, now: Instant, step: &mut Step) {
        if self.state != GuardState::Conversing {
            tracing::debug!(state = %self.state, %status, "stale session end ignored");
            return;
        }

        self.engaged = None;
        self.queued = None;
        self.cooldown_until = Some(now + self.cooldown);
        self.transition(GuardState::Monitoring, step);
        self.apply_deferred_off(step);
    }

    fn apply_deferred_off(&mut self, step: &mut Step) {
        if self.deferred_off {
            self.transition(GuardState::Idle, step);
            self.disarm();
        }
    }

    fn disarm(&mut self) {
        self.tracker.clear();
        self.engaged = None;
        self.queued = None;
        self.deferred_off = false;
        self.cooldown_until = None;
    }

    fn transition(&mut self, to: GuardState, step: &mut Step) {
        let from = self.state;
        if !from.can_transition(to) {
            tracing::error!(%from, %to, "illegal guard transition refused");
            return;
        }
        tracing::info!(%from, %to, "guard state");
        self.state = to;
        step.transitions.push(Transition { from, to });
    }
}
