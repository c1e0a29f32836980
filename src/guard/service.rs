//! Guard loop: runs the machine and carries out its actions

use std::sync::Arc;
use std::time::Instant;

use rand::seq::SliceRandom;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::{Action, GuardEvent, GuardMachine, GuardState, IntruderEvent};
use crate::config::GuardConfig;
use crate::conversation::{ConversationManager, ConversationSession, EndReason, IncidentLog};
use crate::recognition::RecognitionResult;
use crate::shutdown::{Shutdown, ShutdownTrigger};
use crate::voice::{MicArbiter, MicOwner, Speak, VoiceCommand, speak_with_retry};

/// Intimidation lines; one is picked at random per alert
pub const ALERT_LINES: &[&str] = &[
    "Alert! Unknown person detected. This area is under surveillance.",
    "Warning! You are being recorded. Please identify yourself.",
    "Security breach detected. Authorities have been notified.",
    "This is a restricted area. Leave immediately or face consequences.",
];

/// Completions reported back by spawned tasks
enum Completion {
    Alert { delivered: bool },
    Session(Box<ConversationSession>),
}

/// Sends a fallback completion if its task dies without reporting
struct ReportOnDrop {
    done: mpsc::Sender<Completion>,
    fallback: Option<Completion>,
}

impl ReportOnDrop {
    fn new(done: mpsc::Sender<Completion>, fallback: Completion) -> Self {
        Self {
            done,
            fallback: Some(fallback),
        }
    }

    async fn report(mut self, completion: Completion) {
        self.fallback = None;
        let _ = self.done.send(completion).await;
    }
}

impl Drop for ReportOnDrop {
    fn drop(&mut self) {
        if let Some(fallback) = self.fallback.take() {
            tracing::warn!("guard task ended without reporting");
            if self.done.try_send(fallback).is_err() {
                tracing::warn!("guard loop gone, fallback completion dropped");
            }
        }
    }
}

struct RunningSession {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Read side of the guard: state and the listener pause flag
#[derive(Debug, Clone)]
pub struct GuardHandle {
    state: watch::Receiver<GuardState>,
    listener_paused: watch::Receiver<bool>,
}

impl GuardHandle {
    #[must_use]
    pub fn state(&self) -> GuardState {
        *self.state.borrow()
    }

    /// Receiver that wakes on every state change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<GuardState> {
        self.state.clone()
    }

    /// True while an alert or conversation owns the dialogue
    #[must_use]
    pub fn listener_paused(&self) -> watch::Receiver<bool> {
        self.listener_paused.clone()
    }
}

/// Owns the guard machine; the only writer of [`GuardState`]
pub struct GuardService {
    machine: GuardMachine,
    start_armed: bool,
    speaker: Arc<dyn Speak>,
    arbiter: MicArbiter,
    conversation: Arc<ConversationManager>,
    incidents: Option<IncidentLog>,
    trigger: ShutdownTrigger,
    state_tx: watch::Sender<GuardState>,
    pause_tx: watch::Sender<bool>,
    done_tx: mpsc::Sender<Completion>,
    done_rx: mpsc::Receiver<Completion>,
    alert: Option<JoinHandle<()>>,
    session: Option<RunningSession>,
}

impl GuardService {
    #[must_use]
    pub fn new(
        config: &GuardConfig,
        speaker: Arc<dyn Speak>,
        arbiter: MicArbiter,
        conversation: Arc<ConversationManager>,
        trigger: ShutdownTrigger,
    ) -> (Self, GuardHandle) {
        let (state_tx, state_rx) = watch::channel(GuardState::Idle);
        let (pause_tx, pause_rx) = watch::channel(false);
        let (done_tx, done_rx) = mpsc::channel(4);

        let service = Self {
            machine: GuardMachine::new(config),
            start_armed: config.start_armed,
            speaker,
            arbiter,
            conversation,
            incidents: None,
            trigger,
            state_tx,
            pause_tx,
            done_tx,
            done_rx,
            alert: None,
            session: None,
        };
        let handle = GuardHandle {
            state: state_rx,
            listener_paused: pause_rx,
        };
        (service, handle)
    }

    /// Append concluded sessions to `log`
    #[must_use]
    pub fn with_incident_log(mut self, log: IncidentLog) -> Self {
        self.incidents = Some(log);
        self
    }

    /// Serve events until shutdown
    ///
    /// Returns once any running alert and session have been stopped.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<VoiceCommand>,
        mut results: watch::Receiver<Option<Arc<RecognitionResult>>>,
        mut shutdown: Shutdown,
    ) {
        tracing::info!(armed = self.start_armed, "guard loop started");
        if self.start_armed {
            self.apply(GuardEvent::Command(crate::voice::CommandKind::GuardOn));
        }

        let mut commands_open = true;
        let mut results_open = true;
        let mut last_seq = None;

        loop {
            tokio::select! {
                biased;
                () = shutdown.wait() => break,
                Some(done) = self.done_rx.recv() => self.on_completion(done).await,
                command = commands.recv(), if commands_open => match command {
                    Some(command) => {
                        tracing::debug!(command = %command.kind, transcript = %command.transcript, "command received");
                        self.apply(GuardEvent::Command(command.kind));
                    }
                    None => {
                        tracing::debug!("command channel closed");
                        commands_open = false;
                    }
                },
                changed = results.changed(), if results_open => {
                    if changed.is_err() {
                        tracing::debug!("recognition results closed");
                        results_open = false;
                        continue;
                    }
                    let result = results.borrow_and_update().clone();
                    let Some(result) = result else { continue };
                    if last_seq == Some(result.frame_seq) {
                        continue;
                    }
                    last_seq = Some(result.frame_seq);
                    self.apply(GuardEvent::Recognition {
                        has_unknown: result.has_unknown(),
                    });
                }
            }
        }

        self.stop_tasks().await;
        self.state_tx.send_replace(GuardState::Idle);
        tracing::info!("guard loop stopped");
    }

    fn apply(&mut self, event: GuardEvent) {
        let step = self.machine.handle(event, Instant::now());

        if !step.transitions.is_empty() {
            let state = self.machine.state();
            self.state_tx.send_replace(state);
            self.pause_tx
                .send_replace(matches!(state, GuardState::Alerting | GuardState::Conversing));
        }

        for action in step.actions {
            match action {
                Action::StartAlert(event) => self.start_alert(&event),
                Action::StartSession(event) => self.start_session(event),
                Action::AbortSession => {
                    if let Some(session) = &self.session {
                        session.cancel.send_replace(true);
                    }
                }
                Action::Shutdown => self.trigger.trigger(),
            }
        }
    }

    fn start_alert(&mut self, event: &IntruderEvent) {
        let line = ALERT_LINES
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(ALERT_LINES[0]);
        tracing::warn!(event = %event.short_id(), line, "sounding alert");

        let speaker = Arc::clone(&self.speaker);
        let arbiter = self.arbiter.clone();
        let done = ReportOnDrop::new(self.done_tx.clone(), Completion::Alert { delivered: false });
        self.alert = Some(tokio::spawn(async move {
            let lease = arbiter.acquire(MicOwner::Alert).await;
            let delivered = match speak_with_retry(speaker.as_ref(), &lease, line).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(error = %e, "alert could not be spoken");
                    false
                }
            };
            drop(lease);
            done.report(Completion::Alert { delivered }).await;
        }));
    }

    fn start_session(&mut self, event: IntruderEvent) {
        let (cancel, cancel_rx) = watch::channel(false);
        let manager = Arc::clone(&self.conversation);
        let mut failed = ConversationSession::new(event.clone());
        failed.finish(EndReason::TaskFailed);
        let done = ReportOnDrop::new(self.done_tx.clone(), Completion::Session(Box::new(failed)));
        let task = tokio::spawn(async move {
            let session = manager.run(event, cancel_rx).await;
            done.report(Completion::Session(Box::new(session))).await;
        });
        self.session = Some(RunningSession { cancel, task });
    }

    async fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::Alert { delivered } => {
                self.alert = None;
                self.apply(GuardEvent::AlertFinished { delivered });
            }
            Completion::Session(session) => {
                self.session = None;
                self.conclude(&session).await;
                self.apply(GuardEvent::SessionEnded {
                    status: session.status,
                });
            }
        }
    }

    async fn conclude(&self, session: &ConversationSession) {
        tracing::info!(summary = %session.summary(), "conversation transcript");
        let Some(log) = &self.incidents else {
            return;
        };
        if let Err(e) = log.append(session).await {
            tracing::warn!(error = %e, path = %log.path().display(), "failed to record incident");
        }
    }

    /// Cancel the session and alert, recording a session that got to finish
    async fn stop_tasks(&mut self) {
        if let Some(alert) = self.alert.take() {
            alert.abort();
        }

        if let Some(session) = self.session.take() {
            session.cancel.send_replace(true);
            if let Err(e) = session.task.await {
                tracing::warn!(error = %e, "conversation task failed");
            }
            while let Ok(done) = self.done_rx.try_recv() {
                if let Completion::Session(session) = done {
                    self.conclude(&session).await;
                }
            }
        }

        self.pause_tx.send_replace(false);
    }
}
