//! Conversation turn loop

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::responder::{ChatContext, ChatResponder, Reply};
use super::session::{ConversationSession, EndReason, Speaker};
use crate::config::ConversationConfig;
use crate::guard::IntruderEvent;
use crate::voice::{
    CommandKind, CommandPhrases, MicArbiter, MicOwner, Voice, VoiceCommand, listen_with_retry,
    speak_with_retry,
};

/// Consecutive silent turns before the visitor is considered unresponsive
const MAX_SILENT_TURNS: u32 = 2;

/// Spoken when the visitor stops responding
pub const FINAL_WARNING: &str =
    "You have not responded. Security has been notified. Leave immediately.";

/// Runs challenge dialogues, one session at a time
pub struct ConversationManager {
    voice: Arc<dyn Voice>,
    responder: Arc<dyn ChatResponder>,
    arbiter: MicArbiter,
    config: ConversationConfig,
    phrases: CommandPhrases,
    commands: mpsc::Sender<VoiceCommand>,
}

impl ConversationManager {
    /// `commands` receives Quit/GuardOff heard mid-session
    #[must_use]
    pub fn new(
        voice: Arc<dyn Voice>,
        responder: Arc<dyn ChatResponder>,
        arbiter: MicArbiter,
        config: ConversationConfig,
        phrases: CommandPhrases,
        commands: mpsc::Sender<VoiceCommand>,
    ) -> Self {
        Self {
            voice,
            responder,
            arbiter,
            config,
            phrases,
            commands,
        }
    }

    /// Engage `target` until the session ends or `cancel` flips to true
    ///
    /// Dropping the cancel sender also ends the session. The microphone is
    /// held only while a turn is in progress and is free when this returns.
    pub async fn run(&self, target: IntruderEvent, mut cancel: watch::Receiver<bool>) -> ConversationSession {
        let mut session = ConversationSession::new(target);
        tracing::info!(
            session = %session.id,
            event = %session.target.short_id(),
            responder = self.responder.name(),
            "conversation started"
        );

        let reason = tokio::select! {
            biased;
            () = async {
                let _ = cancel.wait_for(|cancelled| *cancelled).await;
            } => EndReason::Cancelled,
            reason = self.converse(&mut session) => reason,
        };
        session.finish(reason);

        tracing::info!(
            session = %session.id,
            status = %session.status,
            turns = session.turn_count,
            "conversation ended"
        );
        session
    }

    async fn converse(&self, session: &mut ConversationSession) -> EndReason {
        {
            let lease = self.arbiter.acquire(MicOwner::Conversation).await;
            session.record(Speaker::Warden, &self.config.opening);
            if let Err(e) = speak_with_retry(self.voice.as_ref(), &lease, &self.config.opening).await {
                tracing::warn!(error = %e, "opening challenge not spoken");
            }
        }

        let mut silent_turns = 0;
        loop {
            let lease = self.arbiter.acquire(MicOwner::Conversation).await;

            let heard = match listen_with_retry(self.voice.as_ref(), &lease, self.config.turn_timeout).await {
                Ok(heard) => heard,
                Err(e) => {
                    tracing::warn!(error = %e, "listening failed, counting as silence");
                    None
                }
            };

            let Some(heard) = heard else {
                silent_turns += 1;
                tracing::info!(silent_turns, "no response from visitor");
                if silent_turns >= MAX_SILENT_TURNS {
                    session.record(Speaker::Warden, FINAL_WARNING);
                    if let Err(e) = speak_with_retry(self.voice.as_ref(), &lease, FINAL_WARNING).await {
                        tracing::warn!(error = %e, "final warning not spoken");
                    }
                    return EndReason::ListenTimeouts;
                }
                continue;
            };

            silent_turns = 0;
            tracing::info!(turn = session.turn_count + 1, heard = %heard, "visitor said");
            session.record(Speaker::Visitor, heard.as_str());

            if let Some(kind) = self.command_in(&heard) {
                tracing::info!(command = %kind, "command heard during conversation");
                if self.commands.send(VoiceCommand::new(kind, heard)).await.is_err() {
                    tracing::debug!("guard gone, command dropped");
                }
                return EndReason::Command(kind);
            }

            let reply = match self.reply(session).await {
                Ok(reply) => reply,
                Err(reason) => return reason,
            };

            session.record(Speaker::Warden, reply.text.as_str());
            if let Err(e) = speak_with_retry(self.voice.as_ref(), &lease, &reply.text).await {
                tracing::warn!(error = %e, "reply not spoken");
            }
            drop(lease);

            session.turn_count += 1;
            if reply.close {
                return EndReason::CloseCue;
            }
            if session.turn_count >= self.config.max_turns {
                return EndReason::MaxTurns;
            }
        }
    }

    /// Quit or guard-off, when commands are honored mid-session
    fn command_in(&self, heard: &str) -> Option<CommandKind> {
        if !self.config.accept_commands {
            return None;
        }
        match self.phrases.parse(heard) {
            kind @ (CommandKind::Quit | CommandKind::GuardOff) => Some(kind),
            CommandKind::GuardOn | CommandKind::Unrecognized => None,
        }
    }

    async fn reply(&self, session: &ConversationSession) -> Result<Reply, EndReason> {
        let ctx = ChatContext {
            transcript: &session.transcript,
            turn: session.turn_count + 1,
            max_turns: self.config.max_turns,
        };

        match tokio::time::timeout(self.config.responder_timeout, self.responder.respond(&ctx)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "responder failed");
                Err(EndReason::ResponderFault(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.config.responder_timeout.as_millis(), "responder timed out");
                Err(EndReason::ResponderFault("timed out".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;

    use super::*;
    use crate::conversation::{RuleResponder, SessionStatus};
    use crate::guard::IntruderTracker;
    use crate::voice::{Listen, MicLease, Speak};
    use crate::{Error, Result};

    /// Plays back a fixed list of listen outcomes; `None` is silence
    struct Script {
        heard: Mutex<VecDeque<Option<&'static str>>>,
        spoken: Mutex<Vec<String>>,
    }

    impl Script {
        fn new(heard: &[Option<&'static str>]) -> Arc<Self> {
            Arc::new(Self {
                heard: Mutex::new(heard.iter().copied().collect()),
                spoken: Mutex::new(Vec::new()),
            })
        }

        fn spoken(&self) -> Vec<String> {
            self.spoken.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Listen for Script {
        async fn listen(&self, _lease: &MicLease, _timeout: Duration) -> Result<Option<String>> {
            let next = self.heard.lock().unwrap().pop_front();
            match next {
                Some(heard) => Ok(heard.map(str::to_string)),
                None => std::future::pending().await,
            }
        }
    }

    #[async_trait]
    impl Speak for Script {
        async fn speak(&self, _lease: &MicLease, text: &str) -> Result<()> {
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl ChatResponder for Broken {
        async fn respond(&self, _ctx: &ChatContext<'_>) -> Result<Reply> {
            Err(Error::Chat("upstream 500".to_string()))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    fn target() -> IntruderEvent {
        let mut tracker = IntruderTracker::new(Duration::from_secs(1));
        tracker.observe(true, Instant::now());
        tracker.take().unwrap()
    }

    fn manager(
        voice: Arc<Script>,
        responder: Arc<dyn ChatResponder>,
        arbiter: MicArbiter,
    ) -> (ConversationManager, mpsc::Receiver<VoiceCommand>) {
        let (tx, rx) = mpsc::channel(4);
        let config = ConversationConfig {
            turn_timeout: Duration::from_millis(50),
            ..ConversationConfig::default()
        };
        let manager = ConversationManager::new(voice, responder, arbiter, config, CommandPhrases::default(), tx);
        (manager, rx)
    }

    #[tokio::test]
    async fn test_silence_times_out() {
        let voice = Script::new(&[None, None]);
        let (manager, _rx) = manager(voice.clone(), Arc::new(RuleResponder), MicArbiter::new());
        let (_cancel, cancel_rx) = watch::channel(false);

        let session = manager.run(target(), cancel_rx).await;
        assert_eq!(session.status, SessionStatus::TimedOut);
        assert_eq!(session.turn_count, 0);
        assert_eq!(voice.spoken().last().map(String::as_str), Some(FINAL_WARNING));
    }

    #[tokio::test]
    async fn test_silence_counter_resets() {
        let voice = Script::new(&[None, Some("hello"), None, Some("lost"), None, None]);
        let (manager, _rx) = manager(voice, Arc::new(RuleResponder), MicArbiter::new());
        let (_cancel, cancel_rx) = watch::channel(false);

        let session = manager.run(target(), cancel_rx).await;
        assert_eq!(session.status, SessionStatus::TimedOut);
        assert_eq!(session.turn_count, 2);
    }

    #[tokio::test]
    async fn test_responder_fault_aborts_without_retry() {
        let voice = Script::new(&[Some("who are you")]);
        let (manager, _rx) = manager(voice.clone(), Arc::new(Broken), MicArbiter::new());
        let (_cancel, cancel_rx) = watch::channel(false);

        let session = manager.run(target(), cancel_rx).await;
        assert_eq!(session.status, SessionStatus::Aborted);
        assert!(matches!(session.end_reason, Some(EndReason::ResponderFault(_))));
        // Only the opening was spoken
        assert_eq!(voice.spoken().len(), 1);
    }

    #[tokio::test]
    async fn test_spoken_quit_is_forwarded() {
        let voice = Script::new(&[Some("fine, I quit")]);
        let (manager, mut rx) = manager(voice, Arc::new(RuleResponder), MicArbiter::new());
        let (_cancel, cancel_rx) = watch::channel(false);

        let session = manager.run(target(), cancel_rx).await;
        assert_eq!(session.end_reason, Some(EndReason::Command(CommandKind::Quit)));
        assert_eq!(rx.recv().await.unwrap().kind, CommandKind::Quit);
    }

    #[tokio::test]
    async fn test_cancel_releases_mic() {
        // Listening never returns, so only the cancel can end the session
        let voice = Script::new(&[]);
        let arbiter = MicArbiter::new();
        let (manager, _rx) = manager(voice, Arc::new(RuleResponder), arbiter.clone());
        let (cancel, cancel_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { manager.run(target(), cancel_rx).await });

        let mut owner = arbiter.watch_owner();
        owner
            .wait_for(|o| *o == Some(MicOwner::Conversation))
            .await
            .unwrap();
        cancel.send(true).unwrap();

        let session = handle.await.unwrap();
        assert_eq!(session.end_reason, Some(EndReason::Cancelled));
        assert_eq!(arbiter.owner(), None);
        assert!(arbiter.try_acquire(MicOwner::CommandListener).is_some());
    }
}
