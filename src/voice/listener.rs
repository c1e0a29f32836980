//! Voice command listener
//!
//! Listens in short chunks, each under its own microphone lease, and turns
//! transcripts into [`VoiceCommand`]s for the guard machine. Transcripts that
//! match no trigger phrase are dropped here. While `paused` is set (a
//! conversation owns the dialogue) the listener stays off the microphone.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::{CommandKind, CommandPhrases, Listen, MicArbiter, MicOwner, VoiceCommand, listen_with_retry};
use crate::shutdown::Shutdown;

/// Pause after a failed listen before trying again
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Turns speech into guard commands
pub struct CommandListener {
    voice: Arc<dyn Listen>,
    arbiter: MicArbiter,
    phrases: CommandPhrases,
    chunk: Duration,
    commands: mpsc::Sender<VoiceCommand>,
    paused: watch::Receiver<bool>,
}

impl CommandListener {
    #[must_use]
    pub fn new(
        voice: Arc<dyn Listen>,
        arbiter: MicArbiter,
        phrases: CommandPhrases,
        chunk: Duration,
        commands: mpsc::Sender<VoiceCommand>,
        paused: watch::Receiver<bool>,
    ) -> Self {
        Self {
            voice,
            arbiter,
            phrases,
            chunk,
            commands,
            paused,
        }
    }

    /// Listen until shutdown or until the command receiver is dropped
    pub async fn run(mut self, mut shutdown: Shutdown) {
        tracing::info!(chunk_ms = self.chunk.as_millis(), "command listener started");

        while !shutdown.is_triggered() {
            if *self.paused.borrow() {
                tokio::select! {
                    biased;
                    () = shutdown.wait() => break,
                    res = self.paused.wait_for(|paused| !*paused) => {
                        if res.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }

            let lease = tokio::select! {
                biased;
                () = shutdown.wait() => break,
                lease = self.arbiter.acquire(MicOwner::CommandListener) => lease,
            };

            // A conversation may have started while we queued for the mic
            if *self.paused.borrow() {
                continue;
            }

            let heard = tokio::select! {
                biased;
                () = shutdown.wait() => break,
                heard = listen_with_retry(self.voice.as_ref(), &lease, self.chunk) => heard,
            };
            drop(lease);

            match heard {
                Ok(Some(transcript)) => {
                    if !self.dispatch(&transcript).await {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "command listening failed");
                    tokio::select! {
                        () = shutdown.wait() => break,
                        () = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!("command listener stopped");
    }

    /// Forward a recognized command; false once nobody is receiving
    async fn dispatch(&self, transcript: &str) -> bool {
        let kind = self.phrases.parse(transcript);
        if kind == CommandKind::Unrecognized {
            tracing::debug!(transcript, "no command in transcript");
            return true;
        }

        tracing::info!(command = %kind, transcript, "voice command");
        self.commands
            .send(VoiceCommand::new(kind, transcript))
            .await
            .is_ok()
    }
}
