//! Daemon - the main warden service
//!
//! Wires the pipeline together and runs it until shutdown:
//! camera thread, recognition worker, command listener, guard loop, status
//! display, and (when stdin is free) the operator console.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::camera::{self, CaptureOptions, CaptureStats};
use crate::console::run_operator_console;
use crate::conversation::{ConversationManager, IncidentLog, responder};
use crate::display::StatusDisplay;
use crate::guard::GuardService;
use crate::matcher::{EncodingMatcher, EnrollmentDb, FaceMatcher, RemoteEncoder};
use crate::recognition::RecognitionWorker;
use crate::shutdown::{Shutdown, ShutdownTrigger};
use crate::voice::{CommandListener, ConsoleVoice, MicArbiter, Voice};
use crate::{Config, Error, Result};

/// Queued commands between the listeners and the guard loop
const COMMAND_QUEUE: usize = 16;

/// Upper bound on waiting for a task after shutdown
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// The warden daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Whether stdin is taken by the text voice
    fn console_voice(&self) -> bool {
        self.config.voice.text_voice || !cfg!(feature = "audio")
    }

    /// Load the enrollment database and build the matcher
    ///
    /// # Errors
    ///
    /// Returns error if the database is unreadable or malformed
    pub fn build_matcher(&self) -> Result<Arc<dyn FaceMatcher>> {
        let recognition = &self.config.recognition;
        let db = EnrollmentDb::load(&recognition.enrollment_path)?;
        if db.is_empty() {
            tracing::warn!(
                path = %recognition.enrollment_path.display(),
                "enrollment database is empty; every face will be unknown"
            );
        } else {
            tracing::info!(
                identities = db.identities.len(),
                encodings = db.encoding_count(),
                "enrollment loaded"
            );
        }

        let encoder = RemoteEncoder::new(recognition.encoder_url.clone(), recognition.encoder_timeout)?;
        Ok(Arc::new(EncodingMatcher::new(
            Arc::new(encoder),
            Arc::new(db),
            recognition,
        )))
    }

    /// Open the microphone and speakers, or the console stand-in
    ///
    /// # Errors
    ///
    /// Returns error if an audio device or API key is missing
    pub fn build_voice(&self) -> Result<Arc<dyn Voice>> {
        if self.console_voice() {
            if !self.config.voice.text_voice {
                tracing::warn!("built without audio support, using text voice");
            }
            tracing::info!("text voice: type to speak, replies are printed");
            return Ok(Arc::new(ConsoleVoice::stdin()));
        }

        device_voice(&self.config)
    }

    /// Run until quit, Ctrl-C, or a camera failure
    ///
    /// # Errors
    ///
    /// Returns error if a device fails to initialize, or if the camera is
    /// lost for good mid-run
    #[allow(clippy::too_many_lines)]
    pub async fn run(self) -> Result<()> {
        let config = &self.config;
        tracing::info!(
            camera = %config.camera.source,
            enrollment = %config.recognition.enrollment_path.display(),
            data_dir = %config.data_dir.display(),
            "daemon starting"
        );

        let matcher = self.build_matcher()?;
        let source = camera::open_source(&config.camera)?;
        let voice = self.build_voice()?;
        let responder = responder::from_config(&config.conversation, &config.api_keys)?;

        let (trigger, mut shutdown) = ShutdownTrigger::new();

        // Camera first: a device that cannot open is fatal before anything runs
        let (frame_tx, frame_rx) = watch::channel(None);
        let (capture_thread, ready) = camera::spawn_capture(
            source,
            CaptureOptions::from_config(&config.camera),
            frame_tx,
            trigger.subscribe(),
        )?;
        match ready.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                trigger.trigger();
                return Err(e);
            }
            Err(_) => {
                trigger.trigger();
                return Err(Error::Camera("capture thread exited during startup".to_string()));
            }
        }
        let capture = watch_capture(capture_thread, trigger.clone());

        let (worker, reader) = RecognitionWorker::new(matcher, frame_rx, config.recognition.staleness);
        let worker = tokio::spawn(worker.run(trigger.subscribe()));

        let arbiter = MicArbiter::new();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);

        let conversation = Arc::new(ConversationManager::new(
            Arc::clone(&voice),
            responder,
            arbiter.clone(),
            config.conversation.clone(),
            config.voice.phrases.clone(),
            commands_tx.clone(),
        ));

        let (guard, handle) = GuardService::new(
            &config.guard,
            voice.clone(),
            arbiter.clone(),
            conversation,
            trigger.clone(),
        );
        let guard = guard.with_incident_log(IncidentLog::new(config.incident_log_path()));

        let listener = CommandListener::new(
            voice,
            arbiter,
            config.voice.phrases.clone(),
            config.voice.listen_chunk,
            commands_tx.clone(),
            handle.listener_paused(),
        );

        let mut tasks: Vec<(&str, JoinHandle<()>)> = vec![
            ("guard", tokio::spawn(guard.run(commands_rx, reader.subscribe(), trigger.subscribe()))),
            ("listener", tokio::spawn(listener.run(trigger.subscribe()))),
            (
                "display",
                tokio::spawn(StatusDisplay::new(handle, reader).run(trigger.subscribe())),
            ),
        ];

        if self.console_voice() {
            tracing::info!("say or type \"guard my room\" to arm, \"quit\" to exit");
        } else {
            // Detached: a blocked stdin read must not hold up shutdown
            tokio::spawn(run_operator_console(commands_tx.clone(), trigger.subscribe()));
            tracing::info!("warden ready: say \"guard my room\" or type on/off/q");
        }
        drop(commands_tx);

        tasks.push(("signals", tokio::spawn(watch_ctrl_c(trigger.clone(), trigger.subscribe()))));

        shutdown.wait().await;
        tracing::info!("shutting down");

        let stops = tasks.into_iter().map(|(name, task)| async move {
            match tokio::time::timeout(STOP_TIMEOUT, task).await {
                Ok(Ok(())) => tracing::debug!(task = name, "stopped"),
                Ok(Err(e)) => tracing::warn!(task = name, error = %e, "task panicked"),
                Err(_) => tracing::warn!(task = name, "did not stop in time"),
            }
        });
        futures::future::join_all(stops).await;

        match tokio::time::timeout(STOP_TIMEOUT, worker).await {
            Ok(Ok(Ok(stats))) => {
                tracing::info!(processed = stats.processed, misses = stats.misses, "recognition stopped");
            }
            Ok(Ok(Err(e))) => tracing::error!(error = %e, "recognition stopped on fault"),
            Ok(Err(e)) => tracing::warn!(error = %e, "recognition task panicked"),
            Err(_) => tracing::warn!("recognition did not stop in time"),
        }

        let stats = capture
            .await
            .map_err(|e| Error::Camera(format!("capture watcher failed: {e}")))??;
        tracing::info!(
            captured = stats.captured,
            submitted = stats.submitted,
            reopens = stats.reopens,
            "capture stopped"
        );
        Ok(())
    }
}

#[cfg(feature = "audio")]
fn device_voice(config: &Config) -> Result<Arc<dyn Voice>> {
    let voice = crate::voice::DeviceVoice::new(&config.voice, &config.api_keys)?;
    Ok(Arc::new(voice))
}

#[cfg(not(feature = "audio"))]
fn device_voice(_config: &Config) -> Result<Arc<dyn Voice>> {
    Err(Error::Audio("audio support not compiled in".to_string()))
}

/// Join the capture thread off the runtime; a camera lost for good stops
/// the whole process
fn watch_capture(
    thread: std::thread::JoinHandle<Result<CaptureStats>>,
    trigger: ShutdownTrigger,
) -> JoinHandle<Result<CaptureStats>> {
    tokio::task::spawn_blocking(move || {
        let result = thread
            .join()
            .unwrap_or_else(|_| Err(Error::Camera("capture thread panicked".to_string())));
        if let Err(e) = &result {
            tracing::error!(error = %e, "camera lost");
        }
        trigger.trigger();
        result
    })
}

async fn watch_ctrl_c(trigger: ShutdownTrigger, mut shutdown: Shutdown) {
    tokio::select! {
        () = shutdown.wait() => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                return;
            }
            tracing::info!("interrupted");
            trigger.trigger();
        }
    }
}
