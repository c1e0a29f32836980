//! Guard loop tests: detections, alerts, conversations and commands end to end

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use warden::config::{ConversationConfig, GuardConfig};
use async_trait::async_trait;

use warden::conversation::{ChatContext, ChatResponder, IncidentLog, Reply, RuleResponder};
use warden::guard::{ALERT_LINES, AlertPolicy};
use warden::voice::{CommandKind, CommandPhrases, MicArbiter, VoiceCommand};
use warden::{ConversationManager, GuardHandle, GuardService, GuardState, RecognitionResult, ShutdownTrigger};

use common::{ScriptedVoice, conversation_config, guard_config, result};

struct Rig {
    handle: GuardHandle,
    results: watch::Sender<Option<Arc<RecognitionResult>>>,
    commands: mpsc::Sender<VoiceCommand>,
    arbiter: MicArbiter,
    trigger: ShutdownTrigger,
    task: JoinHandle<()>,
}

impl Rig {
    fn start(
        voice: &Arc<ScriptedVoice>,
        guard: &GuardConfig,
        conversation: ConversationConfig,
        incidents: Option<IncidentLog>,
    ) -> Self {
        Self::start_with(voice, Arc::new(RuleResponder), guard, conversation, incidents)
    }

    fn start_with(
        voice: &Arc<ScriptedVoice>,
        responder: Arc<dyn ChatResponder>,
        guard: &GuardConfig,
        conversation: ConversationConfig,
        incidents: Option<IncidentLog>,
    ) -> Self {
        let arbiter = MicArbiter::new();
        let (trigger, _shutdown) = ShutdownTrigger::new();
        let (commands, commands_rx) = mpsc::channel(8);
        let (results, results_rx) = watch::channel(None);

        let manager = Arc::new(ConversationManager::new(
            voice.clone(),
            responder,
            arbiter.clone(),
            conversation,
            CommandPhrases::default(),
            commands.clone(),
        ));
        let (service, handle) = GuardService::new(guard, voice.clone(), arbiter.clone(), manager, trigger.clone());
        let service = match incidents {
            Some(log) => service.with_incident_log(log),
            None => service,
        };
        let task = tokio::spawn(service.run(commands_rx, results_rx, trigger.subscribe()));

        Self {
            handle,
            results,
            commands,
            arbiter,
            trigger,
            task,
        }
    }

    /// Publish one result and give the guard loop time to take it
    async fn detect(&self, seq: u64, labels: &[Option<&str>]) {
        self.results.send_replace(Some(result(seq, labels)));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    async fn command(&self, kind: CommandKind) {
        self.commands.send(VoiceCommand::new(kind, "typed")).await.unwrap();
    }

    async fn reach(&self, state: GuardState) {
        let mut states = self.handle.subscribe();
        tokio::time::timeout(Duration::from_secs(3), states.wait_for(|s| *s == state))
            .await
            .unwrap_or_else(|_| panic!("guard never reached {state}, stuck in {}", self.handle.state()))
            .unwrap();
    }

    async fn stop(self) {
        self.trigger.trigger();
        tokio::time::timeout(Duration::from_secs(3), self.task)
            .await
            .expect("guard loop did not stop")
            .unwrap();
    }
}

/// Records every state the guard publishes
fn record_states(handle: &GuardHandle) -> Arc<Mutex<Vec<GuardState>>> {
    let mut states = handle.subscribe();
    let seen = Arc::new(Mutex::new(vec![*states.borrow_and_update()]));
    let log = Arc::clone(&seen);
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            log.lock().unwrap().push(state);
        }
    });
    seen
}

fn read_incidents(path: &std::path::Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_unknown_face_escalates_to_conversation() {
    let voice = ScriptedVoice::slow(&[], Duration::from_millis(300));
    let rig = Rig::start(&voice, &guard_config(), conversation_config(), None);
    rig.reach(GuardState::Monitoring).await;

    rig.detect(1, &[None]).await;
    rig.detect(2, &[None]).await;
    assert_eq!(rig.handle.state(), GuardState::Monitoring);

    rig.detect(3, &[None]).await;
    assert_eq!(rig.handle.state(), GuardState::Alerting);
    assert!(*rig.handle.listener_paused().borrow());

    rig.detect(4, &[None]).await;
    rig.reach(GuardState::Conversing).await;
    assert!(*rig.handle.listener_paused().borrow());

    assert!(ALERT_LINES.contains(&voice.spoken()[0].as_str()));
    rig.stop().await;
}

#[tokio::test]
async fn test_known_faces_reset_the_count() {
    let voice = ScriptedVoice::new(&[]);
    let rig = Rig::start(&voice, &guard_config(), conversation_config(), None);
    rig.reach(GuardState::Monitoring).await;

    rig.detect(1, &[None]).await;
    rig.detect(2, &[None]).await;
    rig.detect(3, &[Some("alice")]).await;
    rig.detect(4, &[None]).await;
    rig.detect(5, &[None]).await;
    assert_eq!(rig.handle.state(), GuardState::Monitoring);
    assert!(voice.spoken().is_empty());

    rig.stop().await;
}

#[tokio::test]
async fn test_repeated_frame_counts_once() {
    let voice = ScriptedVoice::new(&[]);
    let rig = Rig::start(&voice, &guard_config(), conversation_config(), None);
    rig.reach(GuardState::Monitoring).await;

    for _ in 0..4 {
        rig.detect(7, &[None]).await;
    }
    assert_eq!(rig.handle.state(), GuardState::Monitoring);

    rig.stop().await;
}

#[tokio::test]
async fn test_session_completes_after_max_turns() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("incidents").join("log.jsonl");

    let voice = ScriptedVoice::slow(
        &[
            Some("I'm a friend of the owner"),
            Some("I was just visiting"),
            Some("Looking for my phone"),
            Some("I brought a package"),
            Some("Okay, okay"),
        ],
        Duration::from_millis(20),
    );
    let rig = Rig::start(
        &voice,
        &guard_config(),
        conversation_config(),
        Some(IncidentLog::new(&log_path)),
    );
    rig.reach(GuardState::Monitoring).await;

    for seq in 1..=3 {
        rig.detect(seq, &[None]).await;
    }
    rig.reach(GuardState::Conversing).await;
    rig.reach(GuardState::Monitoring).await;
    assert!(!*rig.handle.listener_paused().borrow());
    assert!(rig.arbiter.owner().is_none());

    // alert, opening challenge, one reply per turn
    let spoken = voice.spoken();
    assert_eq!(spoken.len(), 7);
    assert!(ALERT_LINES.contains(&spoken[0].as_str()));
    assert_eq!(spoken[1], ConversationConfig::default().opening);

    let incidents = read_incidents(&log_path);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0]["status"], "completed");
    assert_eq!(incidents[0]["end_reason"]["kind"], "max_turns");
    assert_eq!(incidents[0]["turn_count"], 5);
    assert_eq!(incidents[0]["transcript"].as_array().unwrap().len(), 11);

    // Cooldown holds off a new alert even with the stranger still in view
    for seq in 4..=7 {
        rig.detect(seq, &[None]).await;
    }
    assert_eq!(rig.handle.state(), GuardState::Monitoring);

    rig.stop().await;
}

#[tokio::test]
async fn test_quit_during_conversation_releases_mic_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("log.jsonl");

    let voice = ScriptedVoice::new(&[]);
    let conversation = ConversationConfig {
        turn_timeout: Duration::from_secs(5),
        ..conversation_config()
    };
    let rig = Rig::start(&voice, &guard_config(), conversation, Some(IncidentLog::new(&log_path)));
    rig.reach(GuardState::Monitoring).await;

    for seq in 1..=3 {
        rig.detect(seq, &[None]).await;
    }
    rig.reach(GuardState::Conversing).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rig.arbiter.owner().is_some());

    rig.command(CommandKind::Quit).await;

    // Well inside one listen timeout
    let Rig {
        handle,
        arbiter,
        trigger,
        task,
        ..
    } = rig;
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("guard loop did not stop")
        .unwrap();

    assert!(trigger.is_triggered());
    assert_eq!(handle.state(), GuardState::Idle);
    assert!(arbiter.owner().is_none());

    let incidents = read_incidents(&log_path);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0]["status"], "aborted");
    assert_eq!(incidents[0]["end_reason"]["kind"], "cancelled");
}

#[tokio::test]
async fn test_spoken_quit_ends_session_and_process() {
    let voice = ScriptedVoice::new(&[Some("Fine, I quit")]);
    let rig = Rig::start(&voice, &guard_config(), conversation_config(), None);
    rig.reach(GuardState::Monitoring).await;

    for seq in 1..=3 {
        rig.detect(seq, &[None]).await;
    }

    let Rig {
        handle, trigger, task, ..
    } = rig;
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("guard loop did not stop")
        .unwrap();

    assert!(trigger.is_triggered());
    assert_eq!(handle.state(), GuardState::Idle);
}

#[tokio::test]
async fn test_guard_off_waits_for_alert_to_finish() {
    let voice = ScriptedVoice::slow(&[], Duration::from_millis(200));
    let rig = Rig::start(&voice, &guard_config(), conversation_config(), None);
    rig.reach(GuardState::Monitoring).await;

    for seq in 1..=3 {
        rig.detect(seq, &[None]).await;
    }
    assert_eq!(rig.handle.state(), GuardState::Alerting);

    rig.command(CommandKind::GuardOff).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(rig.handle.state(), GuardState::Alerting);

    rig.reach(GuardState::Idle).await;
    assert_eq!(voice.spoken().len(), 1);
    assert!(!*rig.handle.listener_paused().borrow());

    rig.stop().await;
}

#[tokio::test]
async fn test_mandatory_alert_failure_stands_down() {
    let voice = ScriptedVoice::mute(&[], Duration::from_millis(100));
    let guard = GuardConfig {
        alert_policy: AlertPolicy::Mandatory,
        ..guard_config()
    };
    let rig = Rig::start(&voice, &guard, conversation_config(), None);
    rig.reach(GuardState::Monitoring).await;
    let seen = record_states(&rig.handle);

    for seq in 1..=3 {
        rig.detect(seq, &[None]).await;
    }
    assert_eq!(rig.handle.state(), GuardState::Alerting);

    rig.reach(GuardState::Monitoring).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // One attempt plus one retry, and no conversation after it
    assert_eq!(voice.speak_attempts(), 2);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![GuardState::Monitoring, GuardState::Alerting, GuardState::Monitoring]
    );
    assert!(!*rig.handle.listener_paused().borrow());

    // Cooldown after the failed alert
    for seq in 4..=6 {
        rig.detect(seq, &[None]).await;
    }
    assert_eq!(rig.handle.state(), GuardState::Monitoring);
    assert_eq!(voice.speak_attempts(), 2);

    rig.stop().await;
}

#[tokio::test]
async fn test_best_effort_alert_failure_still_converses() {
    let voice = ScriptedVoice::mute(&[], Duration::from_millis(50));
    let rig = Rig::start(&voice, &guard_config(), conversation_config(), None);
    rig.reach(GuardState::Monitoring).await;
    let seen = record_states(&rig.handle);

    for seq in 1..=3 {
        rig.detect(seq, &[None]).await;
    }
    rig.reach(GuardState::Conversing).await;
    assert!(voice.speak_attempts() >= 2);
    assert!(voice.spoken().is_empty());

    // Silent visitor, unspeakable warden: the session still ends
    rig.reach(GuardState::Monitoring).await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            GuardState::Monitoring,
            GuardState::Alerting,
            GuardState::Conversing,
            GuardState::Monitoring
        ]
    );

    rig.stop().await;
}

struct PanickingResponder;

#[async_trait]
impl ChatResponder for PanickingResponder {
    async fn respond(&self, _ctx: &ChatContext<'_>) -> warden::Result<Reply> {
        panic!("responder blew up");
    }

    fn name(&self) -> &'static str {
        "panicking"
    }
}

#[tokio::test]
async fn test_crashed_session_returns_guard_to_monitoring() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("log.jsonl");

    let voice = ScriptedVoice::slow(&[Some("Who's asking?")], Duration::from_millis(50));
    let rig = Rig::start_with(
        &voice,
        Arc::new(PanickingResponder),
        &guard_config(),
        conversation_config(),
        Some(IncidentLog::new(&log_path)),
    );
    rig.reach(GuardState::Monitoring).await;

    for seq in 1..=3 {
        rig.detect(seq, &[None]).await;
    }
    rig.reach(GuardState::Conversing).await;
    rig.reach(GuardState::Monitoring).await;

    assert!(!*rig.handle.listener_paused().borrow());
    assert!(rig.arbiter.owner().is_none());

    let incidents = read_incidents(&log_path);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0]["status"], "aborted");
    assert_eq!(incidents[0]["end_reason"]["kind"], "task_failed");

    rig.stop().await;
}

#[tokio::test]
async fn test_idle_guard_ignores_strangers() {
    let voice = ScriptedVoice::new(&[]);
    let guard = GuardConfig {
        start_armed: false,
        ..guard_config()
    };
    let rig = Rig::start(&voice, &guard, conversation_config(), None);

    for seq in 1..=5 {
        rig.detect(seq, &[None]).await;
    }
    assert_eq!(rig.handle.state(), GuardState::Idle);

    rig.command(CommandKind::GuardOn).await;
    rig.reach(GuardState::Monitoring).await;

    rig.stop().await;
}
