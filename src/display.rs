//! Operator status display
//!
//! Prints guard state changes and changes in who is in view. Identical
//! consecutive results are not repeated, so the output stays readable at
//! frame rate.

use std::time::Duration;

use crate::guard::{GuardHandle, GuardState};
use crate::recognition::{RecognitionResult, ResultReader, WorkerStatus};
use crate::shutdown::Shutdown;

/// How often staleness is rechecked when nothing is published
const STALE_CHECK: Duration = Duration::from_secs(1);

/// One line of what the camera sees
#[must_use]
pub fn describe(result: &RecognitionResult) -> String {
    if result.faces.is_empty() {
        return "no faces".to_string();
    }
    result
        .faces
        .iter()
        .map(|f| format!("{} ({:.2}) at {}", f.identity, f.confidence, f.region))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Writes status lines to stdout
pub struct StatusDisplay {
    guard: GuardHandle,
    reader: ResultReader,
}

impl StatusDisplay {
    #[must_use]
    pub const fn new(guard: GuardHandle, reader: ResultReader) -> Self {
        Self { guard, reader }
    }

    pub async fn run(self, mut shutdown: Shutdown) {
        let mut states = self.guard.subscribe();
        let mut results = self.reader.subscribe();
        let mut status = self.reader.subscribe_status();
        let mut ticker = tokio::time::interval(STALE_CHECK);

        let mut shown_labels: Option<Vec<String>> = None;
        let mut shown_stale = false;
        let mut states_open = true;
        let mut results_open = true;
        let mut status_open = true;

        println!("[guard] {}", banner(self.guard.state()));

        loop {
            tokio::select! {
                biased;
                () = shutdown.wait() => break,
                changed = states.changed(), if states_open => {
                    if changed.is_err() {
                        states_open = false;
                        continue;
                    }
                    let state = *states.borrow_and_update();
                    println!("[guard] {}", banner(state));
                }
                changed = status.changed(), if status_open => {
                    if changed.is_err() {
                        status_open = false;
                        continue;
                    }
                    let current = status.borrow_and_update().clone();
                    if let WorkerStatus::Faulted(reason) = current {
                        println!("[recognition] stopped: {reason}");
                    }
                }
                changed = results.changed(), if results_open => {
                    if changed.is_err() {
                        results_open = false;
                        continue;
                    }
                    let result = results.borrow_and_update().clone();
                    if let Some(result) = result {
                        show_result(&result, &mut shown_labels);
                        shown_stale = false;
                    }
                }
                _ = ticker.tick() => {
                    let stale = self.reader.snapshot().is_some_and(|s| s.stale);
                    if stale && !shown_stale {
                        println!("[camera] no fresh results (stale)");
                    }
                    shown_stale = stale;
                }
            }
        }
    }
}

fn show_result(result: &RecognitionResult, shown: &mut Option<Vec<String>>) {
    let labels: Vec<String> = result.labels().into_iter().map(str::to_string).collect();
    if shown.as_ref() == Some(&labels) {
        return;
    }
    println!("[camera] frame {}: {}", result.frame_seq, describe(result));
    *shown = Some(labels);
}

fn banner(state: GuardState) -> String {
    match state {
        GuardState::Idle => "guard mode OFF".to_string(),
        GuardState::Monitoring => "guard mode ON - monitoring".to_string(),
        GuardState::Alerting => "INTRUDER - sounding alert".to_string(),
        GuardState::Conversing => "INTRUDER - challenging".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use chrono::Utc;

    use super::*;
    use crate::frame::Region;
    use crate::matcher::{FaceMatch, Identity};

    #[test]
    fn test_describe() {
        let mut result = RecognitionResult {
            frame_seq: 7,
            captured_at: Instant::now(),
            captured_wall: Utc::now(),
            published_at: Instant::now(),
            faces: Vec::new(),
        };
        assert_eq!(describe(&result), "no faces");

        result.faces.push(FaceMatch {
            region: Region::new(10, 20, 30, 40),
            identity: Identity::Known("alice".to_string()),
            confidence: 0.75,
        });
        result.faces.push(FaceMatch {
            region: Region::new(100, 20, 30, 40),
            identity: Identity::Unknown,
            confidence: 0.1,
        });
        let line = describe(&result);
        assert!(line.starts_with("alice (0.75)"));
        assert!(line.contains("Unknown (0.10)"));
    }
}
