//! Recognition worker
//!
//! Pulls the newest frame from the capture mailbox, runs the face matcher on
//! it, and publishes the outcome by replacing the previous
//! [`RecognitionResult`]. Readers hold an `Arc` to an immutable result, so
//! they never see one that is half written.
//!
//! ```text
//!   capture thread --(latest frame)--> worker --(latest result)--> guard
//!                                                             \--> display
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::frame::Frame;
use crate::matcher::{FaceMatch, FaceMatcher, MatchError};
use crate::shutdown::Shutdown;
use crate::{Error, Result};

/// Faces found in one frame
#[derive(Debug, Clone)]
pub struct RecognitionResult {
    /// Sequence number of the frame this result describes
    pub frame_seq: u64,
    /// When that frame was captured
    pub captured_at: Instant,
    pub captured_wall: DateTime<Utc>,
    /// When the result was published
    pub published_at: Instant,
    pub faces: Vec<FaceMatch>,
}

impl RecognitionResult {
    fn from_frame(frame: &Frame, faces: Vec<FaceMatch>) -> Self {
        Self {
            frame_seq: frame.seq(),
            captured_at: frame.captured_at(),
            captured_wall: frame.wall_time(),
            published_at: Instant::now(),
            faces,
        }
    }

    /// Whether any face in the frame went unrecognized
    #[must_use]
    pub fn has_unknown(&self) -> bool {
        self.faces.iter().any(|f| f.identity.is_unknown())
    }

    /// Labels in detection order
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.faces.iter().map(|f| f.identity.label()).collect()
    }
}

/// Worker lifecycle as seen by readers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    Starting,
    Running,
    Stopped,
    /// Hard matcher fault; the last result stays published
    Faulted(String),
}

/// Latest result plus whether it has gone stale
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub result: Arc<RecognitionResult>,
    pub stale: bool,
}

/// Read side of the result board
#[derive(Debug, Clone)]
pub struct ResultReader {
    results: watch::Receiver<Option<Arc<RecognitionResult>>>,
    status: watch::Receiver<WorkerStatus>,
    staleness: Duration,
}

impl ResultReader {
    /// Current result, flagged stale if older than the staleness threshold
    #[must_use]
    pub fn snapshot(&self) -> Option<Snapshot> {
        let result = self.results.borrow().clone()?;
        let stale = result.published_at.elapsed() > self.staleness;
        Some(Snapshot { result, stale })
    }

    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        self.status.borrow().clone()
    }

    /// Receiver that wakes on every publication
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<RecognitionResult>>> {
        self.results.clone()
    }

    /// Receiver that wakes on worker status changes
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<WorkerStatus> {
        self.status.clone()
    }
}

/// Counters reported when the worker exits
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerStats {
    pub processed: u64,
    pub misses: u64,
}

/// Turns frames into published recognition results
pub struct RecognitionWorker {
    matcher: Arc<dyn FaceMatcher>,
    frames: watch::Receiver<Option<Frame>>,
    results: watch::Sender<Option<Arc<RecognitionResult>>>,
    status: watch::Sender<WorkerStatus>,
}

impl RecognitionWorker {
    /// Create a worker reading from `frames` and the reader for its output
    #[must_use]
    pub fn new(
        matcher: Arc<dyn FaceMatcher>,
        frames: watch::Receiver<Option<Frame>>,
        staleness: Duration,
    ) -> (Self, ResultReader) {
        let (results, results_rx) = watch::channel(None);
        let (status, status_rx) = watch::channel(WorkerStatus::Starting);

        let reader = ResultReader {
            results: results_rx,
            status: status_rx,
            staleness,
        };

        (
            Self {
                matcher,
                frames,
                results,
                status,
            },
            reader,
        )
    }

    /// Process frames until shutdown, the capture side going away, or a hard
    /// matcher fault
    ///
    /// # Errors
    ///
    /// Returns [`Error::Matcher`] when the matcher reports a fatal fault
    pub async fn run(mut self, mut shutdown: Shutdown) -> Result<WorkerStats> {
        let mut stats = WorkerStats::default();
        self.status.send_replace(WorkerStatus::Running);
        tracing::info!("recognition worker started");

        loop {
            tokio::select! {
                biased;
                () = shutdown.wait() => break,
                changed = self.frames.changed() => {
                    if changed.is_err() {
                        tracing::debug!("frame source closed");
                        break;
                    }
                }
            }

            // Anything queued behind this frame was already overwritten
            let Some(frame) = self.frames.borrow_and_update().clone() else {
                continue;
            };

            match self.matcher.match_faces(&frame).await {
                Ok(faces) => {
                    stats.processed += 1;
                    tracing::trace!(seq = frame.seq(), faces = faces.len(), "frame recognized");
                    self.publish(&frame, faces);
                }
                Err(MatchError::Fatal(reason)) => {
                    tracing::error!(seq = frame.seq(), reason = %reason, "face matcher failed, stopping recognition");
                    self.status.send_replace(WorkerStatus::Faulted(reason.clone()));
                    return Err(Error::Matcher(reason));
                }
                Err(e) => {
                    stats.processed += 1;
                    stats.misses += 1;
                    tracing::trace!(seq = frame.seq(), error = %e, "no detection this cycle");
                    self.publish(&frame, Vec::new());
                }
            }
        }

        self.status.send_replace(WorkerStatus::Stopped);
        tracing::info!(
            processed = stats.processed,
            misses = stats.misses,
            "recognition worker stopped"
        );
        Ok(stats)
    }

    fn publish(&self, frame: &Frame, faces: Vec<FaceMatch>) {
        let result = Arc::new(RecognitionResult::from_frame(frame, faces));
        self.results.send_replace(Some(result));
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use image::RgbImage;

    use super::*;
    use crate::frame::Region;
    use crate::matcher::Identity;
    use crate::shutdown::ShutdownTrigger;

    /// Fails with a transient miss on odd frames and a fatal fault on frame 4
    struct Flaky;

    #[async_trait]
    impl FaceMatcher for Flaky {
        async fn match_faces(&self, frame: &Frame) -> std::result::Result<Vec<FaceMatch>, MatchError> {
            match frame.seq() {
                4 => Err(MatchError::Fatal("model missing".to_string())),
                n if n % 2 == 1 => Err(MatchError::NoFace),
                _ => Ok(vec![FaceMatch {
                    region: Region::new(0, 0, 1, 1),
                    identity: Identity::Known("alice".to_string()),
                    confidence: 0.9,
                }]),
            }
        }
    }

    async fn submit_and_wait(
        slot: &watch::Sender<Option<Frame>>,
        results: &mut watch::Receiver<Option<Arc<RecognitionResult>>>,
        seq: u64,
    ) -> Arc<RecognitionResult> {
        slot.send_replace(Some(Frame::new(seq, RgbImage::new(2, 2))));
        results.changed().await.unwrap();
        results.borrow_and_update().clone().unwrap()
    }

    #[tokio::test]
    async fn test_misses_publish_empty_and_fatal_stops() {
        let (slot, frames) = watch::channel(None);
        let (worker, reader) = RecognitionWorker::new(Arc::new(Flaky), frames, Duration::from_secs(60));
        let (_trigger, shutdown) = ShutdownTrigger::new();
        let mut results = reader.subscribe();
        let handle = tokio::spawn(worker.run(shutdown));

        let miss = submit_and_wait(&slot, &mut results, 1).await;
        assert_eq!(miss.frame_seq, 1);
        assert!(miss.faces.is_empty());

        let hit = submit_and_wait(&slot, &mut results, 2).await;
        assert_eq!(hit.labels(), vec!["alice"]);

        slot.send_replace(Some(Frame::new(4, RgbImage::new(2, 2))));
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, Err(Error::Matcher(_))));

        // The last good result survives the fault
        let snapshot = reader.snapshot().unwrap();
        assert_eq!(snapshot.result.frame_seq, 2);
        assert!(!snapshot.stale);
        assert!(matches!(reader.status(), WorkerStatus::Faulted(_)));
    }

    #[tokio::test]
    async fn test_stale_flag_after_threshold() {
        let (slot, frames) = watch::channel(None);
        let (worker, reader) = RecognitionWorker::new(Arc::new(Flaky), frames, Duration::from_millis(20));
        let (trigger, shutdown) = ShutdownTrigger::new();
        let mut results = reader.subscribe();
        let handle = tokio::spawn(worker.run(shutdown));

        assert!(reader.snapshot().is_none());
        submit_and_wait(&slot, &mut results, 2).await;
        assert!(!reader.snapshot().unwrap().stale);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(reader.snapshot().unwrap().stale);

        trigger.trigger();
        handle.await.unwrap().unwrap();
        assert_eq!(reader.status(), WorkerStatus::Stopped);
    }
}
