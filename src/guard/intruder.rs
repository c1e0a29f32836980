//! Intruder presence tracking and debouncing

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// An unresolved unknown presence
#[derive(Debug, Clone, serde::Serialize)]
pub struct IntruderEvent {
    pub id: Uuid,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    /// Recognition cycles in a row with an unknown face
    pub consecutive_detections: u32,
    /// Total cycles with an unknown face
    pub detections: u32,
    #[serde(skip)]
    last_seen: Instant,
}

impl IntruderEvent {
    fn new(now: Instant) -> Self {
        let wall = Utc::now();
        Self {
            id: Uuid::new_v4(),
            first_seen_at: wall,
            last_seen_at: wall,
            consecutive_detections: 1,
            detections: 1,
            last_seen: now,
        }
    }

    fn seen(&mut self, now: Instant) {
        self.consecutive_detections += 1;
        self.detections += 1;
        self.last_seen = now;
        self.last_seen_at = Utc::now();
    }

    /// Whether the presence was seen within `grace` of `now`
    #[must_use]
    pub fn present_at(&self, now: Instant, grace: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) <= grace
    }

    /// Record a detection made while this event is being engaged
    pub fn refresh(&mut self, now: Instant) {
        self.seen(now);
    }

    /// Short id for logs
    #[must_use]
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

/// Debounces unknown-face detections into at most one [`IntruderEvent`]
#[derive(Debug)]
pub struct IntruderTracker {
    current: Option<IntruderEvent>,
    grace: Duration,
}

impl IntruderTracker {
    #[must_use]
    pub const fn new(grace: Duration) -> Self {
        Self {
            current: None,
            grace,
        }
    }

    /// Feed one recognition cycle
    ///
    /// A cycle with an unknown face creates or extends the event. A cycle
    /// without one breaks the consecutive run; the event itself is dropped
    /// once nothing has been seen for the grace period.
    pub fn observe(&mut self, unknown_seen: bool, now: Instant) -> Option<&IntruderEvent> {
        if unknown_seen {
            match &mut self.current {
                Some(event) => event.seen(now),
                None => {
                    let event = IntruderEvent::new(now);
                    tracing::debug!(event = %event.short_id(), "unknown presence opened");
                    self.current = Some(event);
                }
            }
        } else if let Some(event) = &mut self.current {
            event.consecutive_detections = 0;
            if !event.present_at(now, self.grace) {
                tracing::debug!(event = %event.short_id(), "unknown presence expired");
                self.current = None;
            }
        }
        self.current.as_ref()
    }

    #[must_use]
    pub const fn current(&self) -> Option<&IntruderEvent> {
        self.current.as_ref()
    }

    /// Hand the event over (to an alert or session), leaving the tracker empty
    pub const fn take(&mut self) -> Option<IntruderEvent> {
        self.current.take()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    #[must_use]
    pub const fn grace(&self) -> Duration {
        self.grace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consecutive_run_breaks_on_miss() {
        let mut tracker = IntruderTracker::new(Duration::from_secs(3));
        let t0 = Instant::now();

        tracker.observe(true, t0);
        tracker.observe(true, t0 + Duration::from_millis(100));
        let event = tracker.observe(false, t0 + Duration::from_millis(200)).unwrap();
        assert_eq!(event.consecutive_detections, 0);
        assert_eq!(event.detections, 2);

        let event = tracker.observe(true, t0 + Duration::from_millis(300)).unwrap();
        assert_eq!(event.consecutive_detections, 1);
    }

    #[test]
    fn test_event_expires_after_grace() {
        let mut tracker = IntruderTracker::new(Duration::from_secs(1));
        let t0 = Instant::now();

        let id = tracker.observe(true, t0).unwrap().id;
        assert!(tracker.observe(false, t0 + Duration::from_millis(900)).is_some());
        assert!(tracker.observe(false, t0 + Duration::from_millis(1500)).is_none());

        let fresh = tracker.observe(true, t0 + Duration::from_secs(2)).unwrap();
        assert_ne!(fresh.id, id);
    }

    #[test]
    fn test_take_empties_tracker() {
        let mut tracker = IntruderTracker::new(Duration::from_secs(1));
        tracker.observe(true, Instant::now());
        assert!(tracker.take().is_some());
        assert!(tracker.current().is_none());
    }
}
