//! Leading-edge rate limiter for change events.
//!
//! The Synapse 3 change-detection mechanism can fire many times for a
//! single logical write. The throttle admits the first event immediately
//! and coalesces every further event inside the window into one trailing
//! run. Intermediate log states inside one window are never observed; only
//! the final state of the window is parsed.

use tokio::time::{Duration, Instant};

/// Decision state for one rate-limit window.
#[derive(Debug)]
pub struct Throttle {
    period: Duration,
    last_run: Option<Instant>,
    pending: bool,
}

impl Throttle {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_run: None,
            pending: false,
        }
    }

    /// Admit an incoming event on the leading edge.
    ///
    /// Returns `true` when the caller should run now; otherwise the event
    /// is recorded as pending for the trailing edge.
    pub fn admit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_run {
            Some(last) if now.duration_since(last) < self.period => {
                self.pending = true;
                false
            }
            _ => {
                self.last_run = Some(now);
                true
            }
        }
    }

    /// Whether a coalesced trailing run is owed.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending
    }

    /// When the owed trailing run becomes due.
    #[must_use]
    pub fn trailing_deadline(&self) -> Instant {
        self.last_run.map_or_else(Instant::now, |last| last + self.period)
    }

    /// Consume the pending flag and open a new window for the trailing
    /// run the caller is about to execute.
    pub fn fire_trailing(&mut self) {
        self.pending = false;
        self.last_run = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_event_admitted_immediately() {
        let mut throttle = Throttle::new(Duration::from_secs(15));
        assert!(throttle.admit());
        assert!(!throttle.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_inside_window_coalesce() {
        let mut throttle = Throttle::new(Duration::from_secs(15));
        assert!(throttle.admit());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!throttle.admit());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!throttle.admit());

        // Two deferred events owe exactly one trailing run.
        assert!(throttle.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_after_window_admitted_again() {
        let mut throttle = Throttle::new(Duration::from_secs(15));
        assert!(throttle.admit());

        tokio::time::advance(Duration::from_secs(16)).await;
        assert!(throttle.admit());
        assert!(!throttle.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_deadline_closes_the_window() {
        let mut throttle = Throttle::new(Duration::from_secs(15));
        let start = Instant::now();
        assert!(throttle.admit());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!throttle.admit());
        assert_eq!(throttle.trailing_deadline(), start + Duration::from_secs(15));

        throttle.fire_trailing();
        assert!(!throttle.has_pending());

        // The trailing run opened a fresh window.
        assert!(!throttle.admit());
        assert!(throttle.has_pending());
    }
}
