//! Per-URL exponential backoff and the sliding error-rate window.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Delay after the first consecutive failure.
pub const BACKOFF_INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on the backoff delay.
pub const BACKOFF_MAX_DELAY: Duration = Duration::from_secs(300);

/// How far back upstream failures count towards the error rate.
const ERROR_WINDOW: Duration = Duration::from_secs(600);

/// Backoff bookkeeping for one URL.
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub consecutive_errors: u32,
    pub current_delay: Duration,
    pub next_retry_at: Instant,
}

#[derive(Debug)]
struct ErrorEvent {
    at: Instant,
    url: String,
}

/// Tracks failures per URL: backoff windows plus the 10-minute error-rate
/// window. Both maps are independently locked and never held across IO.
#[derive(Debug, Default)]
pub struct BackoffTracker {
    states: Mutex<HashMap<String, BackoffState>>,
    events: Mutex<VecDeque<ErrorEvent>>,
}

impl BackoffTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an upstream failure: append an error event, age the window,
    /// and double the URL's backoff delay (capped).
    pub fn record_failure(&self, url: &str) {
        let now = Instant::now();

        {
            let mut events = self.events.lock().unwrap();
            events.push_back(ErrorEvent {
                at: now,
                url: url.to_string(),
            });
            Self::prune(&mut events, now);
        }

        let mut states = self.states.lock().unwrap();
        let state = states
            .entry(url.to_string())
            .and_modify(|s| {
                s.consecutive_errors += 1;
                s.current_delay = (s.current_delay * 2).min(BACKOFF_MAX_DELAY);
            })
            .or_insert(BackoffState {
                consecutive_errors: 1,
                current_delay: BACKOFF_INITIAL_DELAY,
                next_retry_at: now,
            });
        state.next_retry_at = now + state.current_delay;
    }

    /// Record a success: the URL leaves backoff entirely.
    pub fn record_success(&self, url: &str) {
        self.states.lock().unwrap().remove(url);
    }

    /// Time until the URL may be fetched again, with the consecutive
    /// failure count. `None` when the URL is not suppressed — including
    /// when a backoff window has elapsed and a probe is allowed.
    pub fn remaining(&self, url: &str) -> Option<(Duration, u32)> {
        let states = self.states.lock().unwrap();
        let state = states.get(url)?;
        let now = Instant::now();
        if state.next_retry_at <= now {
            return None;
        }
        Some((state.next_retry_at - now, state.consecutive_errors))
    }

    /// Global error rate in failures per minute over the window.
    pub fn error_rate(&self) -> f64 {
        let mut events = self.events.lock().unwrap();
        let now = Instant::now();
        Self::prune(&mut events, now);
        events.len() as f64 / 10.0
    }

    /// Per-URL error rates in failures per minute over the window.
    pub fn error_rate_by_url(&self) -> HashMap<String, f64> {
        let mut events = self.events.lock().unwrap();
        let now = Instant::now();
        Self::prune(&mut events, now);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for event in events.iter() {
            *counts.entry(event.url.clone()).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(url, n)| (url, n as f64 / 10.0))
            .collect()
    }

    /// Snapshot of every URL currently holding backoff state.
    pub fn snapshot(&self) -> HashMap<String, BackoffState> {
        self.states.lock().unwrap().clone()
    }

    fn prune(events: &mut VecDeque<ErrorEvent>, now: Instant) {
        while let Some(front) = events.front() {
            if now.duration_since(front.at) > ERROR_WINDOW {
                events.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn delays_double_and_cap() {
        let tracker = BackoffTracker::new();

        tracker.record_failure("/x");
        let (remaining, errors) = tracker.remaining("/x").unwrap();
        assert_eq!(remaining, Duration::from_secs(5));
        assert_eq!(errors, 1);

        tracker.record_failure("/x");
        assert_eq!(tracker.remaining("/x").unwrap().0, Duration::from_secs(10));

        tracker.record_failure("/x");
        assert_eq!(tracker.remaining("/x").unwrap().0, Duration::from_secs(20));

        // Hammer it past the cap
        for _ in 0..10 {
            tracker.record_failure("/x");
        }
        assert_eq!(tracker.remaining("/x").unwrap().0, Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn window_elapses_then_probe_allowed() {
        let tracker = BackoffTracker::new();
        tracker.record_failure("/x");
        advance(Duration::from_secs(3)).await;
        let (remaining, _) = tracker.remaining("/x").unwrap();
        assert_eq!(remaining, Duration::from_secs(2));

        advance(Duration::from_secs(2)).await;
        // Window elapsed: probe allowed, but the state survives so the
        // next failure doubles rather than restarting at 5s.
        assert!(tracker.remaining("/x").is_none());
        tracker.record_failure("/x");
        assert_eq!(tracker.remaining("/x").unwrap().0, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_to_initial() {
        let tracker = BackoffTracker::new();
        tracker.record_failure("/x");
        tracker.record_failure("/x");
        tracker.record_success("/x");
        assert!(tracker.remaining("/x").is_none());

        tracker.record_failure("/x");
        assert_eq!(tracker.remaining("/x").unwrap().0, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_per_url() {
        let tracker = BackoffTracker::new();
        tracker.record_failure("/a");
        assert!(tracker.remaining("/a").is_some());
        assert!(tracker.remaining("/b").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn error_rate_counts_events_per_minute() {
        let tracker = BackoffTracker::new();
        for _ in 0..5 {
            tracker.record_failure("/a");
        }
        tracker.record_failure("/b");
        assert!((tracker.error_rate() - 0.6).abs() < 1e-9);

        let by_url = tracker.error_rate_by_url();
        assert!((by_url["/a"] - 0.5).abs() < 1e-9);
        assert!((by_url["/b"] - 0.1).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn old_events_age_out_of_the_window() {
        let tracker = BackoffTracker::new();
        tracker.record_failure("/a");
        advance(Duration::from_secs(601)).await;
        assert_eq!(tracker.error_rate(), 0.0);
        assert!(tracker.error_rate_by_url().is_empty());

        // New events still count
        tracker.record_failure("/a");
        assert!((tracker.error_rate() - 0.1).abs() < 1e-9);
    }
}
