use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// Suppresses re-processing of a code seen less than one window ago.
///
/// Only the pipeline loop touches this; the HTTP rescan control signals the
/// loop through an atomic flag and the loop calls [`CooldownTracker::reset`]
/// between frames.
pub(crate) struct CooldownTracker {
    window: Duration,
    last_seen: HashMap<String, Instant>,
}

impl CooldownTracker {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    /// Returns true and records `now` iff the key is unseen or its last
    /// accepted scan is older than the window. A suppressed detection does
    /// not refresh the timestamp, so a code held in front of the camera is
    /// re-accepted exactly once per window.
    pub(crate) fn should_process(&mut self, key: &str, now: Instant) -> bool {
        self.purge_expired(now);
        match self.last_seen.get(key) {
            Some(&seen) if now.duration_since(seen) <= self.window => false,
            _ => {
                self.last_seen.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Forget all previous scans so the same code can be accepted again
    /// immediately.
    pub(crate) fn reset(&mut self) {
        self.last_seen.clear();
    }

    /// Expired entries carry no information; dropping them keeps the map at
    /// the number of codes seen within one window.
    fn purge_expired(&mut self, now: Instant) {
        let window = self.window;
        self.last_seen
            .retain(|_, seen| now.duration_since(*seen) <= window);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.last_seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(2);

    #[test]
    fn second_sight_within_window_is_suppressed() {
        let mut tracker = CooldownTracker::new(WINDOW);
        let t0 = Instant::now();
        assert!(tracker.should_process("EAN-13:012345678905", t0));
        assert!(!tracker.should_process("EAN-13:012345678905", t0 + Duration::from_millis(500)));
        assert!(!tracker.should_process("EAN-13:012345678905", t0 + WINDOW));
    }

    #[test]
    fn accepted_again_after_window_elapses() {
        let mut tracker = CooldownTracker::new(WINDOW);
        let t0 = Instant::now();
        assert!(tracker.should_process("QR:hello", t0));
        assert!(tracker.should_process("QR:hello", t0 + WINDOW + Duration::from_millis(1)));
    }

    #[test]
    fn keys_are_independent() {
        let mut tracker = CooldownTracker::new(WINDOW);
        let t0 = Instant::now();
        assert!(tracker.should_process("EAN-13:a", t0));
        assert!(tracker.should_process("EAN-13:b", t0));
        assert!(!tracker.should_process("EAN-13:a", t0 + Duration::from_millis(10)));
    }

    #[test]
    fn suppressed_sightings_do_not_extend_the_window() {
        let mut tracker = CooldownTracker::new(WINDOW);
        let t0 = Instant::now();
        assert!(tracker.should_process("QR:x", t0));
        // Seen again halfway through; the window still expires relative to t0.
        assert!(!tracker.should_process("QR:x", t0 + Duration::from_secs(1)));
        assert!(tracker.should_process("QR:x", t0 + WINDOW + Duration::from_millis(1)));
    }

    #[test]
    fn reset_allows_immediate_rescan() {
        let mut tracker = CooldownTracker::new(WINDOW);
        let t0 = Instant::now();
        assert!(tracker.should_process("QR:x", t0));
        tracker.reset();
        assert!(tracker.should_process("QR:x", t0 + Duration::from_millis(1)));
    }

    #[test]
    fn expired_entries_are_purged() {
        let mut tracker = CooldownTracker::new(WINDOW);
        let t0 = Instant::now();
        assert!(tracker.should_process("QR:a", t0));
        assert!(tracker.should_process("QR:b", t0));
        assert_eq!(tracker.tracked(), 2);
        assert!(tracker.should_process("QR:c", t0 + WINDOW * 2));
        assert_eq!(tracker.tracked(), 1);
    }
}
