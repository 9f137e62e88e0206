//! Named countdowns evaluated once per tick.

use std::time::{Duration, Instant};

/// A stopwatch driven by externally supplied instants.
///
/// It never reads the time itself; the room passes in the instant its
/// current tick started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stopwatch {
    started: Option<Instant>,
}

impl Stopwatch {
    /// Starts the stopwatch if it is not already running.
    pub fn start(&mut self, now: Instant) {
        if self.started.is_none() {
            self.started = Some(now);
        }
    }

    /// Starts from zero, running or not.
    pub fn restart(&mut self, now: Instant) {
        self.started = Some(now);
    }

    /// Stops and clears.
    pub fn reset(&mut self) {
        self.started = None;
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Time since start, or zero when stopped.
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.started
            .map(|s| now.saturating_duration_since(s))
            .unwrap_or_default()
    }

    /// Running and at least `limit` old.
    pub fn reached(&self, now: Instant, limit: Duration) -> bool {
        self.is_running() && self.elapsed(now) >= limit
    }
}

/// The room-wide countdowns. Per-player race timeouts live on the players.
#[derive(Debug, Clone, Default)]
pub(crate) struct RoomTimers {
    /// Periodic room-browser advertisement.
    pub list_ping: Stopwatch,
    /// All players ready; fires the race after a short grace period.
    pub lobby_ready: Stopwatch,
    /// Enough players present; fires the race after `auto_start_time`.
    pub auto_start: Stopwatch,
    /// Waiting for clients to load the stage.
    pub stage_load: Stopwatch,
    /// Everyone finished; return to the lobby after `auto_return_time`.
    pub auto_return: Stopwatch,
    /// Spacing between heartbeat probes.
    pub heartbeat: Stopwatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_does_not_restart_a_running_stopwatch() {
        let t0 = Instant::now();
        let mut sw = Stopwatch::default();
        assert!(!sw.is_running());
        assert_eq!(sw.elapsed(t0), Duration::ZERO);

        sw.start(t0);
        sw.start(t0 + Duration::from_secs(2));
        assert_eq!(sw.elapsed(t0 + Duration::from_secs(5)), Duration::from_secs(5));

        sw.restart(t0 + Duration::from_secs(5));
        assert_eq!(sw.elapsed(t0 + Duration::from_secs(6)), Duration::from_secs(1));
    }

    #[test]
    fn test_reached_requires_running() {
        let t0 = Instant::now();
        let mut sw = Stopwatch::default();
        assert!(!sw.reached(t0, Duration::ZERO));

        sw.start(t0);
        assert!(sw.reached(t0 + Duration::from_secs(3), Duration::from_secs(3)));
        assert!(!sw.reached(t0 + Duration::from_millis(2999), Duration::from_secs(3)));

        sw.reset();
        assert!(!sw.reached(t0 + Duration::from_secs(10), Duration::from_secs(3)));
    }
}
