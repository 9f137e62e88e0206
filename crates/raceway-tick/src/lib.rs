//! Fixed-rate tick scheduler for Raceway rooms.
//!
//! A room ticks at a constant rate (50 Hz by default). Each call to
//! [`TickScheduler::wait_for_tick`] sleeps for whatever is left of the
//! current tick's budget, so a slow tick shortens the following sleep
//! instead of stretching the cadence.
//!
//! The scheduler sits in the room's `select!` loop next to its
//! cancellation signal:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown.changed() => break,
//!         tick = scheduler.wait_for_tick() => {
//!             room.tick();
//!             scheduler.record_tick_end();
//!         }
//!     }
//! }
//! ```
//!
//! All timing uses `tokio::time`, so tests can drive it with a paused
//! clock.

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

/// Default room tick rate.
pub const DEFAULT_TICK_RATE_HZ: u32 = 50;

/// What to do when the loop wakes up later than its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverrunPolicy {
    /// Forget the missed deadlines and schedule the next tick one full
    /// period from now.
    #[default]
    Skip,
    /// Keep the original cadence: the next deadline is one period after
    /// the missed one, which may already be due.
    Drop,
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Ticks per second, `1..=MAX_TICK_RATE_HZ`.
    pub tick_rate_hz: u32,
    pub policy: OverrunPolicy,
    /// Fraction of the budget (0.0–1.0) at which a slow tick is logged.
    pub budget_warn_threshold: f64,
    /// Track average and peak tick cost.
    pub metrics_enabled: bool,
    /// Upper bound of the random delay added before the first tick so
    /// rooms created together do not tick in lockstep.
    pub initial_jitter: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            policy: OverrunPolicy::default(),
            budget_warn_threshold: 0.80,
            metrics_enabled: true,
            initial_jitter: Duration::from_millis(2),
        }
    }
}

impl TickConfig {
    pub const MAX_TICK_RATE_HZ: u32 = 128;

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Clamps out-of-range values. Called by [`TickScheduler::new`].
    pub fn validated(mut self) -> Self {
        let clamped = self.tick_rate_hz.clamp(1, Self::MAX_TICK_RATE_HZ);
        if clamped != self.tick_rate_hz {
            warn!(
                rate = self.tick_rate_hz,
                clamped, "tick rate out of range, clamping"
            );
            self.tick_rate_hz = clamped;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }

    /// Length of one tick.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }
}

/// Returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Starts at 1.
    pub number: u64,
    /// How late the loop woke up relative to the deadline.
    pub late_by: Duration,
    /// Whole periods that were skipped because of lateness.
    pub skipped: u64,
}

impl Tick {
    /// A tick counts as overrun when it fired more than 10% of a period
    /// late.
    pub fn is_overrun(&self, period: Duration) -> bool {
        self.late_by > period / 10
    }
}

/// Running totals kept by the scheduler.
#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    /// Exponential moving average of tick cost (alpha = 0.1).
    pub avg_tick_time: Duration,
    pub max_tick_time: Duration,
    /// Cost of the last tick divided by the period.
    pub budget_utilization: f64,
}

/// Drives one room's loop at a fixed rate.
pub struct TickScheduler {
    config: TickConfig,
    period: Duration,
    next_deadline: Instant,
    tick_count: u64,
    tick_started: Option<Instant>,
    metrics: TickMetrics,
}

impl TickScheduler {
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let period = config.period();

        let jitter = if config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max = config.initial_jitter.as_micros() as u64;
            Duration::from_micros(rand::rng().random_range(0..max))
        };

        debug!(
            rate_hz = config.tick_rate_hz,
            period_ms = period.as_secs_f64() * 1000.0,
            policy = ?config.policy,
            "tick scheduler created"
        );

        Self {
            next_deadline: Instant::now() + period + jitter,
            config,
            period,
            tick_count: 0,
            tick_started: None,
            metrics: TickMetrics::default(),
        }
    }

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Sleeps until the next deadline and schedules the one after it.
    pub async fn wait_for_tick(&mut self) -> Tick {
        let deadline = self.next_deadline;
        time::sleep_until(deadline).await;

        let now = Instant::now();
        self.tick_count += 1;
        self.tick_started = Some(now);

        let late_by = now.saturating_duration_since(deadline);
        let overrun = late_by > self.period / 10;
        let mut skipped = 0;

        self.next_deadline = match self.config.policy {
            OverrunPolicy::Skip => {
                if overrun {
                    skipped = (late_by.as_nanos() / self.period.as_nanos()) as u64;
                    if skipped > 0 {
                        warn!(
                            tick = self.tick_count,
                            skipped,
                            late_ms = late_by.as_secs_f64() * 1000.0,
                            "tick overrun, skipping ahead"
                        );
                    }
                }
                now + self.period
            }
            OverrunPolicy::Drop => {
                if overrun {
                    warn!(
                        tick = self.tick_count,
                        late_ms = late_by.as_secs_f64() * 1000.0,
                        "tick overrun, keeping cadence"
                    );
                }
                deadline + self.period
            }
        };

        self.metrics.total_ticks += 1;
        self.metrics.total_skipped += skipped;
        if overrun {
            self.metrics.total_overruns += 1;
        }

        trace!(tick = self.tick_count, overrun, "tick");

        Tick {
            number: self.tick_count,
            late_by,
            skipped,
        }
    }

    /// Marks the end of the work done for the current tick, for budget
    /// warnings and metrics. A no-op if no tick is in progress.
    pub fn record_tick_end(&mut self) {
        let Some(started) = self.tick_started.take() else {
            return;
        };
        let elapsed = started.elapsed();
        let utilization = elapsed.as_secs_f64() / self.period.as_secs_f64();
        self.metrics.budget_utilization = utilization;

        if utilization >= 1.0 {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                "tick exceeded its budget"
            );
        } else if utilization >= self.config.budget_warn_threshold {
            debug!(
                tick = self.tick_count,
                utilization_pct = format!("{:.1}", utilization * 100.0),
                "tick close to its budget"
            );
        }

        if self.config.metrics_enabled {
            self.metrics.max_tick_time = self.metrics.max_tick_time.max(elapsed);
            let prev = self.metrics.avg_tick_time.as_secs_f64();
            self.metrics.avg_tick_time =
                Duration::from_secs_f64(prev * 0.9 + elapsed.as_secs_f64() * 0.1);
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.config.tick_rate_hz
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }
}
