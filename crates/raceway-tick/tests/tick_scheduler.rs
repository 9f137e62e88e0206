//! Integration tests for the fixed-rate tick scheduler.
//!
//! Every async test runs with Tokio's clock paused, so `sleep_until`
//! resolves as soon as the runtime is idle and `time::advance` stands in
//! for slow tick work.

use std::time::Duration;

use raceway_tick::{OverrunPolicy, TickConfig, TickScheduler};

fn no_jitter(rate: u32) -> TickConfig {
    TickConfig {
        initial_jitter: Duration::ZERO,
        ..TickConfig::with_rate(rate)
    }
}

#[test]
fn test_default_rate_is_50hz() {
    let cfg = TickConfig::default();
    assert_eq!(cfg.tick_rate_hz, 50);
    assert_eq!(cfg.period(), Duration::from_millis(20));
}

#[test]
fn test_rate_is_clamped() {
    assert_eq!(TickScheduler::with_rate(0).tick_rate_hz(), 1);
    assert_eq!(
        TickScheduler::with_rate(1000).tick_rate_hz(),
        TickConfig::MAX_TICK_RATE_HZ
    );
}

#[test]
fn test_thresholds_are_clamped() {
    let cfg = TickConfig {
        budget_warn_threshold: 3.0,
        ..TickConfig::default()
    }
    .validated();
    assert_eq!(cfg.budget_warn_threshold, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_ticks_fire_once_per_period() {
    let mut s = TickScheduler::new(no_jitter(50));
    let start = tokio::time::Instant::now();

    for expected in 1..=5 {
        let tick = s.wait_for_tick().await;
        assert_eq!(tick.number, expected);
        assert_eq!(tick.skipped, 0);
        assert!(!tick.is_overrun(s.period()));
    }
    assert_eq!(start.elapsed(), Duration::from_millis(100));
    assert_eq!(s.tick_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_slow_tick_shortens_next_sleep() {
    let mut s = TickScheduler::new(no_jitter(10));

    s.wait_for_tick().await;
    let before = tokio::time::Instant::now();
    // Half a period of work does not push the next tick back.
    tokio::time::advance(Duration::from_millis(50)).await;
    s.record_tick_end();
    s.wait_for_tick().await;
    assert_eq!(before.elapsed(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_skip_policy_counts_missed_periods() {
    let mut s = TickScheduler::new(no_jitter(10));
    s.wait_for_tick().await;

    // Sleep well past the next deadline (100 ms) without ticking.
    tokio::time::advance(Duration::from_millis(450)).await;
    let tick = s.wait_for_tick().await;

    assert_eq!(tick.late_by, Duration::from_millis(350));
    assert_eq!(tick.skipped, 3);
    assert!(tick.is_overrun(s.period()));
    assert_eq!(s.metrics().total_overruns, 1);
    assert_eq!(s.metrics().total_skipped, 3);

    // Skip schedules from "now": the next tick is a full period away.
    let before = tokio::time::Instant::now();
    s.wait_for_tick().await;
    assert_eq!(before.elapsed(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_drop_policy_keeps_cadence() {
    let mut s = TickScheduler::new(TickConfig {
        policy: OverrunPolicy::Drop,
        ..no_jitter(10)
    });
    s.wait_for_tick().await;

    tokio::time::advance(Duration::from_millis(150)).await;
    let late = s.wait_for_tick().await;
    assert_eq!(late.skipped, 0);
    assert_eq!(late.late_by, Duration::from_millis(50));

    // The following deadline is at 300 ms, only 50 ms away.
    let before = tokio::time::Instant::now();
    s.wait_for_tick().await;
    assert_eq!(before.elapsed(), Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_record_tick_end_updates_metrics() {
    let mut s = TickScheduler::new(no_jitter(10));
    s.wait_for_tick().await;
    tokio::time::advance(Duration::from_millis(40)).await;
    s.record_tick_end();

    let m = s.metrics();
    assert_eq!(m.total_ticks, 1);
    assert_eq!(m.max_tick_time, Duration::from_millis(40));
    assert!((m.budget_utilization - 0.4).abs() < 1e-9);
    assert!(m.avg_tick_time > Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_record_tick_end_without_tick_is_noop() {
    let mut s = TickScheduler::new(no_jitter(10));
    s.record_tick_end();
    assert_eq!(s.metrics().max_tick_time, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_jitter_delays_only_the_first_tick() {
    let mut s = TickScheduler::new(TickConfig {
        initial_jitter: Duration::from_millis(5),
        ..TickConfig::with_rate(10)
    });
    let start = tokio::time::Instant::now();
    s.wait_for_tick().await;
    let first = start.elapsed();
    assert!(first >= Duration::from_millis(100));
    assert!(first < Duration::from_millis(105));
}
