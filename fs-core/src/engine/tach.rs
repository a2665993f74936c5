//! Tachometer frequency estimation
//!
//! Fan tachometers pull a sense line low a fixed number of times per
//! revolution. [`EdgeFrequencyEstimator`] turns the timestamps of those edges
//! into a smoothed rotation frequency:
//!
//! - **Cold**: no reference edge. Initial state, and re-entered whenever the
//!   gap since the previous edge exceeds the staleness window.
//! - **Armed**: one reference edge, no period yet.
//! - **Tracking**: a period estimate exists and is smoothed by an adaptive
//!   exponential filter whose weight is `smoothing * 1e6 / period`, so slow
//!   fans converge quickly and fast fans are damped more.
//!
//! Tick unit is microseconds of the monotonic clock.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::constants::tach as tach_const;
use crate::data::TachConfig;

/// Estimator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TachState {
    Cold,
    Armed,
    Tracking,
}

/// Adaptive exponential period filter fed with edge timestamps
#[derive(Debug, Clone)]
pub struct EdgeFrequencyEstimator {
    config: TachConfig,
    last_edge_tick: Option<u64>,
    raw_period: Option<f64>,
    smoothed_period: Option<f64>,
    sample_count: u64,
}

impl EdgeFrequencyEstimator {
    pub fn new(config: TachConfig) -> Self {
        Self {
            config,
            last_edge_tick: None,
            raw_period: None,
            smoothed_period: None,
            sample_count: 0,
        }
    }

    fn stale_ticks(&self) -> u64 {
        self.config.stale_timeout.as_micros() as u64
    }

    fn is_stale_at(&self, tick: u64) -> bool {
        match self.last_edge_tick {
            Some(last) => tick.saturating_sub(last) > self.stale_ticks(),
            None => true,
        }
    }

    /// Drop the estimate and the reference edge
    pub fn reset(&mut self) {
        self.last_edge_tick = None;
        self.raw_period = None;
        self.smoothed_period = None;
        self.sample_count = 0;
    }

    /// Feed one edge timestamp
    pub fn on_edge(&mut self, tick: u64) {
        if self.is_stale_at(tick) {
            self.reset();
            self.last_edge_tick = Some(tick);
            return;
        }

        let Some(last) = self.last_edge_tick else {
            self.last_edge_tick = Some(tick);
            return;
        };

        let interval = tick.saturating_sub(last);
        if interval == 0 {
            // duplicate timestamp
            return;
        }
        self.last_edge_tick = Some(tick);

        let period = interval as f64 * self.config.edges_per_revolution;
        self.raw_period = Some(period);

        let smoothed = match self.smoothed_period {
            None => period,
            Some(previous) => {
                let weight = self.config.smoothing_factor * tach_const::TICKS_PER_SECOND / period;
                (previous * weight + period) / (weight + 1.0)
            }
        };
        self.smoothed_period = Some(smoothed);
        self.sample_count += 1;
    }

    /// Explicit timeout check; discards the estimate after a silent window
    pub fn expire(&mut self, now_tick: u64) {
        if self.last_edge_tick.is_some() && self.is_stale_at(now_tick) {
            self.reset();
        }
    }

    pub fn state(&self) -> TachState {
        match (self.last_edge_tick, self.smoothed_period) {
            (None, _) => TachState::Cold,
            (Some(_), None) => TachState::Armed,
            (Some(_), Some(_)) => TachState::Tracking,
        }
    }

    /// Smoothed full-revolution period in microseconds
    pub fn period_micros(&self) -> Option<f64> {
        self.smoothed_period
    }

    /// Last unsmoothed full-revolution period in microseconds
    pub fn raw_period_micros(&self) -> Option<f64> {
        self.raw_period
    }

    pub fn frequency_hz(&self) -> Option<f64> {
        self.smoothed_period
            .filter(|p| *p > 0.0)
            .map(|p| tach_const::TICKS_PER_SECOND / p)
    }

    pub fn rpm(&self) -> Option<f64> {
        self.frequency_hz().map(|hz| hz * tach_const::SECONDS_PER_MINUTE)
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }
}

/// Read-only view of the estimator at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TachSnapshot {
    pub state: TachState,
    pub period_micros: Option<f64>,
    pub frequency_hz: Option<f64>,
    pub rpm: Option<f64>,
    pub sample_count: u64,
}

/// Estimator shared between the edge callback (writer) and the control thread (reader)
///
/// All fields are updated together under one lock.
#[derive(Debug, Clone)]
pub struct SharedEstimator {
    inner: Arc<Mutex<EdgeFrequencyEstimator>>,
}

impl SharedEstimator {
    pub fn new(config: TachConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EdgeFrequencyEstimator::new(config))),
        }
    }

    pub fn on_edge(&self, tick: u64) {
        self.inner.lock().on_edge(tick);
    }

    pub fn reset(&self) {
        self.inner.lock().reset();
    }

    /// Expire stale state against `now_tick` and return a consistent view
    pub fn snapshot_at(&self, now_tick: u64) -> TachSnapshot {
        let mut guard = self.inner.lock();
        guard.expire(now_tick);
        TachSnapshot {
            state: guard.state(),
            period_micros: guard.period_micros(),
            frequency_hz: guard.frequency_hz(),
            rpm: guard.rpm(),
            sample_count: guard.sample_count(),
        }
    }

    /// Snapshot against the monotonic clock
    pub fn snapshot(&self) -> TachSnapshot {
        self.snapshot_at(monotonic_micros())
    }

    pub fn rpm(&self) -> Option<f64> {
        self.snapshot().rpm
    }
}

/// Counts edges over a fixed window
///
/// Cruder than the estimator but immune to jitter; used for one-shot
/// measurements.
#[derive(Debug, Clone)]
pub struct PulseCounter {
    edges_per_revolution: f64,
    count: u64,
}

impl PulseCounter {
    pub fn new(edges_per_revolution: f64) -> Self {
        Self {
            edges_per_revolution,
            count: 0,
        }
    }

    pub fn on_edge(&mut self) {
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Revolutions per second over `window`, 0 when too few pulses were seen
    pub fn frequency_hz(&self, window: Duration) -> f64 {
        let secs = window.as_secs_f64();
        if self.count <= tach_const::MIN_PULSE_COUNT || secs <= 0.0 {
            return 0.0;
        }
        self.count as f64 / secs / self.edges_per_revolution
    }

    pub fn rpm(&self, window: Duration) -> f64 {
        self.frequency_hz(window) * tach_const::SECONDS_PER_MINUTE
    }
}

/// Microseconds of CLOCK_MONOTONIC, the time base of GPIO edge events
pub fn monotonic_micros() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: clock_gettime only writes into the timespec we pass, which is valid and initialized.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return 0;
    }
    (ts.tv_sec as u64) * 1_000_000 + (ts.tv_nsec as u64) / 1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> EdgeFrequencyEstimator {
        EdgeFrequencyEstimator::new(TachConfig::default())
    }

    #[test]
    fn test_starts_cold() {
        let est = estimator();
        assert_eq!(est.state(), TachState::Cold);
        assert_eq!(est.frequency_hz(), None);
        assert_eq!(est.rpm(), None);
    }

    #[test]
    fn test_single_edge_arms() {
        let mut est = estimator();
        est.on_edge(1_000);
        assert_eq!(est.state(), TachState::Armed);
        assert_eq!(est.period_micros(), None);
    }

    #[test]
    fn test_two_edges_half_second_apart() {
        let mut est = estimator();
        est.on_edge(10_000_000);
        est.on_edge(10_500_000);
        assert_eq!(est.state(), TachState::Tracking);
        assert!((est.period_micros().unwrap() - 1_000_000.0).abs() < 1e-6);
        assert!((est.frequency_hz().unwrap() - 1.0).abs() < 1e-9);
        assert!((est.rpm().unwrap() - 60.0).abs() < 1e-6);
        assert_eq!(est.sample_count(), 1);
    }

    #[test]
    fn test_duplicate_tick_ignored() {
        let mut est = estimator();
        est.on_edge(0);
        est.on_edge(10_000);
        let before = est.period_micros();
        est.on_edge(10_000);
        assert_eq!(est.period_micros(), before);
        assert_eq!(est.sample_count(), 1);
    }

    #[test]
    fn test_adaptive_weight() {
        let mut est = estimator();
        est.on_edge(0);
        est.on_edge(10_000); // period 20_000
        est.on_edge(25_000); // period 30_000
        let weight = 0.25 * 1_000_000.0 / 30_000.0;
        let expected = (20_000.0 * weight + 30_000.0) / (weight + 1.0);
        assert!((est.period_micros().unwrap() - expected).abs() < 1e-6);
        assert_eq!(est.raw_period_micros(), Some(30_000.0));
        assert_eq!(est.sample_count(), 2);
    }

    #[test]
    fn test_converges_on_steady_signal() {
        let mut est = estimator();
        // 1800 rpm -> 30 rev/s -> edge every 1/60 s
        let step = 16_667u64;
        let mut tick = 0;
        est.on_edge(tick);
        est.on_edge(tick + 20_000);
        tick += 20_000;
        for _ in 0..2_000 {
            tick += step;
            est.on_edge(tick);
        }
        let rpm = est.rpm().unwrap();
        assert!((rpm - 1800.0).abs() < 5.0, "rpm {}", rpm);
    }

    #[test]
    fn test_stale_gap_resets_before_new_edge() {
        let mut est = estimator();
        est.on_edge(0);
        est.on_edge(500_000);
        assert!(est.frequency_hz().is_some());

        est.on_edge(2_000_000);
        assert_eq!(est.frequency_hz(), None);
        assert_eq!(est.state(), TachState::Armed);
        assert_eq!(est.sample_count(), 0);

        est.on_edge(2_250_000);
        assert!((est.period_micros().unwrap() - 500_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_gap_of_exactly_timeout_is_not_stale() {
        let mut est = estimator();
        est.on_edge(0);
        est.on_edge(1_000_000);
        assert_eq!(est.state(), TachState::Tracking);
    }

    #[test]
    fn test_expire_without_edges() {
        let mut est = estimator();
        est.on_edge(0);
        est.on_edge(100_000);
        est.expire(900_000);
        assert!(est.rpm().is_some());
        est.expire(1_200_000);
        assert_eq!(est.state(), TachState::Cold);
        assert_eq!(est.rpm(), None);
    }

    #[test]
    fn test_edges_per_revolution_is_configurable() {
        let mut est = EdgeFrequencyEstimator::new(TachConfig {
            edges_per_revolution: 4.0,
            ..TachConfig::default()
        });
        est.on_edge(0);
        est.on_edge(250_000);
        assert!((est.frequency_hz().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_shared_snapshot_expires() {
        let shared = SharedEstimator::new(TachConfig::default());
        shared.on_edge(0);
        shared.on_edge(500_000);
        assert!(shared.snapshot_at(600_000).rpm.is_some());
        let snap = shared.snapshot_at(5_000_000);
        assert_eq!(snap.state, TachState::Cold);
        assert_eq!(snap.rpm, None);
    }

    #[test]
    fn test_shared_across_threads() {
        let shared = SharedEstimator::new(TachConfig::default());
        let writer = shared.clone();
        let handle = std::thread::spawn(move || {
            let mut tick = 0;
            for _ in 0..100 {
                writer.on_edge(tick);
                tick += 10_000;
            }
            tick
        });
        let last_tick = handle.join().unwrap();
        let snap = shared.snapshot_at(last_tick);
        assert!((snap.frequency_hz.unwrap() - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_pulse_counter() {
        let mut counter = PulseCounter::new(2.0);
        for _ in 0..10 {
            counter.on_edge();
        }
        assert_eq!(counter.rpm(Duration::from_secs(1)), 0.0);
        for _ in 0..90 {
            counter.on_edge();
        }
        // 100 edges in 2.5 s, 2 per rev -> 20 Hz -> 1200 rpm
        assert!((counter.rpm(Duration::from_millis(2500)) - 1200.0).abs() < 1e-9);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let a = monotonic_micros();
        std::thread::sleep(Duration::from_millis(2));
        let b = monotonic_micros();
        assert!(b > a);
    }
}
