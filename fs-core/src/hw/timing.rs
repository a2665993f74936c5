//! Real-time pacing and the estimator-backed RPM probe

use std::time::Duration;

use crate::engine::SharedEstimator;
use crate::hw::{Pacer, RpmProbe};

/// Sleeps the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn hold(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Reads RPM from the shared tach estimator after waiting out a window
///
/// The window is longer than the staleness timeout, so a fan that stopped
/// before the window reads as Cold (0 RPM) by the time it closes.
#[derive(Debug, Clone)]
pub struct EstimatorProbe<P: Pacer = ThreadPacer> {
    estimator: SharedEstimator,
    pacer: P,
}

impl EstimatorProbe<ThreadPacer> {
    pub fn new(estimator: SharedEstimator) -> Self {
        Self::with_pacer(estimator, ThreadPacer)
    }
}

impl<P: Pacer> EstimatorProbe<P> {
    pub fn with_pacer(estimator: SharedEstimator, pacer: P) -> Self {
        Self { estimator, pacer }
    }

    pub fn estimator(&self) -> &SharedEstimator {
        &self.estimator
    }
}

impl<P: Pacer> RpmProbe for EstimatorProbe<P> {
    fn sample_rpm(&mut self, window: Duration) -> f64 {
        self.pacer.hold(window);
        self.estimator.rpm().unwrap_or(0.0)
    }

    fn current_rpm(&self) -> Option<f64> {
        self.estimator.rpm()
    }
}
