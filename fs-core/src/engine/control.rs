//! Periodic control loop
//!
//! One tick: read temperature -> evaluate the speed curve -> commit the duty
//! cycle -> notify reporters. The loop owns all mutable controller state; the
//! only shared piece is the tach estimator behind the RPM probe.
//!
//! # Failure handling
//! - Sensor read failures skip the tick
//! - PWM write failures are returned (fatal to the caller)
//! - Reporter failures are logged per sink and never stop the loop

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::data::{ControllerConfig, Report};
use crate::engine::boost::{Actuators, BoostSequencer, Commit, PwmOutputState};
use crate::engine::curve;
use crate::error::Result;
use crate::hw::{Pacer, PwmSink, RpmProbe, TemperatureSource, ThreadPacer};

/// Sink for the per-tick state record
pub trait Reporter: Send {
    /// Short name used in log messages
    fn name(&self) -> &str;

    fn report(&mut self, report: &Report) -> Result<()>;

    /// Called once after the final shutdown report
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// What a tick did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Temperature unavailable, nothing changed
    Skipped,
    Applied { temperature: f64, commit: Commit },
}

/// The controller: owns configuration, hardware handles and output state
pub struct ControlLoop {
    config: ControllerConfig,
    sequencer: BoostSequencer,
    output: PwmOutputState,
    sensor: Box<dyn TemperatureSource>,
    pwm: Box<dyn PwmSink>,
    pacer: Box<dyn Pacer + Send>,
    probe: Option<Box<dyn RpmProbe + Send>>,
    reporters: Vec<Box<dyn Reporter>>,
    last_temperature: Option<f64>,
}

impl ControlLoop {
    pub fn new(
        config: ControllerConfig,
        sensor: Box<dyn TemperatureSource>,
        pwm: Box<dyn PwmSink>,
    ) -> Self {
        Self {
            sequencer: BoostSequencer::new(&config),
            config,
            output: PwmOutputState::new(),
            sensor,
            pwm,
            pacer: Box::new(ThreadPacer),
            probe: None,
            reporters: Vec::new(),
            last_temperature: None,
        }
    }

    pub fn with_pacer(mut self, pacer: Box<dyn Pacer + Send>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_probe(mut self, probe: Box<dyn RpmProbe + Send>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Level last committed on the configured pin
    pub fn committed_percent(&self) -> f64 {
        self.output.committed(self.config.pwm.pin)
    }

    pub fn last_temperature(&self) -> Option<f64> {
        self.last_temperature
    }

    fn actuators(&mut self) -> Actuators<'_> {
        Actuators {
            pwm: self.pwm.as_mut(),
            pacer: self.pacer.as_mut(),
            probe: match self.probe.as_mut() {
                Some(probe) => Some(probe.as_mut() as &mut dyn RpmProbe),
                None => None,
            },
        }
    }

    fn current_rpm(&self) -> Option<f64> {
        self.probe.as_ref().and_then(|p| p.current_rpm())
    }

    /// Push a record to every reporter, logging failures
    fn notify(&mut self, report: &Report) {
        for reporter in &mut self.reporters {
            if let Err(e) = reporter.report(report) {
                warn!(sink = reporter.name(), "Report failed: {}", e);
            }
        }
    }

    /// Run one control step
    pub fn tick(&mut self) -> Result<TickOutcome> {
        let temperature = match self.sensor.read_celsius() {
            Ok(t) => t,
            Err(e) => {
                warn!("Temperature read failed, skipping tick: {}", e);
                return Ok(TickOutcome::Skipped);
            }
        };
        self.last_temperature = Some(temperature);

        let pin = self.config.pwm.pin;
        let requested = curve::speed(temperature, &self.config.curve);
        let previous = self.output.committed(pin);

        let sequencer = self.sequencer;
        let commit = {
            let mut hw = self.actuators();
            sequencer.apply_duty_cycle(&mut hw, pin, requested, previous)?
        };
        self.output.record(pin, commit.committed);

        let rpm = self.current_rpm();
        debug!(
            temperature,
            percent = commit.committed,
            rpm = rpm.unwrap_or(0.0).round(),
            "Control tick"
        );

        let report = Report::now(temperature, commit.committed, rpm);
        self.notify(&report);

        Ok(TickOutcome::Applied {
            temperature,
            commit,
        })
    }

    /// Tick every `interval` until `wait` reports a shutdown request
    ///
    /// `wait` blocks for up to the given duration and returns `true` when the
    /// loop should stop. An interval under one second runs a single tick.
    pub fn run<W>(&mut self, interval: Duration, mut wait: W) -> Result<()>
    where
        W: FnMut(Duration) -> bool,
    {
        loop {
            self.tick()?;
            if interval < Duration::from_secs(1) {
                info!("Interval below one second, exiting after a single tick");
                return Ok(());
            }
            if wait(interval) {
                return Ok(());
            }
        }
    }

    /// Commit the exit level without verification, flush a final report and close the sinks
    pub fn shutdown(&mut self, exit_percent: f64) -> Result<Commit> {
        let pin = self.config.pwm.pin;
        let previous = self.output.committed(pin);

        let sequencer = self.sequencer;
        let commit = {
            let mut hw = self.actuators();
            sequencer.apply_unverified(&mut hw, pin, exit_percent, previous)?
        };
        self.output.record(pin, commit.committed);
        info!(pin, percent = commit.committed, "Exit duty cycle committed");

        let report = Report::now(
            self.last_temperature.unwrap_or(0.0),
            commit.committed,
            self.current_rpm(),
        );
        self.notify(&report);

        self.close();
        Ok(commit)
    }

    /// Close every reporter; sinks are not used afterwards
    pub fn close(&mut self) {
        for reporter in &mut self.reporters {
            if let Err(e) = reporter.finish() {
                warn!(sink = reporter.name(), "Closing sink failed: {}", e);
            }
        }
        self.reporters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StallCheck;
    use crate::error::FanspeedError;
    use crate::hw::{MockPwmSink, MockTemperatureSource};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct NoWait;

    impl Pacer for NoWait {
        fn hold(&mut self, _duration: Duration) {}
    }

    #[derive(Clone, Default)]
    struct SharedLog {
        reports: Arc<Mutex<Vec<Report>>>,
        finished: Arc<Mutex<bool>>,
    }

    struct CollectingReporter {
        log: SharedLog,
    }

    impl Reporter for CollectingReporter {
        fn name(&self) -> &str {
            "collect"
        }

        fn report(&mut self, report: &Report) -> Result<()> {
            self.log.reports.lock().push(*report);
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            *self.log.finished.lock() = true;
            Ok(())
        }
    }

    struct FailingReporter;

    impl Reporter for FailingReporter {
        fn name(&self) -> &str {
            "broken"
        }

        fn report(&mut self, _report: &Report) -> Result<()> {
            Err(FanspeedError::Command("exit status 1".into()))
        }
    }

    fn sensor_reading(values: Vec<f64>) -> MockTemperatureSource {
        let mut sensor = MockTemperatureSource::new();
        let mut values = values.into_iter();
        sensor
            .expect_read_celsius()
            .returning(move || values.next().ok_or_else(|| FanspeedError::generic("no more samples")));
        sensor
    }

    fn accepting_pwm() -> MockPwmSink {
        let mut pwm = MockPwmSink::new();
        pwm.expect_write_pwm().returning(|_, _, _| Ok(()));
        pwm
    }

    fn quiet_config() -> ControllerConfig {
        let mut config = ControllerConfig::default();
        config.stall.enabled = false;
        config
    }

    #[test]
    fn test_tick_commits_curve_value() {
        let log = SharedLog::default();
        let mut control = ControlLoop::new(
            quiet_config(),
            Box::new(sensor_reading(vec![57.5])),
            Box::new(accepting_pwm()),
        )
        .with_pacer(Box::new(NoWait))
        .with_reporter(Box::new(CollectingReporter { log: log.clone() }));

        let outcome = control.tick().unwrap();
        match outcome {
            TickOutcome::Applied { temperature, commit } => {
                assert_eq!(temperature, 57.5);
                assert!((commit.committed - 70.0).abs() < 1e-9);
                assert!(!commit.boosted);
                assert_eq!(commit.check, StallCheck::Skipped);
            }
            TickOutcome::Skipped => panic!("tick should apply"),
        }
        assert!((control.committed_percent() - 70.0).abs() < 1e-9);

        let reports = log.reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].temperature, 57.5);
        assert_eq!(reports[0].duty_cycle_percent, 70.0);
        assert_eq!(reports[0].rpm, 0);
    }

    #[test]
    fn test_sensor_failure_skips_tick() {
        let log = SharedLog::default();
        let mut pwm = MockPwmSink::new();
        pwm.expect_write_pwm().never();
        let mut control = ControlLoop::new(
            quiet_config(),
            Box::new(sensor_reading(vec![])),
            Box::new(pwm),
        )
        .with_reporter(Box::new(CollectingReporter { log: log.clone() }));

        assert_eq!(control.tick().unwrap(), TickOutcome::Skipped);
        assert!(log.reports.lock().is_empty());
        assert_eq!(control.last_temperature(), None);
    }

    #[test]
    fn test_pwm_failure_is_fatal() {
        let mut pwm = MockPwmSink::new();
        pwm.expect_write_pwm()
            .returning(|pin, _, _| Err(FanspeedError::pwm_write(pin, "no such device")));
        let mut control = ControlLoop::new(
            quiet_config(),
            Box::new(sensor_reading(vec![60.0])),
            Box::new(pwm),
        );

        assert!(matches!(control.tick(), Err(FanspeedError::PwmWrite { .. })));
    }

    #[test]
    fn test_reporter_failure_is_isolated() {
        let log = SharedLog::default();
        let mut control = ControlLoop::new(
            quiet_config(),
            Box::new(sensor_reading(vec![50.0, 52.0])),
            Box::new(accepting_pwm()),
        )
        .with_reporter(Box::new(FailingReporter))
        .with_reporter(Box::new(CollectingReporter { log: log.clone() }));

        control.tick().unwrap();
        control.tick().unwrap();
        assert_eq!(log.reports.lock().len(), 2);
    }

    #[test]
    fn test_run_single_tick_for_short_interval() {
        let mut control = ControlLoop::new(
            quiet_config(),
            Box::new(sensor_reading(vec![40.0, 40.0])),
            Box::new(accepting_pwm()),
        );
        let mut waits = 0;
        control
            .run(Duration::from_millis(0), |_| {
                waits += 1;
                false
            })
            .unwrap();
        assert_eq!(waits, 0);
    }

    #[test]
    fn test_run_stops_when_wait_requests_it() {
        let log = SharedLog::default();
        let mut control = ControlLoop::new(
            quiet_config(),
            Box::new(sensor_reading(vec![40.0, 50.0, 60.0, 70.0])),
            Box::new(accepting_pwm()),
        )
        .with_reporter(Box::new(CollectingReporter { log: log.clone() }));

        let mut waits = 0;
        control
            .run(Duration::from_secs(10), |d| {
                assert_eq!(d, Duration::from_secs(10));
                waits += 1;
                waits == 3
            })
            .unwrap();
        assert_eq!(log.reports.lock().len(), 3);
    }

    #[test]
    fn test_shutdown_commits_exit_level_and_finishes() {
        let log = SharedLog::default();
        let mut control = ControlLoop::new(
            ControllerConfig::default(),
            Box::new(sensor_reading(vec![])),
            Box::new(accepting_pwm()),
        )
        .with_pacer(Box::new(NoWait))
        .with_reporter(Box::new(CollectingReporter { log: log.clone() }));

        let commit = control.shutdown(75.0).unwrap();
        assert_eq!(commit.committed, 75.0);
        assert_eq!(commit.check, StallCheck::Skipped);
        assert!(*log.finished.lock());
        let reports = log.reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].duty_cycle_percent, 75.0);
    }
}
