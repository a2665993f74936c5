//! Committing duty cycles: startup boost and stall verification
//!
//! # Boost
//!
//! Many small fans will not start from rest at a low duty cycle. When the
//! previously committed level of a pin is 0 and the new request is below the
//! low-speed threshold, the output is stepped through a short ramp before
//! settling:
//!
//! ```text
//! requested (100 ms) -> boost (250 ms) -> mid1 (150 ms) -> mid2 (150 ms) -> requested
//! mid1 = (boost + requested) / 2, mid2 = (mid1 + requested) / 2
//! ```
//!
//! # Stall verification
//!
//! After a nonzero level is written the fan gets a settle delay, then RPM is
//! sampled over a window. Zero readings are retried over shorter windows; if
//! every retry reads zero the committed level escalates. The hardware output
//! is left as written, only the remembered level changes.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::constants::{curve as curve_const, pwm as pwm_const};
use crate::data::{BoostConfig, ControllerConfig, PwmConfig, StallConfig};
use crate::error::Result;
use crate::hw::{Pacer, PwmSink, RpmProbe};

/// One level of the boost ramp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampStep {
    pub percent: f64,
    pub hold: Duration,
}

/// Ramp levels written before committing `requested`
pub fn boost_ramp(requested: f64, config: &BoostConfig) -> Vec<RampStep> {
    let first_mid = (config.boost_percent + requested) / 2.0;
    let second_mid = (first_mid + requested) / 2.0;
    vec![
        RampStep {
            percent: requested,
            hold: config.initial_hold,
        },
        RampStep {
            percent: config.boost_percent,
            hold: config.boost_hold,
        },
        RampStep {
            percent: first_mid,
            hold: config.step_hold,
        },
        RampStep {
            percent: second_mid,
            hold: config.step_hold,
        },
    ]
}

/// Last committed duty cycle per PWM pin, 0 for pins never written
#[derive(Debug, Clone, Default)]
pub struct PwmOutputState {
    committed: HashMap<u8, f64>,
}

impl PwmOutputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committed(&self, pin: u8) -> f64 {
        self.committed.get(&pin).copied().unwrap_or(0.0)
    }

    pub fn record(&mut self, pin: u8, percent: f64) {
        self.committed.insert(pin, percent);
    }
}

/// Result of the rotation check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StallCheck {
    /// Disabled, no probe, or nothing to check (level 0)
    Skipped,
    Spinning { rpm: f64 },
    Stalled,
}

/// Outcome of one duty cycle commit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Commit {
    pub pin: u8,
    /// Request after clamping and the floor rule
    pub requested: f64,
    /// Level remembered for the pin
    pub committed: f64,
    pub boosted: bool,
    pub check: StallCheck,
}

impl Commit {
    pub fn escalated(&self) -> bool {
        self.check == StallCheck::Stalled
    }
}

/// Hardware the sequencer drives for one commit
pub struct Actuators<'a> {
    pub pwm: &'a mut dyn PwmSink,
    pub pacer: &'a mut dyn Pacer,
    pub probe: Option<&'a mut dyn RpmProbe>,
}

/// Applies requested duty cycles to a PWM output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoostSequencer {
    pwm: PwmConfig,
    boost: BoostConfig,
    stall: StallConfig,
}

impl BoostSequencer {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            pwm: config.pwm,
            boost: config.boost,
            stall: config.stall,
        }
    }

    /// 0 to a low nonzero level
    pub fn needs_boost(&self, previous: f64, requested: f64) -> bool {
        previous == 0.0 && requested > 0.0 && requested < self.boost.low_speed_threshold
    }

    fn normalize(&self, requested: f64) -> f64 {
        let clamped = if requested.is_nan() {
            0.0
        } else {
            requested.clamp(0.0, curve_const::MAX_PERCENT)
        };
        if clamped < self.pwm.floor_percent {
            0.0
        } else {
            clamped
        }
    }

    fn write(&self, pwm: &mut dyn PwmSink, pin: u8, percent: f64) -> Result<()> {
        pwm.write_pwm(pin, self.pwm.frequency_hz, pwm_const::to_fraction(percent))
    }

    /// Drive `pin` to `requested`, boosting and verifying as needed
    ///
    /// PWM write failures are returned to the caller.
    pub fn apply_duty_cycle(
        &self,
        hw: &mut Actuators<'_>,
        pin: u8,
        requested: f64,
        previous: f64,
    ) -> Result<Commit> {
        self.commit(hw, pin, requested, previous, true)
    }

    /// Same as [`apply_duty_cycle`](Self::apply_duty_cycle) without the rotation check
    pub fn apply_unverified(
        &self,
        hw: &mut Actuators<'_>,
        pin: u8,
        requested: f64,
        previous: f64,
    ) -> Result<Commit> {
        self.commit(hw, pin, requested, previous, false)
    }

    fn commit(
        &self,
        hw: &mut Actuators<'_>,
        pin: u8,
        requested: f64,
        previous: f64,
        verify: bool,
    ) -> Result<Commit> {
        let requested = self.normalize(requested);

        let boosted = self.needs_boost(previous, requested);
        if boosted {
            debug!(pin, percent = requested, "Starting from rest, running boost ramp");
            for step in boost_ramp(requested, &self.boost) {
                self.write(hw.pwm, pin, step.percent)?;
                hw.pacer.hold(step.hold);
            }
        }
        self.write(hw.pwm, pin, requested)?;

        let check = match hw.probe.as_deref_mut() {
            Some(probe) if verify && self.stall.enabled && requested > 0.0 => {
                self.verify_rotation(hw.pacer, probe)
            }
            _ => StallCheck::Skipped,
        };

        let committed = if check == StallCheck::Stalled {
            warn!(
                pin,
                requested,
                escalated = self.stall.escalation_percent,
                "Fan stall detected, escalating duty cycle"
            );
            self.stall.escalation_percent
        } else {
            requested
        };

        Ok(Commit {
            pin,
            requested,
            committed,
            boosted,
            check,
        })
    }

    fn verify_rotation(&self, pacer: &mut dyn Pacer, probe: &mut dyn RpmProbe) -> StallCheck {
        pacer.hold(self.stall.settle_delay);
        let mut rpm = probe.sample_rpm(self.stall.sample_window);

        let mut attempt = 0;
        while rpm <= 0.0 && attempt < self.stall.retries {
            attempt += 1;
            debug!(attempt, "No rotation measured, sampling again");
            rpm = probe.sample_rpm(self.stall.retry_window);
        }

        if rpm > 0.0 {
            StallCheck::Spinning { rpm }
        } else {
            StallCheck::Stalled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FanspeedError;
    use crate::hw::{MockPwmSink, MockRpmProbe};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct RecordingPwm {
        writes: Vec<(u8, u32, f64)>,
    }

    impl RecordingPwm {
        fn percents(&self) -> Vec<f64> {
            self.writes.iter().map(|w| w.2 * 100.0).collect()
        }
    }

    impl PwmSink for RecordingPwm {
        fn write_pwm(&mut self, pin: u8, frequency_hz: u32, duty_fraction: f64) -> Result<()> {
            self.writes.push((pin, frequency_hz, duty_fraction));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingPacer {
        holds: Vec<Duration>,
    }

    impl Pacer for RecordingPacer {
        fn hold(&mut self, duration: Duration) {
            self.holds.push(duration);
        }
    }

    struct ScriptedProbe {
        readings: VecDeque<f64>,
        windows: Vec<Duration>,
    }

    impl ScriptedProbe {
        fn new(readings: &[f64]) -> Self {
            Self {
                readings: readings.iter().copied().collect(),
                windows: Vec::new(),
            }
        }
    }

    impl RpmProbe for ScriptedProbe {
        fn sample_rpm(&mut self, window: Duration) -> f64 {
            self.windows.push(window);
            self.readings.pop_front().unwrap_or(0.0)
        }

        fn current_rpm(&self) -> Option<f64> {
            None
        }
    }

    fn sequencer() -> BoostSequencer {
        BoostSequencer::new(&ControllerConfig::default())
    }

    fn close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn test_ramp_levels() {
        let steps = boost_ramp(35.0, &BoostConfig::default());
        let levels: Vec<f64> = steps.iter().map(|s| s.percent).collect();
        assert!(close(&levels, &[35.0, 100.0, 67.5, 51.25]));
        let holds: Vec<u64> = steps.iter().map(|s| s.hold.as_millis() as u64).collect();
        assert_eq!(holds, vec![100, 250, 150, 150]);
    }

    #[test]
    fn test_boost_from_rest() {
        let mut pwm = RecordingPwm::default();
        let mut pacer = RecordingPacer::default();
        let mut hw = Actuators {
            pwm: &mut pwm,
            pacer: &mut pacer,
            probe: None,
        };

        let commit = sequencer().apply_duty_cycle(&mut hw, 19, 35.0, 0.0).unwrap();

        assert!(commit.boosted);
        assert_eq!(commit.committed, 35.0);
        assert_eq!(commit.check, StallCheck::Skipped);
        assert!(close(&pwm.percents(), &[35.0, 100.0, 67.5, 51.25, 35.0]));
        assert!(pwm.writes.iter().all(|w| w.0 == 19 && w.1 == 32_000));
        assert_eq!(
            pacer.holds,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(250),
                Duration::from_millis(150),
                Duration::from_millis(150),
            ]
        );
    }

    #[test]
    fn test_no_boost_when_already_running() {
        let mut pwm = RecordingPwm::default();
        let mut pacer = RecordingPacer::default();
        let mut hw = Actuators {
            pwm: &mut pwm,
            pacer: &mut pacer,
            probe: None,
        };

        let commit = sequencer().apply_duty_cycle(&mut hw, 19, 35.0, 35.0).unwrap();

        assert!(!commit.boosted);
        assert!(close(&pwm.percents(), &[35.0]));
        assert!(pacer.holds.is_empty());
    }

    #[test]
    fn test_no_boost_at_or_above_threshold() {
        let seq = sequencer();
        assert!(!seq.needs_boost(0.0, 40.0));
        assert!(!seq.needs_boost(0.0, 0.0));
        assert!(seq.needs_boost(0.0, 39.9));
        assert!(!seq.needs_boost(20.0, 30.0));
    }

    #[test]
    fn test_floor_forces_zero() {
        let mut config = ControllerConfig::default();
        config.pwm.floor_percent = 30.0;
        let seq = BoostSequencer::new(&config);

        let mut pwm = RecordingPwm::default();
        let mut pacer = RecordingPacer::default();
        let mut hw = Actuators {
            pwm: &mut pwm,
            pacer: &mut pacer,
            probe: None,
        };

        let commit = seq.apply_duty_cycle(&mut hw, 19, 25.0, 50.0).unwrap();
        assert_eq!(commit.committed, 0.0);
        assert!(close(&pwm.percents(), &[0.0]));
    }

    #[test]
    fn test_out_of_range_requests_clamped() {
        let seq = sequencer();
        let mut pwm = RecordingPwm::default();
        let mut pacer = RecordingPacer::default();
        let mut hw = Actuators {
            pwm: &mut pwm,
            pacer: &mut pacer,
            probe: None,
        };
        assert_eq!(seq.apply_duty_cycle(&mut hw, 19, 140.0, 50.0).unwrap().committed, 100.0);
        assert_eq!(seq.apply_duty_cycle(&mut hw, 19, -5.0, 50.0).unwrap().committed, 0.0);
        assert_eq!(seq.apply_duty_cycle(&mut hw, 19, f64::NAN, 50.0).unwrap().committed, 0.0);
    }

    #[test]
    fn test_spinning_fan_passes_check() {
        let mut pwm = RecordingPwm::default();
        let mut pacer = RecordingPacer::default();
        let mut probe = ScriptedProbe::new(&[1450.0]);
        let mut hw = Actuators {
            pwm: &mut pwm,
            pacer: &mut pacer,
            probe: Some(&mut probe),
        };

        let commit = sequencer().apply_duty_cycle(&mut hw, 19, 60.0, 55.0).unwrap();

        assert_eq!(commit.check, StallCheck::Spinning { rpm: 1450.0 });
        assert_eq!(commit.committed, 60.0);
        assert_eq!(pacer.holds, vec![Duration::from_secs(2)]);
        assert_eq!(probe.windows, vec![Duration::from_millis(2500)]);
    }

    #[test]
    fn test_five_zero_retries_escalate() {
        let mut pwm = RecordingPwm::default();
        let mut pacer = RecordingPacer::default();
        let mut probe = ScriptedProbe::new(&[0.0; 6]);
        let mut hw = Actuators {
            pwm: &mut pwm,
            pacer: &mut pacer,
            probe: Some(&mut probe),
        };

        let commit = sequencer().apply_duty_cycle(&mut hw, 19, 60.0, 55.0).unwrap();

        assert_eq!(commit.check, StallCheck::Stalled);
        assert!(commit.escalated());
        assert_eq!(commit.requested, 60.0);
        assert_eq!(commit.committed, 100.0);
        // the output itself is not rewritten
        assert!(close(&pwm.percents(), &[60.0]));
        let mut expected = vec![Duration::from_millis(2500)];
        expected.extend([Duration::from_secs(1); 5]);
        assert_eq!(probe.windows, expected);
    }

    #[test]
    fn test_late_rotation_is_not_a_stall() {
        let mut pwm = RecordingPwm::default();
        let mut pacer = RecordingPacer::default();
        let mut probe = ScriptedProbe::new(&[0.0, 0.0, 0.0, 900.0]);
        let mut hw = Actuators {
            pwm: &mut pwm,
            pacer: &mut pacer,
            probe: Some(&mut probe),
        };

        let commit = sequencer().apply_duty_cycle(&mut hw, 19, 60.0, 55.0).unwrap();

        assert_eq!(commit.check, StallCheck::Spinning { rpm: 900.0 });
        assert_eq!(commit.committed, 60.0);
        assert_eq!(probe.windows.len(), 4);
    }

    #[test]
    fn test_zero_level_is_not_checked() {
        let mut pwm = RecordingPwm::default();
        let mut pacer = RecordingPacer::default();
        let mut probe = MockRpmProbe::new();
        probe.expect_sample_rpm().never();
        let mut hw = Actuators {
            pwm: &mut pwm,
            pacer: &mut pacer,
            probe: Some(&mut probe),
        };

        let commit = sequencer().apply_duty_cycle(&mut hw, 19, 0.0, 60.0).unwrap();
        assert_eq!(commit.check, StallCheck::Skipped);
    }

    #[test]
    fn test_unverified_commit_skips_probe() {
        let mut pwm = RecordingPwm::default();
        let mut pacer = RecordingPacer::default();
        let mut probe = MockRpmProbe::new();
        probe.expect_sample_rpm().never();
        let mut hw = Actuators {
            pwm: &mut pwm,
            pacer: &mut pacer,
            probe: Some(&mut probe),
        };

        let commit = sequencer().apply_unverified(&mut hw, 19, 75.0, 60.0).unwrap();
        assert_eq!(commit.committed, 75.0);
        assert!(pacer.holds.is_empty());
    }

    #[test]
    fn test_pwm_failure_propagates() {
        let mut pwm = MockPwmSink::new();
        pwm.expect_write_pwm()
            .returning(|pin, _, _| Err(FanspeedError::pwm_write(pin, "device busy")));
        let mut pacer = RecordingPacer::default();
        let mut hw = Actuators {
            pwm: &mut pwm,
            pacer: &mut pacer,
            probe: None,
        };

        let err = sequencer().apply_duty_cycle(&mut hw, 19, 60.0, 0.0).unwrap_err();
        assert!(matches!(err, FanspeedError::PwmWrite { pin: 19, .. }));
    }

    #[test]
    fn test_output_state_defaults_to_zero() {
        let mut state = PwmOutputState::new();
        assert_eq!(state.committed(19), 0.0);
        state.record(19, 55.0);
        assert_eq!(state.committed(19), 55.0);
        assert_eq!(state.committed(18), 0.0);
    }

    #[test]
    fn test_sequencer_is_a_plain_value() {
        let mut config = ControllerConfig::default();
        config.boost.low_speed_threshold = 30.0;
        let sequencer = BoostSequencer::new(&config);
        let copy = sequencer;

        assert_eq!(copy, sequencer);
        assert!(copy.needs_boost(0.0, 25.0));
        assert!(!sequencer.needs_boost(0.0, 35.0));
    }
}
