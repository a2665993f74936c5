//! Controller configuration types
//!
//! Every value has a default from `constants`. Configuration is immutable once
//! validated and is handed to the engine by value.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{boost, curve, pwm, stall, tach};
use crate::error::{FanspeedError, Result};

/// Shape of the temperature to duty cycle transfer function
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedCurveConfig {
    /// Below this temperature the fan is off (Celsius)
    pub min_temp: f64,
    /// At and above this temperature the fan runs at 100% (Celsius, linear curve)
    pub max_temp: f64,
    /// Floor duty cycle once the fan is on (percent)
    pub min_duty_percent: f64,
    /// Curve exponent, 1.0 is linear
    pub curve_exponent: f64,
}

impl Default for SpeedCurveConfig {
    fn default() -> Self {
        Self {
            min_temp: curve::DEFAULT_MIN_TEMP,
            max_temp: curve::DEFAULT_MAX_TEMP,
            min_duty_percent: curve::DEFAULT_MIN_DUTY_PERCENT,
            curve_exponent: curve::DEFAULT_EXPONENT,
        }
    }
}

impl SpeedCurveConfig {
    /// Reject configurations the curve cannot evaluate
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("min_temp", self.min_temp),
            ("max_temp", self.max_temp),
            ("min_duty_percent", self.min_duty_percent),
            ("curve_exponent", self.curve_exponent),
        ] {
            if !value.is_finite() {
                return Err(FanspeedError::invalid_config(field, "must be a finite number"));
            }
        }
        if self.max_temp <= self.min_temp {
            return Err(FanspeedError::invalid_config(
                "max_temp",
                format!(
                    "must be greater than min_temp ({} <= {})",
                    self.max_temp, self.min_temp
                ),
            ));
        }
        if !(0.0..=curve::MAX_PERCENT).contains(&self.min_duty_percent) {
            return Err(FanspeedError::InvalidPercentage {
                value: self.min_duty_percent,
            });
        }
        if self.curve_exponent < curve::MIN_EXPONENT {
            return Err(FanspeedError::invalid_config(
                "curve_exponent",
                format!("must be >= {}", curve::MIN_EXPONENT),
            ));
        }
        Ok(())
    }
}

/// Tachometer estimator tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TachConfig {
    /// Weight scale of the adaptive exponential filter
    pub smoothing_factor: f64,
    /// Edges per mechanical revolution; edge intervals are multiplied by this
    pub edges_per_revolution: f64,
    /// Silence after which the estimate is discarded
    pub stale_timeout: Duration,
}

impl Default for TachConfig {
    fn default() -> Self {
        Self {
            smoothing_factor: tach::DEFAULT_SMOOTHING_FACTOR,
            edges_per_revolution: tach::DEFAULT_EDGES_PER_REVOLUTION,
            stale_timeout: tach::STALE_TIMEOUT,
        }
    }
}

impl TachConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.smoothing_factor.is_finite() || self.smoothing_factor < 0.0 {
            return Err(FanspeedError::invalid_config(
                "smoothing_factor",
                "must be a non-negative number",
            ));
        }
        if !self.edges_per_revolution.is_finite() || self.edges_per_revolution <= 0.0 {
            return Err(FanspeedError::invalid_config(
                "edges_per_revolution",
                "must be greater than zero",
            ));
        }
        if self.stale_timeout.is_zero() {
            return Err(FanspeedError::invalid_config(
                "stale_timeout",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Startup boost ramp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostConfig {
    /// Requested levels in (0, threshold) are boosted when starting from rest
    pub low_speed_threshold: f64,
    /// Peak level of the ramp (percent)
    pub boost_percent: f64,
    pub initial_hold: Duration,
    pub boost_hold: Duration,
    pub step_hold: Duration,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            low_speed_threshold: boost::LOW_SPEED_THRESHOLD,
            boost_percent: boost::BOOST_PERCENT,
            initial_hold: boost::INITIAL_HOLD,
            boost_hold: boost::BOOST_HOLD,
            step_hold: boost::STEP_HOLD,
        }
    }
}

/// Rotation check after a duty cycle change
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StallConfig {
    pub enabled: bool,
    pub settle_delay: Duration,
    pub sample_window: Duration,
    pub retries: u32,
    pub retry_window: Duration,
    pub escalation_percent: f64,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            settle_delay: stall::SETTLE_DELAY,
            sample_window: stall::SAMPLE_WINDOW,
            retries: stall::RETRIES,
            retry_window: stall::RETRY_WINDOW,
            escalation_percent: stall::ESCALATION_PERCENT,
        }
    }
}

/// PWM output settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PwmConfig {
    pub pin: u8,
    pub frequency_hz: u32,
    /// Requests below this are committed as 0 (percent)
    pub floor_percent: f64,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            pin: pwm::DEFAULT_PIN,
            frequency_hz: pwm::DEFAULT_FREQUENCY_HZ,
            floor_percent: pwm::DEFAULT_FLOOR_PERCENT,
        }
    }
}

impl PwmConfig {
    pub fn validate(&self) -> Result<()> {
        if !pwm::HARDWARE_PINS.contains(&self.pin) {
            return Err(FanspeedError::UnsupportedPwmPin { pin: self.pin });
        }
        if self.frequency_hz == 0 {
            return Err(FanspeedError::invalid_config(
                "frequency_hz",
                "must be greater than zero",
            ));
        }
        if !(0.0..=curve::MAX_PERCENT).contains(&self.floor_percent) {
            return Err(FanspeedError::InvalidPercentage {
                value: self.floor_percent,
            });
        }
        Ok(())
    }
}

/// Everything the control loop needs
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub curve: SpeedCurveConfig,
    pub pwm: PwmConfig,
    pub tach: TachConfig,
    pub boost: BoostConfig,
    pub stall: StallConfig,
}

impl ControllerConfig {
    /// Validate all sections, first failure wins
    pub fn validate(&self) -> Result<()> {
        self.curve.validate()?;
        self.pwm.validate()?;
        self.tach.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ControllerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_equal_thresholds_rejected() {
        let cfg = SpeedCurveConfig {
            min_temp: 50.0,
            max_temp: 50.0,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("max_temp"));
    }

    #[test]
    fn test_duty_floor_out_of_range() {
        let cfg = SpeedCurveConfig {
            min_duty_percent: 120.0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(FanspeedError::InvalidPercentage { .. })
        ));
    }

    #[test]
    fn test_exponent_below_one_rejected() {
        let cfg = SpeedCurveConfig {
            curve_exponent: 0.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_non_hardware_pin_rejected() {
        let cfg = PwmConfig {
            pin: 4,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(FanspeedError::UnsupportedPwmPin { pin: 4 })
        ));
    }

    #[test]
    fn test_config_serializes() {
        let json = serde_json::to_string(&ControllerConfig::default()).unwrap();
        let back: ControllerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ControllerConfig::default());
    }
}
