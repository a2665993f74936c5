//! Speed curve: temperature to duty cycle
//!
//! # How It Works
//!
//! 1. **Threshold**: below `min_temp` the fan is off (0%).
//! 2. **Shaping**: the distance above `min_temp` is raised to `curve_exponent`
//!    (1.0 keeps the plain linear ramp).
//! 3. **Floor**: the normalized value is rescaled into `min_duty_percent..=100`,
//!    so a running fan never drops under its floor speed.
//!
//! The jump from 0 to the floor at `min_temp` is intentional: the fan is either
//! off or at least at the speed it can sustain.

use crate::constants::curve as curve_const;
use crate::data::SpeedCurveConfig;

/// Duty cycle (percent, 0-100) for a temperature
///
/// `config` must have passed [`SpeedCurveConfig::validate`]. Non-finite
/// temperatures map to 0.
pub fn speed(temp: f64, config: &SpeedCurveConfig) -> f64 {
    if !(temp >= config.min_temp) {
        return 0.0;
    }

    let mut raw = temp - config.min_temp;
    if config.curve_exponent != 1.0 {
        raw = raw.powf(config.curve_exponent);
    }

    let span = config.max_temp - config.min_temp;
    if span <= 0.0 {
        return curve_const::MAX_PERCENT;
    }

    let normalized = raw / span * 100.0;
    let floor = config.min_duty_percent;
    let result = normalized * (1.0 - floor / 100.0) + floor;

    result.clamp(0.0, curve_const::MAX_PERCENT)
}

/// One line of the printed speed table
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedTableEntry {
    pub temperature: f64,
    pub percent: f64,
}

impl SpeedTableEntry {
    /// `"70.0%"`
    pub fn percent_label(&self) -> String {
        format!("{:03.1}%", self.percent)
    }

    /// `"57.0°C"`
    pub fn temperature_label(&self) -> String {
        format!("{:.1}\u{b0}C", self.temperature)
    }
}

/// Sweep `from..=to` in 1°C steps, keeping the first temperature for each speed label
pub fn speed_table(config: &SpeedCurveConfig, from: i32, to: i32) -> Vec<SpeedTableEntry> {
    let mut entries: Vec<SpeedTableEntry> = Vec::new();
    for temp in from..=to {
        let entry = SpeedTableEntry {
            temperature: f64::from(temp),
            percent: speed(f64::from(temp), config),
        };
        let label = entry.percent_label();
        if entries.iter().all(|e| e.percent_label() != label) {
            entries.push(entry);
        }
    }
    entries
}
