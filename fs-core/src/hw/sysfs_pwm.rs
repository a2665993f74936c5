//! PWM through the kernel sysfs PWM class
//!
//! Layout: `/sys/class/pwm/pwmchipN/{export, pwmM/{period, duty_cycle, enable}}`,
//! with period and duty cycle in nanoseconds. A channel is exported on first
//! use. The duty cycle is zeroed before a period change because the kernel
//! rejects a duty cycle longer than the period.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::constants::{paths, pwm};
use crate::error::{FanspeedError, Result};
use crate::hw::{pwm_channel, PwmSink};

/// Sysfs PWM chip
#[derive(Debug, Clone)]
pub struct SysfsPwm {
    chip_path: PathBuf,
    /// Period last written per channel (ns)
    periods: HashMap<u8, u64>,
}

impl SysfsPwm {
    /// `pwmchip<chip>` under the system PWM class
    pub fn new(chip: u32) -> Self {
        Self::with_chip_path(Path::new(paths::PWM_CLASS_BASE).join(format!("pwmchip{}", chip)))
    }

    pub fn with_chip_path(chip_path: impl Into<PathBuf>) -> Self {
        Self {
            chip_path: chip_path.into(),
            periods: HashMap::new(),
        }
    }

    fn channel_path(&self, channel: u8) -> PathBuf {
        self.chip_path.join(format!("pwm{}", channel))
    }

    fn write_attr(&self, pin: u8, path: &Path, value: impl ToString) -> Result<()> {
        fs::write(path, value.to_string()).map_err(|e| {
            FanspeedError::pwm_write(pin, format!("Failed to write {}: {}", path.display(), e))
        })
    }

    fn ensure_exported(&self, pin: u8, channel: u8) -> Result<PathBuf> {
        let channel_path = self.channel_path(channel);
        if !channel_path.exists() {
            debug!(pin, channel, chip = %self.chip_path.display(), "Exporting PWM channel");
            self.write_attr(pin, &self.chip_path.join("export"), channel)?;
        }
        Ok(channel_path)
    }
}

impl PwmSink for SysfsPwm {
    fn write_pwm(&mut self, pin: u8, frequency_hz: u32, duty_fraction: f64) -> Result<()> {
        if frequency_hz == 0 {
            return Err(FanspeedError::pwm_write(pin, "frequency must be greater than zero"));
        }
        let channel = pwm_channel(pin)?;
        let channel_path = self.ensure_exported(pin, channel)?;

        let period_ns = (pwm::NANOS_PER_SECOND / f64::from(frequency_hz)).round() as u64;
        let duty_ns = (period_ns as f64 * duty_fraction.clamp(0.0, 1.0)).round() as u64;

        if self.periods.get(&channel) != Some(&period_ns) {
            self.write_attr(pin, &channel_path.join("duty_cycle"), 0)?;
            self.write_attr(pin, &channel_path.join("period"), period_ns)?;
            self.periods.insert(channel, period_ns);
        }
        self.write_attr(pin, &channel_path.join("duty_cycle"), duty_ns)?;
        self.write_attr(pin, &channel_path.join("enable"), 1)?;
        Ok(())
    }
}
