/*
 * This file is part of fanspeed.
 *
 * Copyright (C) 2025 fanspeed contributors
 *
 * fanspeed is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * fanspeed is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with fanspeed. If not, see <https://www.gnu.org/licenses/>.
 */

//! Command Line Interface
//!
//! Flag names match the `raspi_fanspeed` command line so existing service files
//! keep working. [`Cli::into_settings`] normalizes the raw values and builds
//! the validated controller configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};

use fs_core::constants::{boost, control, curve, mqtt, paths, pwm, stall, tach};
use fs_core::{
    BoostConfig, ControllerConfig, PwmConfig, SpeedCurveConfig, StallConfig, TachConfig,
};

use crate::report::MqttSettings;

#[derive(Parser, Debug, Clone)]
#[command(name = "fanspeedd")]
#[command(version)]
#[command(about = "Adjustable fan speed with temperature monitoring")]
#[command(long_about = "Adjustable fan speed with temperature monitoring

Reads the CPU temperature, maps it onto a duty cycle and drives a hardware
PWM pin. The fan speed is measured from a tachometer input and a stalled fan
is driven at full speed.

EXAMPLES:
    fanspeedd                              Run the control loop on pin 19
    fanspeedd -S                           Print the speed table and exit
    fanspeedd --set 60                     Set 60% and exit
    fanspeedd --measure 5                  Measure RPM for 5 seconds
    fanspeedd -L /var/log/tempmon.json     Write every sample to a file
    fanspeedd -H broker.lan --mqttuser pi --mqttpass secret

ENVIRONMENT VARIABLES:
    FANSPEED_LOG=debug     Log level (trace, debug, info, warn, error)")]
pub struct Cli {
    /// Fan speed update interval in seconds (below 1 runs once)
    #[arg(short = 'i', long, default_value_t = control::DEFAULT_INTERVAL_SECS)]
    pub interval: u64,

    /// Set speed in % and exit
    #[arg(long, value_name = "PERCENT")]
    pub set: Option<f64>,

    /// Measure RPM for n seconds and exit
    #[arg(long, value_name = "SECONDS")]
    pub measure: Option<f64>,

    /// Minimum temperature to turn on the fan in °C
    #[arg(long = "min", default_value_t = curve::DEFAULT_MIN_TEMP)]
    pub min_temp: f64,

    /// Full fan speed at and above this temperature in °C
    #[arg(long = "max", default_value_t = curve::DEFAULT_MAX_TEMP)]
    pub max_temp: f64,

    /// Temperature/duty cycle exponent, 1.0 = linear
    #[arg(long = "lin", default_value_t = curve::DEFAULT_EXPONENT)]
    pub exponent: f64,

    /// Minimum fan speed in %
    #[arg(long = "min-fan", default_value_t = curve::DEFAULT_MIN_DUTY_PERCENT)]
    pub min_fan: f64,

    /// Requests below this are written as 0% (defaults to --min-fan)
    #[arg(long = "floor")]
    pub floor: Option<f64>,

    /// Fan PWM pin, must be capable of hardware PWM (12, 13, 18, 19)
    #[arg(short = 'p', long, default_value_t = pwm::DEFAULT_PIN, value_parser = parse_pwm_pin)]
    pub pin: u8,

    /// Read the tachometer signal from this pin
    #[arg(long = "rpm-pin", default_value_t = tach::DEFAULT_RPM_PIN)]
    pub rpm_pin: u8,

    /// Run without a tachometer (no RPM, no stall detection)
    #[arg(long = "no-rpm")]
    pub no_rpm: bool,

    /// PWM frequency in Hz
    #[arg(short = 'f', long, default_value_t = pwm::DEFAULT_FREQUENCY_HZ)]
    pub frequency: u32,

    /// Print the fan speed table and exit
    #[arg(short = 'S', long = "print-speed")]
    pub print_speed: bool,

    /// Fan speed when exiting (min-fan..100), -1 turns the fan off
    #[arg(
        short = 'E',
        long = "onexit-speed",
        default_value_t = control::DEFAULT_ONEXIT_PERCENT,
        allow_negative_numbers = true
    )]
    pub onexit_speed: f64,

    /// PWM driver
    #[arg(long = "pwm-backend", value_enum, default_value_t = PwmBackend::default())]
    pub pwm_backend: PwmBackend,

    /// sysfs PWM chip number (sysfs backend)
    #[arg(long = "pwm-chip", default_value_t = 0)]
    pub pwm_chip: u32,

    /// Thermal zone file (millidegrees Celsius)
    #[arg(long = "thermal-zone", default_value = paths::THERMAL_ZONE)]
    pub thermal_zone: PathBuf,

    /// Smoothing factor of the RPM filter
    #[arg(long, default_value_t = tach::DEFAULT_SMOOTHING_FACTOR)]
    pub smoothing: f64,

    /// Tachometer edges per revolution
    #[arg(long = "edges-per-rev", default_value_t = tach::DEFAULT_EDGES_PER_REVOLUTION)]
    pub edges_per_rev: f64,

    /// Re-measurements before a stopped fan counts as stalled
    #[arg(long = "stall-retries", default_value_t = stall::RETRIES)]
    pub stall_retries: u32,

    /// Length of each stall re-measurement in seconds
    #[arg(long = "stall-retry-secs", default_value_t = stall::RETRY_WINDOW.as_secs_f64())]
    pub stall_retry_secs: f64,

    /// Length of the first RPM measurement after a change in seconds
    #[arg(long = "stall-window-secs", default_value_t = stall::SAMPLE_WINDOW.as_secs_f64())]
    pub stall_window_secs: f64,

    /// Skip the rotation check after each change
    #[arg(long = "no-stall-check")]
    pub no_stall_check: bool,

    /// Levels below this start with a boost ramp when the fan is off
    #[arg(long = "boost-threshold", default_value_t = boost::LOW_SPEED_THRESHOLD)]
    pub boost_threshold: f64,

    /// MQTT user name
    #[arg(long)]
    pub mqttuser: Option<String>,

    /// MQTT password
    #[arg(long, default_value = "")]
    pub mqttpass: String,

    /// MQTT device name (defaults to the host name)
    #[arg(long)]
    pub mqttdevicename: Option<String>,

    /// MQTT topic template
    #[arg(long, default_value = mqtt::DEFAULT_TOPIC)]
    pub mqtttopic: String,

    /// Home Assistant discovery prefix, empty disables discovery
    #[arg(long, default_value = mqtt::DEFAULT_DISCOVERY_PREFIX)]
    pub mqtthass: String,

    /// MQTT update interval (30-900 seconds)
    #[arg(long, default_value_t = mqtt::DEFAULT_UPDATE_INTERVAL_SECS)]
    pub mqttupdateinterval: u64,

    /// MQTT broker host, enables MQTT
    #[arg(short = 'H', long)]
    pub mqtthost: Option<String>,

    /// MQTT broker port
    #[arg(short = 'P', long, default_value_t = mqtt::DEFAULT_PORT)]
    pub mqttport: u16,

    /// Write every sample as JSON to this file, `-` for stdout
    #[arg(short = 'L', long)]
    pub log: Option<String>,

    /// Execute this command for every sample, `{message}` is replaced by the JSON record
    #[arg(short = 'C', long)]
    pub cmd: Option<String>,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// PID file
    #[arg(long, default_value = paths::PID_FILE)]
    pub pid: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PwmBackend {
    /// BCM hardware PWM through rppal
    Rppal,
    /// Kernel sysfs PWM class
    Sysfs,
}

impl Default for PwmBackend {
    fn default() -> Self {
        if cfg!(feature = "rpi") {
            PwmBackend::Rppal
        } else {
            PwmBackend::Sysfs
        }
    }
}

fn parse_pwm_pin(value: &str) -> Result<u8, String> {
    let pin: u8 = value
        .parse()
        .map_err(|_| format!("'{}' is not a pin number", value))?;
    if pwm::HARDWARE_PINS.contains(&pin) {
        Ok(pin)
    } else {
        Err(format!("pin {} has no hardware PWM (use 12, 13, 18 or 19)", pin))
    }
}

/// What the process does
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    /// Periodic control loop
    Daemon,
    /// Write one level and exit
    Set(f64),
    /// Measure RPM over a window and exit
    Measure(Duration),
    /// Print the speed table and exit
    PrintTable,
}

/// Normalized runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: Mode,
    pub controller: ControllerConfig,
    pub interval: Duration,
    /// Exit duty cycle after normalization (percent)
    pub onexit_percent: f64,
    /// `None` when running without a tachometer
    pub rpm_pin: Option<u8>,
    pub pwm_backend: PwmBackend,
    pub pwm_chip: u32,
    pub thermal_zone: PathBuf,
    pub log: Option<String>,
    pub cmd: Option<String>,
    pub mqtt: Option<MqttSettings>,
    pub pid_file: PathBuf,
    pub verbose: bool,
}

fn seconds(field: &str, value: f64) -> anyhow::Result<Duration> {
    if value.is_nan() || value < 0.0 {
        bail!("{} must be a non-negative number of seconds, got {}", field, value);
    }
    match Duration::try_from_secs_f64(value) {
        Ok(duration) => Ok(duration),
        Err(_) => bail!("{} is out of range: {} seconds", field, value),
    }
}

/// Exit level: -1 turns the fan off, anything else lands in `min_fan..=100`
pub fn normalize_onexit(onexit: f64, min_fan: f64) -> f64 {
    if onexit == control::ONEXIT_DISABLED {
        return 0.0;
    }
    onexit.max(min_fan).min(curve::MAX_PERCENT)
}

impl Cli {
    /// Normalize and validate; configuration errors are fatal
    pub fn into_settings(self) -> anyhow::Result<Settings> {
        let min_fan = self.min_fan.clamp(0.0, curve::MAX_PERCENT);
        let min_temp = self.min_temp.max(0.0);
        let max_temp = self.max_temp.max(min_temp);

        let controller = ControllerConfig {
            curve: SpeedCurveConfig {
                min_temp,
                max_temp,
                min_duty_percent: min_fan,
                curve_exponent: self.exponent,
            },
            pwm: PwmConfig {
                pin: self.pin,
                frequency_hz: self.frequency,
                floor_percent: self.floor.unwrap_or(min_fan),
            },
            tach: TachConfig {
                smoothing_factor: self.smoothing,
                edges_per_revolution: self.edges_per_rev,
                ..TachConfig::default()
            },
            boost: BoostConfig {
                low_speed_threshold: self.boost_threshold,
                ..BoostConfig::default()
            },
            stall: StallConfig {
                enabled: !self.no_stall_check && !self.no_rpm,
                retries: self.stall_retries,
                retry_window: seconds("stall-retry-secs", self.stall_retry_secs)?,
                sample_window: seconds("stall-window-secs", self.stall_window_secs)?,
                ..StallConfig::default()
            },
        };
        controller
            .validate()
            .context("invalid controller configuration")?;

        let mode = if self.print_speed {
            Mode::PrintTable
        } else if let Some(level) = self.set {
            Mode::Set(if level.is_nan() {
                0.0
            } else {
                level.clamp(0.0, curve::MAX_PERCENT)
            })
        } else if let Some(window) = self.measure {
            Mode::Measure(seconds("measure", window)?)
        } else {
            Mode::Daemon
        };

        let mqtt = match self.mqtthost {
            Some(host) if !host.trim().is_empty() => Some(MqttSettings {
                host,
                port: self.mqttport,
                user: self.mqttuser,
                password: self.mqttpass,
                device_name: self.mqttdevicename,
                topic: self.mqtttopic,
                discovery_prefix: self.mqtthass,
                update_interval: Duration::from_secs(self.mqttupdateinterval.clamp(
                    mqtt::MIN_UPDATE_INTERVAL_SECS,
                    mqtt::MAX_UPDATE_INTERVAL_SECS,
                )),
            }),
            _ => None,
        };

        let mut interval = Duration::from_secs(self.interval);
        if let Some(mqtt) = &mqtt {
            interval = interval.min(mqtt.update_interval);
        }

        Ok(Settings {
            mode,
            controller,
            interval,
            onexit_percent: normalize_onexit(self.onexit_speed, min_fan),
            rpm_pin: if self.no_rpm { None } else { Some(self.rpm_pin) },
            pwm_backend: self.pwm_backend,
            pwm_chip: self.pwm_chip,
            thermal_zone: self.thermal_zone,
            log: self.log,
            cmd: self.cmd,
            mqtt,
            pid_file: self.pid,
            verbose: self.verbose,
        })
    }
}
