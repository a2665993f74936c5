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

//! Operating modes: daemon loop, one-shot set, RPM measurement, speed table

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use fs_core::constants::{curve, pwm};
use fs_core::{
    speed_table, ControlLoop, EdgeKind, EdgeSource, EdgeSubscription, EstimatorProbe,
    PulseCounter, PwmSink, SharedEstimator, SpeedCurveConfig, SysfsPwm, TachConfig, ThermalZone,
};

use crate::cli::{Mode, PwmBackend, Settings};
use crate::identity::Identity;
use crate::pidfile::PidFile;
use crate::report::{CommandReporter, LogFileReporter, MqttPublisher};
use crate::shutdown::ShutdownSignal;

/// Dispatch on the selected mode
pub fn run(settings: Settings) -> Result<()> {
    match settings.mode {
        Mode::PrintTable => {
            println!("{}", speed_table_json(&settings.controller.curve, true)?);
            Ok(())
        }
        Mode::Set(level) => set_level(&settings, level),
        Mode::Measure(window) => measure(&settings, window),
        Mode::Daemon => run_daemon(settings),
    }
}

/// `{"<speed>%": "<temp>°C", ...}` over the table range, first temperature per speed
pub fn speed_table_json(config: &SpeedCurveConfig, pretty: bool) -> Result<String> {
    let table: Map<String, Value> =
        speed_table(config, curve::TABLE_START_TEMP, curve::TABLE_END_TEMP)
            .into_iter()
            .map(|entry| (entry.percent_label(), Value::String(entry.temperature_label())))
            .collect();
    let json = if pretty {
        serde_json::to_string_pretty(&table)?
    } else {
        serde_json::to_string(&table)?
    };
    Ok(json)
}

fn open_pwm(settings: &Settings) -> Result<Box<dyn PwmSink>> {
    match settings.pwm_backend {
        PwmBackend::Sysfs => Ok(Box::new(SysfsPwm::new(settings.pwm_chip))),
        PwmBackend::Rppal => open_rppal_pwm(),
    }
}

#[cfg(feature = "rpi")]
fn open_rppal_pwm() -> Result<Box<dyn PwmSink>> {
    Ok(Box::new(fs_core::RppalPwm::new()))
}

#[cfg(not(feature = "rpi"))]
fn open_rppal_pwm() -> Result<Box<dyn PwmSink>> {
    bail!("built without the rpi feature, use --pwm-backend sysfs")
}

#[cfg(feature = "rpi")]
fn open_edges() -> Result<Box<dyn EdgeSource>> {
    let edges = fs_core::RppalEdges::new().context("failed to open GPIO")?;
    Ok(Box::new(edges))
}

#[cfg(not(feature = "rpi"))]
fn open_edges() -> Result<Box<dyn EdgeSource>> {
    bail!("built without the rpi feature, no tachometer input available")
}

fn set_level(settings: &Settings, level: f64) -> Result<()> {
    let pin = settings.controller.pwm.pin;
    let frequency = settings.controller.pwm.frequency_hz;
    let mut output = open_pwm(settings)?;
    output
        .write_pwm(pin, frequency, pwm::to_fraction(level))
        .with_context(|| format!("failed to set duty cycle on pin {}", pin))?;
    info!(pin, frequency_hz = frequency, percent = level, "Duty cycle set");
    Ok(())
}

fn measure(settings: &Settings, window: Duration) -> Result<()> {
    let Some(pin) = settings.rpm_pin else {
        bail!("--measure needs a tachometer pin, drop --no-rpm");
    };
    let tach = settings.controller.tach;
    let counter = Arc::new(Mutex::new(PulseCounter::new(tach.edges_per_revolution)));
    let estimator = SharedEstimator::new(tach);

    let mut edges = open_edges()?;
    let subscription = {
        let counter = Arc::clone(&counter);
        let estimator = estimator.clone();
        edges
            .subscribe(
                pin,
                EdgeKind::Falling,
                Box::new(move |tick| {
                    counter.lock().on_edge();
                    estimator.on_edge(tick);
                }),
            )
            .with_context(|| format!("failed to watch tachometer pin {}", pin))?
    };

    debug!(pin, window_secs = window.as_secs_f64(), "Measuring fan speed");
    thread::sleep(window);
    edges.cancel(subscription)?;

    let counter = counter.lock();
    let pulse_rpm = counter.rpm(window);
    if settings.verbose {
        info!(
            pin,
            pulses = counter.count(),
            pulse_rpm = pulse_rpm.round(),
            smoothed_rpm = estimator.rpm().unwrap_or(0.0).round(),
            "Measurement finished"
        );
    }
    println!("{}", pulse_rpm.round() as u64);
    Ok(())
}

struct Tachometer {
    edges: Box<dyn EdgeSource>,
    subscription: EdgeSubscription,
}

impl Tachometer {
    fn start(pin: u8, config: TachConfig) -> Result<(Self, SharedEstimator)> {
        let estimator = SharedEstimator::new(config);
        let mut edges = open_edges()?;
        let writer = estimator.clone();
        let subscription = edges
            .subscribe(pin, EdgeKind::Falling, Box::new(move |tick| writer.on_edge(tick)))
            .with_context(|| format!("failed to watch tachometer pin {}", pin))?;
        Ok((
            Self {
                edges,
                subscription,
            },
            estimator,
        ))
    }

    fn stop(mut self) {
        if let Err(e) = self.edges.cancel(self.subscription) {
            warn!(pin = self.subscription.pin, "Failed to stop tachometer: {}", e);
        }
    }
}

fn run_daemon(settings: Settings) -> Result<()> {
    let shutdown = ShutdownSignal::new();
    shutdown
        .install()
        .context("failed to install signal handlers")?;
    let _pid_file = PidFile::acquire(&settings.pid_file)?;

    let identity = Identity::detect();
    let mut mqtt = MqttPublisher::new(settings.mqtt.clone(), &identity);

    if settings.verbose {
        println!("{}", speed_table_json(&settings.controller.curve, false)?);
        match serde_json::to_string(&settings.controller) {
            Ok(json) => debug!(config = %json, "Effective configuration"),
            Err(e) => warn!("Failed to serialize configuration: {}", e),
        }
    }

    let config = settings.controller;
    let sensor = ThermalZone::new(settings.thermal_zone.clone());
    let output = open_pwm(&settings)?;
    let mut control = ControlLoop::new(config, Box::new(sensor), output);

    let mut tachometer = None;
    if let Some(pin) = settings.rpm_pin {
        match Tachometer::start(pin, config.tach) {
            Ok((tach, estimator)) => {
                control = control.with_probe(Box::new(EstimatorProbe::new(estimator)));
                tachometer = Some(tach);
            }
            Err(e) => warn!(pin, "Tachometer unavailable, running without RPM: {:#}", e),
        }
    }

    if let Some(arg) = settings.log.as_deref() {
        if let Some(reporter) = LogFileReporter::from_arg(arg) {
            control = control.with_reporter(Box::new(reporter));
        }
    }
    if let Some(template) = settings.cmd.as_deref() {
        let reporter = CommandReporter::new(template).context("invalid --cmd template")?;
        control = control.with_reporter(Box::new(reporter));
    }
    if mqtt.available() {
        if let Err(e) = mqtt.begin() {
            warn!(server = %mqtt.server(), "MQTT disabled: {}", e);
        } else {
            control = control.with_reporter(Box::new(mqtt));
        }
    }

    info!(
        pin = config.pwm.pin,
        frequency_hz = config.pwm.frequency_hz,
        rpm_pin = ?settings.rpm_pin,
        interval_secs = settings.interval.as_secs(),
        min_temp = config.curve.min_temp,
        max_temp = config.curve.max_temp,
        min_fan = config.curve.min_duty_percent,
        "Fan control started"
    );

    let outcome = control.run(settings.interval, |interval| shutdown.wait_timeout(interval));

    match &outcome {
        Ok(()) if shutdown.is_requested() => {
            if let Err(e) = control.shutdown(settings.onexit_percent) {
                error!("Failed to apply exit duty cycle: {}", e);
                control.close();
            }
        }
        _ => control.close(),
    }
    if let Some(tach) = tachometer {
        tach.stop();
    }

    outcome.context("control loop stopped")?;
    info!("Fan control stopped");
    Ok(())
}
