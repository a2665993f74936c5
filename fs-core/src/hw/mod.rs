//! Hardware interaction modules
//!
//! The engine talks to hardware only through the traits defined here, so the
//! control loop can run against the thermal zone and a Raspberry Pi header or
//! against test doubles.

mod sysfs_pwm;
mod thermal;
mod timing;

#[cfg(feature = "rpi")]
mod rpi;

use std::time::Duration;

use crate::error::{FanspeedError, Result};

pub use sysfs_pwm::SysfsPwm;
pub use thermal::ThermalZone;
pub use timing::{EstimatorProbe, ThreadPacer};

#[cfg(feature = "rpi")]
pub use rpi::{RppalEdges, RppalPwm};

/// CPU temperature sensor
#[cfg_attr(test, mockall::automock)]
pub trait TemperatureSource: Send {
    /// Current temperature in degrees Celsius
    fn read_celsius(&mut self) -> Result<f64>;
}

/// Hardware PWM output
#[cfg_attr(test, mockall::automock)]
pub trait PwmSink: Send {
    /// Drive `pin` at `frequency_hz` with `duty_fraction` in 0.0..=1.0
    fn write_pwm(&mut self, pin: u8, frequency_hz: u32, duty_fraction: f64) -> Result<()>;
}

/// Blocking waits of the boost ramp and the RPM windows
#[cfg_attr(test, mockall::automock)]
pub trait Pacer {
    fn hold(&mut self, duration: Duration);
}

/// RPM measurement over a window
#[cfg_attr(test, mockall::automock)]
pub trait RpmProbe {
    /// Block for `window` and return the fan speed seen, 0 when nothing turned
    fn sample_rpm(&mut self, window: Duration) -> f64;

    /// Latest speed without waiting, `None` when unknown
    fn current_rpm(&self) -> Option<f64>;
}

/// Signal edge of a GPIO input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Rising,
    Falling,
    Both,
}

/// Receives the monotonic timestamp (microseconds) of each edge
pub type EdgeCallback = Box<dyn FnMut(u64) + Send + 'static>;

/// Handle of an active edge subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeSubscription {
    pub pin: u8,
    pub kind: EdgeKind,
}

/// Edge-triggered GPIO input
pub trait EdgeSource {
    fn subscribe(&mut self, pin: u8, kind: EdgeKind, on_edge: EdgeCallback)
        -> Result<EdgeSubscription>;

    fn cancel(&mut self, handle: EdgeSubscription) -> Result<()>;
}

/// Hardware PWM channel of a header pin (12/18 -> 0, 13/19 -> 1)
pub fn pwm_channel(pin: u8) -> Result<u8> {
    match pin {
        12 | 18 => Ok(0),
        13 | 19 => Ok(1),
        _ => Err(FanspeedError::UnsupportedPwmPin { pin }),
    }
}
