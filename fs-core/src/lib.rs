//! fanspeed core library
//!
//! Temperature driven PWM fan control for single-board computers.
//!
//! # Features
//!
//! - **Speed Curve**: threshold, floor and optional exponent shaping
//! - **Tachometer**: edge-driven RPM estimation with an adaptive filter
//! - **Boost and Stall Check**: startup ramp from rest and rotation verification
//! - **Control Loop**: sample, evaluate, commit, report
//!
//! # Module Structure
//!
//! - `hw/` - Hardware traits and backends (thermal zone, sysfs PWM, Raspberry Pi)
//! - `data/` - Configuration types and the report record
//! - `engine/` - Curve, estimator, sequencer and control loop
//!
//! # Example
//!
//! ```
//! use fs_core::{speed, SpeedCurveConfig};
//!
//! let curve = SpeedCurveConfig::default();
//! assert_eq!(speed(30.0, &curve), 0.0);
//! assert_eq!(speed(45.0, &curve), 40.0);
//! ```

// Grouped modules
pub mod data;
pub mod engine;
pub mod hw;

// Standalone modules
pub mod constants;
pub mod error;

pub use data::{
    epoch_seconds, BoostConfig, ControllerConfig, PwmConfig, Report, SpeedCurveConfig,
    StallConfig, TachConfig,
};

pub use engine::{
    boost_ramp, monotonic_micros, speed, speed_table, Actuators, BoostSequencer, Commit,
    ControlLoop, EdgeFrequencyEstimator, PulseCounter, PwmOutputState, RampStep, Reporter,
    SharedEstimator, SpeedTableEntry, StallCheck, TachSnapshot, TachState, TickOutcome,
};

pub use hw::{
    pwm_channel, EdgeCallback, EdgeKind, EdgeSource, EdgeSubscription, EstimatorProbe, Pacer,
    PwmSink, RpmProbe, SysfsPwm, TemperatureSource, ThermalZone, ThreadPacer,
};

#[cfg(feature = "rpi")]
pub use hw::{RppalEdges, RppalPwm};

pub use error::{FanspeedError, Result};
