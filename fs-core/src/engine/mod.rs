//! Fan control engine modules
//!
//! Contains the speed curve, the tach estimator, the boost/stall sequencer
//! and the control loop that ties them together.

mod boost;
mod control;
mod curve;
mod tach;

pub use boost::{
    boost_ramp, Actuators, BoostSequencer, Commit, PwmOutputState, RampStep, StallCheck,
};
pub use control::{ControlLoop, Reporter, TickOutcome};
pub use curve::{speed, speed_table, SpeedTableEntry};
pub use tach::{
    monotonic_micros, EdgeFrequencyEstimator, PulseCounter, SharedEstimator, TachSnapshot,
    TachState,
};
