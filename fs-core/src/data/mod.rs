//! Data types and configuration
//!
//! Contains the controller configuration and the report record.

mod config;
mod report;

pub use config::{
    BoostConfig, ControllerConfig, PwmConfig, SpeedCurveConfig, StallConfig, TachConfig,
};
pub use report::{epoch_seconds, Report};
