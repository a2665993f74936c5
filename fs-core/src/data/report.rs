//! The state record shared by every reporting sink
//!
//! Log file, shell command and MQTT payloads all carry the same JSON object so
//! the sinks stay interchangeable.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One controller state sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// CPU temperature (Celsius)
    pub temperature: f64,
    /// Committed duty cycle (percent)
    #[serde(rename = "duty_cycle")]
    pub duty_cycle_percent: f64,
    /// Last measured fan speed, 0 when unknown
    pub rpm: u32,
    /// Seconds since the Unix epoch
    #[serde(rename = "ts")]
    pub timestamp: i64,
}

impl Report {
    /// Build a record stamped with the current wall clock
    pub fn now(temperature: f64, duty_cycle_percent: f64, rpm: Option<f64>) -> Self {
        Self::at(temperature, duty_cycle_percent, rpm, epoch_seconds())
    }

    /// Build a record with an explicit timestamp
    pub fn at(temperature: f64, duty_cycle_percent: f64, rpm: Option<f64>, timestamp: i64) -> Self {
        Self {
            temperature: round2(temperature),
            duty_cycle_percent: round2(duty_cycle_percent),
            rpm: rpm
                .filter(|r| r.is_finite() && *r > 0.0)
                .map(|r| r.round() as u32)
                .unwrap_or(0),
            timestamp,
        }
    }

    /// Compact JSON, as published and logged
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Seconds since the Unix epoch, 0 if the clock is before it
pub fn epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
