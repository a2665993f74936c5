//! Unified error handling for fanspeed
//!
//! This crate provides a single error type used across the controller library
//! and the daemon. It uses thiserror for Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using FanspeedError
pub type Result<T> = std::result::Result<T, FanspeedError>;

/// Unified error type for all fanspeed operations
#[derive(thiserror::Error, Debug)]
pub enum FanspeedError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Hardware Access Errors
    // ============================================================================
    #[error("Failed to read temperature from {path}: {reason}")]
    TemperatureRead {
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to write PWM on pin {pin}: {reason}")]
    PwmWrite {
        pin: u8,
        reason: String,
    },

    #[error("Unsupported PWM pin {pin} (hardware PWM is available on 12, 13, 18 and 19)")]
    UnsupportedPwmPin {
        pin: u8,
    },

    #[error("GPIO error on pin {pin}: {reason}")]
    Gpio {
        pin: u8,
        reason: String,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Invalid percentage: {value} (must be 0.0-100.0)")]
    InvalidPercentage {
        value: f64,
    },

    #[error("Invalid temperature: {value}°C")]
    InvalidTemperature {
        value: f64,
    },

    // ============================================================================
    // Reporting Errors
    // ============================================================================
    #[error("MQTT error: {0}")]
    Mqtt(String),

    #[error("Command failed: {0}")]
    Command(String),

    // ============================================================================
    // Process Errors
    // ============================================================================
    #[error("PID file {path}: {reason}")]
    PidFile {
        path: PathBuf,
        reason: String,
    },

    #[error("Another instance is running (PID {0})")]
    AlreadyRunning(i32),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl FanspeedError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create an invalid configuration error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a PWM write error
    pub fn pwm_write(pin: u8, reason: impl Into<String>) -> Self {
        Self::PwmWrite {
            pin,
            reason: reason.into(),
        }
    }

    /// Create a GPIO error
    pub fn gpio(pin: u8, reason: impl Into<String>) -> Self {
        Self::Gpio {
            pin,
            reason: reason.into(),
        }
    }

    /// Whether this error comes from configuration validation
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::InvalidPercentage { .. }
                | Self::InvalidTemperature { .. }
        )
    }
}

// Allow converting from String to FanspeedError
impl From<String> for FanspeedError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to FanspeedError
impl From<&str> for FanspeedError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display() {
        let err = FanspeedError::invalid_config("max_temp", "must be greater than min_temp");
        assert_eq!(
            err.to_string(),
            "Invalid configuration value for max_temp: must be greater than min_temp"
        );
        assert!(err.is_config());
    }

    #[test]
    fn test_pwm_write_is_not_config() {
        let err = FanspeedError::pwm_write(19, "device busy");
        assert_eq!(err.to_string(), "Failed to write PWM on pin 19: device busy");
        assert!(!err.is_config());
    }

    #[test]
    fn test_range_errors_are_config() {
        assert!(FanspeedError::InvalidPercentage { value: 140.0 }.is_config());
        assert!(FanspeedError::InvalidTemperature { value: -300.0 }.is_config());
        assert!(!FanspeedError::AlreadyRunning(42).is_config());
        assert!(!FanspeedError::generic("boom").is_config());
    }

    #[test]
    fn test_file_write_names_the_path() {
        let err = FanspeedError::FileWrite {
            path: PathBuf::from("/var/log/tempmon.json"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "Failed to write file /var/log/tempmon.json: denied");
        assert!(!err.is_config());
    }

    #[test]
    fn test_from_string() {
        let err: FanspeedError = "boom".into();
        assert!(matches!(err, FanspeedError::Generic(ref s) if s == "boom"));
    }
}
