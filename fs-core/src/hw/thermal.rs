//! Kernel thermal zone reader
//!
//! Thermal zones report millidegrees Celsius (e.g. 45123 = 45.123°C).

use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{paths, temperature};
use crate::error::{FanspeedError, Result};
use crate::hw::TemperatureSource;

/// Temperature source backed by a `thermal_zoneN/temp` file
#[derive(Debug, Clone)]
pub struct ThermalZone {
    path: PathBuf,
}

impl Default for ThermalZone {
    fn default() -> Self {
        Self::new(paths::THERMAL_ZONE)
    }
}

impl ThermalZone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TemperatureSource for ThermalZone {
    fn read_celsius(&mut self) -> Result<f64> {
        let content = fs::read_to_string(&self.path).map_err(|e| FanspeedError::TemperatureRead {
            path: self.path.clone(),
            reason: format!("Failed to read: {}", e),
        })?;

        let millidegrees = content.trim().parse::<f64>().map_err(|e| {
            FanspeedError::TemperatureRead {
                path: self.path.clone(),
                reason: format!("Failed to parse '{}': {}", content.trim(), e),
            }
        })?;

        let celsius = millidegrees / temperature::MILLIDEGREE_DIVISOR;
        if !celsius.is_finite() {
            return Err(FanspeedError::InvalidTemperature { value: celsius });
        }
        Ok(celsius)
    }
}
