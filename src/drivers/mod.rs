//! Sensor drivers.
//!
//! Every driver implements [`Driver::read`]: take the sensor's settings map,
//! talk to the hardware (or remote API) once, and return
//!
//! - `Ok(Some(measurement))` when a value was obtained,
//! - `Ok(None)` when no data could be had for a reason reachable from
//!   configuration alone (missing port, device not present, malformed or
//!   late response),
//! - `Err(DriverError)` only for faults the driver did not anticipate.
//!
//! Drivers are constructed once by the [`DriverRegistry`] and shared across
//! reads, so they must not hold per-read state. Each read opens and closes
//! its own device handle.

mod dfrobot_ult;
mod hx711_load_cell;
mod openweather;
mod registry;
mod serial;
mod sht3x;

pub use dfrobot_ult::{DfrobotUltDriver, FrameScanner};
pub use hx711_load_cell::{parse_weight_line, Hx711LoadCellDriver};
pub use openweather::OpenweatherDriver;
pub use registry::{driver_type_name, DriverConstructor, DriverRegistry, RegistryError};
pub use sht3x::{decode_measurement, Sht3xDriver};

use crate::config::Settings;
use crate::reading::Measurement;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("Driver initialization failed: {0}")]
    Init(String),
}

pub type DriverResult = Result<Option<Measurement>, DriverError>;

/// A unit of hardware access
pub trait Driver: Send + Sync {
    /// Perform one blocking read using the sensor's settings
    fn read(&self, settings: &Settings) -> DriverResult;
}

/// String setting; numbers are accepted and rendered as text
fn setting_str(settings: &Settings, key: &str) -> Option<String> {
    match settings.get(key)? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Unsigned integer setting; numeric strings are accepted too
fn setting_u32(settings: &Settings, key: &str) -> Option<u32> {
    match settings.get(key)? {
        serde_json::Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn single(key: &str, value: f64) -> Measurement {
    let mut measurement = Measurement::new();
    measurement.insert(key.to_string(), value);
    measurement
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(value: serde_json::Value) -> Settings {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_setting_str() {
        let s = settings(json!({"port": " /dev/ttyUSB0 ", "lat": 41.5, "empty": "", "flag": true}));
        assert_eq!(setting_str(&s, "port").as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(setting_str(&s, "lat").as_deref(), Some("41.5"));
        assert_eq!(setting_str(&s, "empty"), None);
        assert_eq!(setting_str(&s, "flag"), None);
        assert_eq!(setting_str(&s, "missing"), None);
    }

    #[test]
    fn test_setting_u32() {
        let s = settings(json!({"baudrate": 115200, "bus": "1", "neg": -3, "bad": "x"}));
        assert_eq!(setting_u32(&s, "baudrate"), Some(115200));
        assert_eq!(setting_u32(&s, "bus"), Some(1));
        assert_eq!(setting_u32(&s, "neg"), None);
        assert_eq!(setting_u32(&s, "bad"), None);
    }

    #[test]
    fn test_driver_error_display() {
        assert_eq!(
            DriverError::Serial("device busy".into()).to_string(),
            "Serial port error: device busy"
        );
        assert_eq!(
            DriverError::Init("no bus".into()).to_string(),
            "Driver initialization failed: no bus"
        );
    }
}
