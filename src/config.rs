use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Read frequency applied when neither the sensor nor the global override sets one
pub const DEFAULT_READ_FREQUENCY_SECS: u64 = 300;

/// Driver settings map supplied per sensor (port, baudrate, address, apikey, ...)
pub type Settings = serde_json::Map<String, serde_json::Value>;

/// Server-side identifier. The API hands out numeric ids, but string ids are
/// accepted as well and echoed back in the same form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Num(i64),
    Text(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Self::Num(n)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Treat an explicit `null` the same as a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Configuration received from the API
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub sensors: Vec<SensorConfig>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cameras: Vec<CameraConfig>,
    /// Zero or negative means "no override"
    #[serde(default)]
    pub global_read_frequency_seconds: Option<i64>,
}

impl AgentConfig {
    /// Global override, only when it is set to a positive value
    pub fn global_override(&self) -> Option<u64> {
        self.global_read_frequency_seconds
            .filter(|secs| *secs > 0)
            .and_then(|secs| u64::try_from(secs).ok())
    }

    /// Seconds between reads for a sensor, honouring the global override
    pub fn effective_frequency(&self, sensor: &SensorConfig) -> u64 {
        self.global_override()
            .unwrap_or_else(|| sensor.read_frequency_secs())
    }

    /// Sensors the sampling pass is allowed to touch
    pub fn sampled_sensors(&self) -> impl Iterator<Item = &SensorConfig> {
        self.sensors.iter().filter(|s| s.is_sampled())
    }

    pub fn camera(&self, id: &Id) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| &c.id == id)
    }
}

/// How the sensor is attached to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorInterface {
    #[default]
    Physical,
    /// Computed server-side (e.g. from camera analysis), never read locally
    Virtual,
    #[serde(other)]
    Other,
}

/// Sensor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SensorConfig {
    pub id: Id,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub interface: SensorInterface,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_active: bool,
    #[serde(default)]
    pub read_frequency: Option<i64>,
    /// Virtual sensors usually carry none
    #[serde(default)]
    pub parser_config: Option<ParserConfig>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub config: Settings,
}

impl SensorConfig {
    /// Own read frequency; a negative value makes the sensor due on every pass
    pub fn read_frequency_secs(&self) -> u64 {
        match self.read_frequency {
            Some(secs) => u64::try_from(secs).unwrap_or(0),
            None => DEFAULT_READ_FREQUENCY_SECS,
        }
    }

    pub fn is_sampled(&self) -> bool {
        self.is_active && self.interface != SensorInterface::Virtual
    }

    /// Driver name from `parser_config`, if one is set
    pub fn driver(&self) -> Option<&str> {
        self.parser_config
            .as_ref()
            .and_then(|p| p.driver.as_deref())
            .filter(|name| !name.is_empty())
    }
}

/// Names the driver that knows how to talk to the sensor
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ParserConfig {
    #[serde(default)]
    pub driver: Option<String>,
}

/// Camera configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CameraConfig {
    pub id: Id,
    pub name: String,
    #[serde(default, alias = "stream_url")]
    pub rtsp_url: Option<String>,
}

impl CameraConfig {
    pub fn stream_url(&self) -> Option<&str> {
        self.rtsp_url.as_deref().filter(|url| !url.is_empty())
    }
}
