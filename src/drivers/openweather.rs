use super::{setting_str, Driver, DriverResult};
use crate::config::Settings;
use crate::reading::{round_to, Measurement};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://api.openweathermap.org/data/2.5/weather";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    main: MainBlock,
}

#[derive(Debug, Deserialize)]
struct MainBlock {
    temp: f64,
    humidity: f64,
}

/// Virtual weather station backed by the OpenWeatherMap current-weather API
#[derive(Debug, Clone)]
pub struct OpenweatherDriver {
    endpoint: String,
}

impl OpenweatherDriver {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT)
    }

    /// Point the driver at another current-weather endpoint
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl Default for OpenweatherDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for OpenweatherDriver {
    fn read(&self, settings: &Settings) -> DriverResult {
        let (Some(api_key), Some(lat), Some(lon)) = (
            setting_str(settings, "apikey"),
            setting_str(settings, "lat"),
            setting_str(settings, "lon"),
        ) else {
            tracing::error!("openweather: 'apikey', 'lat' and 'lon' are all required");
            return Ok(None);
        };

        tracing::debug!("openweather: fetching current weather for {},{}", lat, lon);

        let response = match ureq::get(&self.endpoint)
            .query("lat", &lat)
            .query("lon", &lon)
            .query("appid", &api_key)
            .query("units", "metric")
            .timeout(REQUEST_TIMEOUT)
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                tracing::error!("openweather: API answered HTTP {}", code);
                return Ok(None);
            }
            // The transport error's Display carries the URL (and the key), so log the kind only
            Err(e) => {
                tracing::error!("openweather: request failed: {}", e.kind());
                return Ok(None);
            }
        };

        let body: WeatherResponse = match response.into_json() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("openweather: unexpected response body: {}", e);
                return Ok(None);
            }
        };

        let mut measurement = Measurement::new();
        measurement.insert("temperature".to_string(), round_to(body.main.temp, 2));
        measurement.insert("humidity".to_string(), round_to(body.main.humidity, 2));
        Ok(Some(measurement))
    }
}
