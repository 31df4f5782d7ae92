use super::Agent;
use crate::api_client::Transport;
use crate::config::SensorConfig;
use crate::drivers::Driver;
use crate::reading::{Measurement, Reading};
use std::sync::Arc;
use std::time::{Duration, Instant};

impl<T: Transport> Agent<T> {
    /// One sampling pass over every due sensor
    pub async fn sample_sensors(&mut self) {
        self.sample_sensors_at(Instant::now()).await;
    }

    /// Sampling pass with an explicit notion of "now".
    ///
    /// Does nothing unless the agent is online with a configuration. A
    /// sensor's failure (resolution, read, timeout or submission) never
    /// stops the rest of the pass.
    pub async fn sample_sensors_at(&mut self, now: Instant) {
        if !self.connectivity.is_online() {
            return;
        }
        let Some(config) = &self.config else {
            return;
        };

        let due: Vec<SensorConfig> = config
            .sampled_sensors()
            .filter(|sensor| {
                let frequency = Duration::from_secs(config.effective_frequency(sensor));
                match self.last_reads.get(&sensor.id) {
                    Some(last) => now.saturating_duration_since(*last) >= frequency,
                    None => true,
                }
            })
            .cloned()
            .collect();

        for sensor in due {
            self.sample_sensor(sensor, now).await;
        }
    }

    async fn sample_sensor(&mut self, sensor: SensorConfig, now: Instant) {
        tracing::info!("Reading {} (ID: {})", sensor.name, sensor.id);

        // Marked before the attempt so a failing sensor waits a full period
        self.last_reads.insert(sensor.id.clone(), now);

        let Some(driver_name) = sensor.driver() else {
            tracing::error!(
                "Could not load driver for {}: no driver configured",
                sensor.name
            );
            return;
        };

        let driver = match self.registry.resolve(driver_name) {
            Ok(driver) => driver,
            Err(e) => {
                tracing::error!("Could not load driver for {}: {}", sensor.name, e);
                return;
            }
        };

        if let Some(measurement) = self.read_with_timeout(driver, driver_name, &sensor).await {
            self.submit_reading(Reading::new(sensor.id.clone(), measurement))
                .await;
        }

        tracing::debug!("Finished reading {}", sensor.name);
    }

    /// Run the blocking driver read off the loop, bounded by the driver timeout
    async fn read_with_timeout(
        &self,
        driver: Arc<dyn Driver>,
        driver_name: &str,
        sensor: &SensorConfig,
    ) -> Option<Measurement> {
        let settings = sensor.config.clone();
        let read = tokio::task::spawn_blocking(move || driver.read(&settings));

        match tokio::time::timeout(self.timing.driver_timeout, read).await {
            Ok(Ok(Ok(Some(measurement)))) => Some(measurement),
            Ok(Ok(Ok(None))) => {
                tracing::warn!("No data from {} (ID: {})", sensor.name, sensor.id);
                None
            }
            Ok(Ok(Err(e))) => {
                tracing::error!(
                    "Error reading {} ({}): {}",
                    sensor.name,
                    driver_name,
                    e
                );
                None
            }
            Ok(Err(e)) => {
                tracing::error!(
                    "Driver {} crashed while reading {}: {}",
                    driver_name,
                    sensor.name,
                    e
                );
                None
            }
            // The blocking thread is left to finish on its own; its result is dropped
            Err(_) => {
                tracing::error!(
                    "Reading {} ({}) timed out after {}s",
                    sensor.name,
                    driver_name,
                    self.timing.driver_timeout.as_secs_f32()
                );
                None
            }
        }
    }

    async fn submit_reading(&mut self, reading: Reading) {
        let sensor = reading.sensor.clone();
        match self.transport.submit_reading(reading).await {
            Ok(()) => tracing::info!("Reading sent (sensor ID: {})", sensor),
            Err(e) => {
                tracing::error!("Failed to send reading for sensor {}: {}", sensor, e);
                self.connectivity.submission_failed();
            }
        }
    }
}
