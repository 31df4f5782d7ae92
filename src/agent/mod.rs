//! The agent runtime.
//!
//! One [`Agent`] owns everything the control loop mutates: the latest server
//! configuration, per-sensor read timestamps, the driver cache and the
//! connectivity state. The loop in [`scheduler`] is its only writer, so none
//! of it is locked.

mod executor;
mod sampler;
mod scheduler;

use crate::api_client::Transport;
use crate::capture::{FfmpegGrabber, FrameGrabber};
use crate::config::{AgentConfig, Id};
use crate::drivers::DriverRegistry;
use crate::state::{ConnectionState, Connectivity};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);
pub const DEFAULT_CONFIG_POLL: Duration = Duration::from_secs(60);
pub const DEFAULT_COMMAND_POLL: Duration = Duration::from_secs(5);
/// Longer than any built-in driver's own read budget
pub const DEFAULT_DRIVER_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_UPLOADS_DIR: &str = "uploads";

/// Cadences of the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Sleep at the end of every iteration
    pub tick: Duration,
    pub config_poll: Duration,
    pub command_poll: Duration,
    /// Hard limit on a single driver read
    pub driver_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            config_poll: DEFAULT_CONFIG_POLL,
            command_poll: DEFAULT_COMMAND_POLL,
            driver_timeout: DEFAULT_DRIVER_TIMEOUT,
        }
    }
}

pub struct Agent<T: Transport> {
    transport: T,
    device_id: String,
    timing: Timing,
    connectivity: Connectivity,
    config: Option<AgentConfig>,
    last_reads: HashMap<Id, Instant>,
    registry: DriverRegistry,
    grabber: Arc<dyn FrameGrabber>,
    uploads_dir: PathBuf,
}

impl<T: Transport> Agent<T> {
    pub fn new(transport: T, device_id: impl Into<String>) -> Self {
        Self {
            transport,
            device_id: device_id.into(),
            timing: Timing::default(),
            connectivity: Connectivity::new(),
            config: None,
            last_reads: HashMap::new(),
            registry: DriverRegistry::new(),
            grabber: Arc::new(FfmpegGrabber::new()),
            uploads_dir: PathBuf::from(DEFAULT_UPLOADS_DIR),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_registry(mut self, registry: DriverRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_grabber(mut self, grabber: Arc<dyn FrameGrabber>) -> Self {
        self.grabber = grabber;
        self
    }

    pub fn with_uploads_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.uploads_dir = dir.into();
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.connectivity.state()
    }

    pub fn config(&self) -> Option<&AgentConfig> {
        self.config.as_ref()
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// When the sensor's last read attempt started
    pub fn last_read(&self, sensor: &Id) -> Option<Instant> {
        self.last_reads.get(sensor).copied()
    }

    /// Fetch the configuration and move the state machine accordingly.
    ///
    /// A failed fetch keeps whatever configuration was loaded before.
    pub async fn fetch_config(&mut self) {
        tracing::info!("Fetching configuration from server");
        self.connectivity.begin_fetch();

        match self.transport.fetch_config().await {
            Ok(config) => {
                let global = match config.global_override() {
                    Some(secs) => format!("{}s", secs),
                    None => "none".to_string(),
                };
                tracing::info!(
                    "Configuration received: {} sensors, {} cameras, global frequency: {}",
                    config.sensors.len(),
                    config.cameras.len(),
                    global
                );
                self.config = Some(config);
                self.connectivity.fetch_succeeded();
            }
            Err(e) => {
                self.connectivity.fetch_failed();
                tracing::error!("Failed to fetch configuration: {}", e);
            }
        }
    }

    /// Release held resources; called once when the loop exits
    pub fn shutdown(&mut self) {
        tracing::info!(
            "Agent stopping in state {} ({} state changes, {} drivers loaded)",
            self.connectivity.state(),
            self.connectivity.transitions(),
            self.registry.loaded_count()
        );
        self.registry.release_all();
        tracing::info!("Shutdown complete");
    }
}
