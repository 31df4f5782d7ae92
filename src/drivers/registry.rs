use super::{
    DfrobotUltDriver, Driver, DriverError, Hx711LoadCellDriver, OpenweatherDriver, Sht3xDriver,
};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// Builds a driver instance; called at most once per successful resolve
pub type DriverConstructor =
    Box<dyn Fn() -> Result<Arc<dyn Driver>, DriverError> + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no driver named '{name}' ({type_name} is not built in)")]
    Unknown { name: String, type_name: String },

    #[error("driver '{name}' failed to initialize: {source}")]
    Construction { name: String, source: DriverError },

    #[error("driver '{name}' panicked during initialization")]
    Panicked { name: String },
}

/// Conventional type name for a driver: `dfrobot_ult` -> `DfrobotUltDriver`
pub fn driver_type_name(name: &str) -> String {
    let mut type_name: String = name
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect();
    type_name.push_str("Driver");
    type_name
}

/// Static table of driver constructors plus the cache of live instances.
///
/// An instance is created the first time its name resolves and is then
/// shared for the rest of the process. Construction failures are not
/// cached, so the next resolve tries again.
pub struct DriverRegistry {
    constructors: HashMap<String, DriverConstructor>,
    instances: HashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Registry with every built-in driver
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("dfrobot_ult", || Ok(Arc::new(DfrobotUltDriver::new())));
        registry.register("hx711_load_cell", || {
            Ok(Arc::new(Hx711LoadCellDriver::new()))
        });
        registry.register("sht3x", || Ok(Arc::new(Sht3xDriver::new())));
        registry.register("openweather", || Ok(Arc::new(OpenweatherDriver::new())));
        registry
    }

    /// Registry with no drivers at all
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
            instances: HashMap::new(),
        }
    }

    /// Add or replace a constructor. Adding a sensor type means adding one
    /// call here.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Result<Arc<dyn Driver>, DriverError> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    /// Return the cached instance for `name`, creating it on first use
    pub fn resolve(&mut self, name: &str) -> Result<Arc<dyn Driver>, RegistryError> {
        if let Some(driver) = self.instances.get(name) {
            return Ok(Arc::clone(driver));
        }

        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| RegistryError::Unknown {
                name: name.to_string(),
                type_name: driver_type_name(name),
            })?;

        let driver = match panic::catch_unwind(AssertUnwindSafe(constructor)) {
            Ok(Ok(driver)) => driver,
            Ok(Err(source)) => {
                return Err(RegistryError::Construction {
                    name: name.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(RegistryError::Panicked {
                    name: name.to_string(),
                })
            }
        };

        self.instances.insert(name.to_string(), Arc::clone(&driver));
        tracing::info!(
            "Loaded driver {} ({}) (total: {})",
            name,
            driver_type_name(name),
            self.instances.len()
        );

        Ok(driver)
    }

    #[cfg(test)]
    pub(crate) fn is_loaded(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    pub fn loaded_count(&self) -> usize {
        self.instances.len()
    }

    /// Names of all drivers that can be resolved, sorted
    pub fn known_drivers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Drop every live instance (shutdown)
    pub fn release_all(&mut self) {
        if !self.instances.is_empty() {
            tracing::info!("Releasing {} driver instances", self.instances.len());
        }
        for (name, _) in self.instances.drain() {
            tracing::debug!("Released driver {}", name);
        }
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
