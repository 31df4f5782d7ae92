//! Local device identity: which server to talk to, as which device.
//!
//! Read from a small JSON file next to the agent:
//!
//! ```json
//! {
//!   "server": {"base_url": "https://orion.example"},
//!   "device": {"id": "rpi-01", "token": "..."}
//! }
//! ```
//!
//! Values given on the command line (or through the environment) take
//! precedence over the file. When all three are given that way the file is
//! not read at all.

use crate::config::Id;
use crate::secret::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("identity file {0} not found")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("missing {0} (set it in the identity file or on the command line)")]
    Missing(&'static str),
}

#[derive(Debug, Default, Deserialize)]
struct IdentityFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    device: DeviceSection,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DeviceSection {
    id: Option<Id>,
    token: Option<SecretString>,
}

/// Identity values supplied outside the file
#[derive(Debug, Clone, Default)]
pub struct IdentityOverrides {
    pub server_url: Option<String>,
    pub device_id: Option<String>,
    pub token: Option<SecretString>,
}

impl IdentityOverrides {
    fn is_complete(&self) -> bool {
        non_empty(self.server_url.as_deref()).is_some()
            && non_empty(self.device_id.as_deref()).is_some()
            && self.token.as_ref().is_some_and(|t| !t.is_empty())
    }
}

/// Resolved device identity
#[derive(Debug, Clone)]
pub struct Identity {
    pub server_url: String,
    pub device_id: String,
    pub token: SecretString,
}

impl Identity {
    /// Merge `overrides` over the identity file at `path`
    pub fn load(path: &Path, overrides: IdentityOverrides) -> Result<Self, ConfigError> {
        let file = if overrides.is_complete() {
            tracing::debug!(
                "Identity fully given on the command line, not reading {}",
                path.display()
            );
            IdentityFile::default()
        } else {
            read_identity_file(path)?
        };

        let server_url = non_empty(overrides.server_url.as_deref())
            .or_else(|| non_empty(file.server.base_url.as_deref()))
            .map(str::to_string)
            .ok_or(ConfigError::Missing("server.base_url"))?;

        let device_id = non_empty(overrides.device_id.as_deref())
            .map(str::to_string)
            .or_else(|| file.device.id.map(|id| id.to_string()))
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConfigError::Missing("device.id"))?;

        let token = overrides
            .token
            .filter(|t| !t.is_empty())
            .or(file.device.token)
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::Missing("device.token"))?;

        Ok(Self {
            server_url,
            device_id,
            token,
        })
    }
}

fn read_identity_file(path: &Path) -> Result<IdentityFile, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
