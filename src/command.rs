use crate::config::Id;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const CAPTURE_IMAGE: &str = "CAPTURE_IMAGE";
pub const ANALYZE_SNOW_DEPTH: &str = "ANALYZE_SNOW_DEPTH";

/// Remote command as returned by the commands endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Command {
    pub id: Id,
    pub command_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// One entry of the pending-command list.
///
/// Entries are decoded one at a time so a single bad entry does not drop
/// the rest of the batch. A malformed entry keeps its id when it has one,
/// which is enough to report it as failed.
#[derive(Debug, Clone)]
pub enum CommandEntry {
    Valid(Command),
    Malformed { id: Option<Id>, reason: String },
}

impl CommandEntry {
    pub fn decode(value: serde_json::Value) -> Self {
        let id = value
            .get("id")
            .and_then(|id| serde_json::from_value::<Id>(id.clone()).ok());

        match serde_json::from_value::<Command>(value) {
            Ok(command) => Self::Valid(command),
            Err(e) => Self::Malformed {
                id,
                reason: e.to_string(),
            },
        }
    }
}

/// Typed view of a command, resolved from its type tag and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    CaptureImage { camera_id: Id },
    AnalyzeSnowDepth { camera_id: Id, virtual_sensor_id: Id },
    Unknown(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{command_type} payload is missing '{field}'")]
    MissingField {
        command_type: &'static str,
        field: &'static str,
    },
    #[error("{command_type} payload has invalid '{field}': {source}")]
    InvalidField {
        command_type: &'static str,
        field: &'static str,
        source: serde_json::Error,
    },
}

impl Command {
    /// Resolve the command type and pull the fields its action needs out of
    /// the payload. Unrecognised types are not an error.
    pub fn kind(&self) -> Result<CommandKind, CommandError> {
        match self.command_type.as_str() {
            CAPTURE_IMAGE => Ok(CommandKind::CaptureImage {
                camera_id: self.payload_id(CAPTURE_IMAGE, "camera_id")?,
            }),
            ANALYZE_SNOW_DEPTH => Ok(CommandKind::AnalyzeSnowDepth {
                camera_id: self.payload_id(ANALYZE_SNOW_DEPTH, "camera_id")?,
                virtual_sensor_id: self.payload_id(ANALYZE_SNOW_DEPTH, "virtual_sensor_id")?,
            }),
            other => Ok(CommandKind::Unknown(other.to_string())),
        }
    }

    fn payload_id(
        &self,
        command_type: &'static str,
        field: &'static str,
    ) -> Result<Id, CommandError> {
        let value = self
            .payload
            .get(field)
            .ok_or(CommandError::MissingField {
                command_type,
                field,
            })?;

        serde_json::from_value(value.clone()).map_err(|source| CommandError::InvalidField {
            command_type,
            field,
            source,
        })
    }
}

/// Outcome reported back to the server for each executed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn from_success(success: bool) -> Self {
        if success {
            Self::Completed
        } else {
            Self::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
