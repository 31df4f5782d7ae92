use crate::command::{CommandEntry, CommandStatus};
use crate::config::{AgentConfig, Id};
use crate::reading::Reading;
use crate::secret::SecretString;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

const CONFIG_TIMEOUT: Duration = Duration::from_secs(10);
const READING_TIMEOUT: Duration = Duration::from_secs(10);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("HTTP status error: {0}")]
    StatusError(u16),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    JoinError(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Photo payload for the camera upload endpoint
#[derive(Debug, Clone, Serialize)]
pub struct PhotoUpload {
    /// Base64-encoded JPEG
    pub image: String,
    pub filename: String,
}

/// Calls the agent makes against the management server.
///
/// Implemented by [`ApiClient`] over HTTP; the runtime only depends on this
/// trait so it can run against an in-memory server in tests.
pub trait Transport: Send + Sync + 'static {
    /// Fetch this device's sensor and camera configuration
    fn fetch_config(&self) -> impl Future<Output = Result<AgentConfig>> + Send;

    /// Submit a single reading
    fn submit_reading(&self, reading: Reading) -> impl Future<Output = Result<()>> + Send;

    /// Fetch pending commands. A non-200 answer means "no commands"; a list
    /// entry that does not decode comes back as [`CommandEntry::Malformed`].
    fn fetch_commands(&self) -> impl Future<Output = Result<Vec<CommandEntry>>> + Send;

    /// Report a command's outcome
    fn update_command_status(
        &self,
        command_id: Id,
        status: CommandStatus,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Upload a captured photo for a camera
    fn upload_photo(
        &self,
        camera_id: Id,
        photo: PhotoUpload,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// API client for communicating with the Orion server
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    device_id: String,
    token: SecretString,
}

impl ApiClient {
    /// Create a new API client. `server_url` is the server root; the client
    /// appends `/api` itself.
    pub fn new(server_url: &str, device_id: impl Into<String>, token: SecretString) -> Self {
        Self {
            base_url: format!("{}/api", server_url.trim_end_matches('/')),
            device_id: device_id.into(),
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

/// Run a blocking ureq call on the blocking pool
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::JoinError(e.to_string()))?
}

/// Map ureq's error split (status vs transport) onto ApiError
fn map_ureq_error(err: ureq::Error) -> ApiError {
    match err {
        ureq::Error::Status(code, _) => ApiError::StatusError(code),
        ureq::Error::Transport(t) => ApiError::RequestFailed(t.to_string()),
    }
}

fn expect_success(response: &ureq::Response) -> Result<()> {
    let status = response.status();
    if !(200..300).contains(&status) {
        return Err(ApiError::StatusError(status));
    }
    Ok(())
}

impl Transport for ApiClient {
    async fn fetch_config(&self) -> Result<AgentConfig> {
        let url = self.url(&format!("config/{}", self.device_id));
        let auth = self.token.authorization();

        blocking(move || {
            let response = ureq::get(&url)
                .set("Authorization", &auth)
                .timeout(CONFIG_TIMEOUT)
                .call()
                .map_err(map_ureq_error)?;

            expect_success(&response)?;

            let config: AgentConfig = response.into_json()?;
            Ok(config)
        })
        .await
    }

    async fn submit_reading(&self, reading: Reading) -> Result<()> {
        let url = self.url("submit-reading");
        let auth = self.token.authorization();

        blocking(move || {
            let response = ureq::post(&url)
                .set("Authorization", &auth)
                .timeout(READING_TIMEOUT)
                .send_json(&reading)
                .map_err(map_ureq_error)?;

            expect_success(&response)
        })
        .await
    }

    async fn fetch_commands(&self) -> Result<Vec<CommandEntry>> {
        let url = self.url(&format!("commands/{}", self.device_id));
        let auth = self.token.authorization();

        blocking(move || {
            let response = match ureq::get(&url)
                .set("Authorization", &auth)
                .timeout(COMMAND_TIMEOUT)
                .call()
            {
                Ok(response) => response,
                // 404 and friends just mean nothing is queued for us
                Err(ureq::Error::Status(code, _)) => {
                    tracing::debug!("Command poll returned HTTP {}", code);
                    return Ok(Vec::new());
                }
                Err(e) => return Err(map_ureq_error(e)),
            };

            if response.status() != 200 {
                return Ok(Vec::new());
            }

            let entries: Vec<serde_json::Value> = response.into_json()?;
            Ok(entries.into_iter().map(CommandEntry::decode).collect())
        })
        .await
    }

    async fn update_command_status(&self, command_id: Id, status: CommandStatus) -> Result<()> {
        let url = self.url(&format!("commands/{}/{}", command_id, status.as_str()));
        let auth = self.token.authorization();

        blocking(move || {
            let response = ureq::post(&url)
                .set("Authorization", &auth)
                .timeout(COMMAND_TIMEOUT)
                .call()
                .map_err(map_ureq_error)?;

            expect_success(&response)
        })
        .await
    }

    async fn upload_photo(&self, camera_id: Id, photo: PhotoUpload) -> Result<()> {
        let url = self.url(&format!("cameras/{}/upload-photo", camera_id));
        let auth = self.token.authorization();

        blocking(move || {
            let response = ureq::post(&url)
                .set("Authorization", &auth)
                .timeout(UPLOAD_TIMEOUT)
                .send_json(&photo)
                .map_err(map_ureq_error)?;

            expect_success(&response)
        })
        .await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("device_id", &self.device_id)
            .field("token", &self.token)
            .finish()
    }
}
