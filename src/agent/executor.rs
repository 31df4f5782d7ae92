use super::Agent;
use crate::api_client::{PhotoUpload, Transport};
use crate::capture::{capture_file_name, encode_image, CaptureError};
use crate::command::{Command, CommandEntry, CommandKind, CommandStatus};
use crate::config::Id;
use std::path::Path;
use std::sync::Arc;

impl<T: Transport> Agent<T> {
    /// Fetch pending commands and run each one. Online only.
    pub async fn poll_commands(&self) {
        if !self.connectivity.is_online() {
            return;
        }

        let entries = match self.transport.fetch_commands().await {
            Ok(entries) => entries,
            // Timeouts and unreachable servers are routine here; the config poll reports them
            Err(e) => {
                tracing::debug!("Command poll failed: {}", e);
                return;
            }
        };

        if entries.is_empty() {
            return;
        }

        tracing::info!("{} new command(s) received", entries.len());
        for entry in entries {
            match entry {
                CommandEntry::Valid(command) => {
                    self.execute_command(command).await;
                }
                CommandEntry::Malformed { id: Some(id), reason } => {
                    tracing::error!("Command {} could not be decoded: {}", id, reason);
                    self.report_status(&id, CommandStatus::Failed).await;
                }
                CommandEntry::Malformed { id: None, reason } => {
                    tracing::warn!("Skipping command without a usable id: {}", reason);
                }
            }
        }
    }

    /// Run one command and report its outcome exactly once
    pub async fn execute_command(&self, command: Command) -> CommandStatus {
        tracing::info!(
            "Executing command {} (ID: {})",
            command.command_type,
            command.id
        );

        let success = match command.kind() {
            Ok(CommandKind::CaptureImage { camera_id }) => self.capture_image(&camera_id).await,
            Ok(CommandKind::AnalyzeSnowDepth {
                camera_id,
                virtual_sensor_id,
            }) => self.analyze_snow_depth(&camera_id, &virtual_sensor_id),
            Ok(CommandKind::Unknown(command_type)) => {
                tracing::warn!(
                    "Unknown command type {} (ID: {}), reporting failed",
                    command_type,
                    command.id
                );
                false
            }
            Err(e) => {
                tracing::error!("Command {} rejected: {}", command.id, e);
                false
            }
        };

        let status = CommandStatus::from_success(success);
        self.report_status(&command.id, status).await;
        status
    }

    async fn report_status(&self, id: &Id, status: CommandStatus) {
        if let Err(e) = self.transport.update_command_status(id.clone(), status).await {
            tracing::error!("Could not update status of command {}: {}", id, e);
        }
    }

    /// Grab a frame from the camera, upload it, and remove the local file
    async fn capture_image(&self, camera_id: &Id) -> bool {
        let Some(camera) = self.config.as_ref().and_then(|c| c.camera(camera_id)) else {
            tracing::error!("Cannot capture photo: camera {} is not configured", camera_id);
            return false;
        };
        let Some(stream_url) = camera.stream_url() else {
            tracing::error!("Cannot capture photo: camera {} has no stream URL", camera_id);
            return false;
        };

        let filename = capture_file_name(
            chrono::Utc::now(),
            &self.device_id,
            &camera_id.to_string(),
        );
        let path = self.uploads_dir.join(&filename);

        tracing::info!("Capturing photo from {}", camera.name);

        let grabber = Arc::clone(&self.grabber);
        let stream_url = stream_url.to_string();
        let dir = self.uploads_dir.clone();
        let target = path.clone();
        let captured = tokio::task::spawn_blocking(move || -> Result<String, CaptureError> {
            std::fs::create_dir_all(&dir)?;
            grabber.grab(&stream_url, &target)?;
            Ok(encode_image(&target)?)
        })
        .await;

        let image = match captured {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => {
                tracing::error!("Photo capture from {} failed: {}", camera.name, e);
                remove_capture(&path);
                return false;
            }
            Err(e) => {
                tracing::error!("Photo capture task failed: {}", e);
                remove_capture(&path);
                return false;
            }
        };
        tracing::info!("Image saved: {}", path.display());

        let photo = PhotoUpload {
            image,
            filename: filename.clone(),
        };
        let uploaded = self.transport.upload_photo(camera_id.clone(), photo).await;
        remove_capture(&path);

        match uploaded {
            Ok(()) => {
                tracing::info!("Photo uploaded: {}", filename);
                true
            }
            Err(e) => {
                tracing::error!("Photo upload failed: {}", e);
                false
            }
        }
    }

    /// Image analysis runs server-side for now; the command is acknowledged
    fn analyze_snow_depth(&self, camera_id: &Id, virtual_sensor_id: &Id) -> bool {
        tracing::warn!(
            "Snow depth analysis is not available on the agent (camera {}, virtual sensor {})",
            camera_id,
            virtual_sensor_id
        );
        true
    }
}

fn remove_capture(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Could not remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{FakeGrabber, FakeTransport};
    use super::*;
    use crate::command::{ANALYZE_SNOW_DEPTH, CAPTURE_IMAGE};
    use crate::config::{AgentConfig, CameraConfig};
    use crate::state::ConnectionState;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn camera(id: i64, url: Option<&str>) -> CameraConfig {
        CameraConfig {
            id: Id::Num(id),
            name: format!("camera-{}", id),
            rtsp_url: url.map(str::to_string),
        }
    }

    fn command(id: i64, command_type: &str, payload: serde_json::Value) -> Command {
        Command {
            id: Id::Num(id),
            command_type: command_type.to_string(),
            payload,
        }
    }

    async fn online_agent(
        cameras: Vec<CameraConfig>,
        grabber: Arc<FakeGrabber>,
        uploads: &Path,
    ) -> Agent<FakeTransport> {
        let config = AgentConfig {
            cameras,
            ..Default::default()
        };
        let mut agent = Agent::new(FakeTransport::with_config(config), "rpi-7")
            .with_grabber(grabber)
            .with_uploads_dir(uploads);
        agent.fetch_config().await;
        agent
    }

    fn dir_is_empty(path: &Path) -> bool {
        std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    #[tokio::test]
    async fn test_empty_command_list_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let agent = online_agent(vec![], Arc::new(FakeGrabber::failing()), dir.path()).await;

        agent.poll_commands().await;

        let state = agent.transport().state();
        assert_eq!(state.command_fetches, 1);
        assert!(state.statuses.is_empty());
        assert!(state.uploads.is_empty());
    }

    #[tokio::test]
    async fn test_no_polling_while_offline() {
        let agent = Agent::new(FakeTransport::default(), "rpi-7");
        agent.poll_commands().await;
        assert_eq!(agent.transport().state().command_fetches, 0);

        let mut agent = agent;
        agent.fetch_config().await;
        assert_eq!(agent.state(), ConnectionState::Offline);
        agent.poll_commands().await;
        assert_eq!(agent.transport().state().command_fetches, 0);
    }

    #[tokio::test]
    async fn test_unknown_command_reports_failed_once() {
        let dir = tempfile::tempdir().unwrap();
        let agent = online_agent(vec![], Arc::new(FakeGrabber::failing()), dir.path()).await;
        agent.transport().state().pending = vec![command(11, "REBOOT", json!({}))];

        agent.poll_commands().await;

        assert_eq!(
            agent.transport().state().statuses,
            vec![(Id::Num(11), CommandStatus::Failed)]
        );
    }

    #[tokio::test]
    async fn test_malformed_entry_does_not_drop_batch() {
        let dir = tempfile::tempdir().unwrap();
        let agent = online_agent(vec![], Arc::new(FakeGrabber::failing()), dir.path()).await;
        {
            let mut state = agent.transport().state();
            state.pending = vec![command(
                50,
                ANALYZE_SNOW_DEPTH,
                json!({"camera_id": 1, "virtual_sensor_id": 2}),
            )];
            state.pending_raw = vec![
                json!({"id": 51, "command_type": null}),
                json!({"command_type": "CAPTURE_IMAGE"}),
            ];
        }

        agent.poll_commands().await;

        // The good command runs; the bad one with an id is reported once
        assert_eq!(
            agent.transport().state().statuses,
            vec![
                (Id::Num(50), CommandStatus::Completed),
                (Id::Num(51), CommandStatus::Failed),
            ]
        );
    }

    #[tokio::test]
    async fn test_snow_depth_stub_completes() {
        let dir = tempfile::tempdir().unwrap();
        let agent = online_agent(vec![], Arc::new(FakeGrabber::failing()), dir.path()).await;

        let status = agent
            .execute_command(command(
                12,
                ANALYZE_SNOW_DEPTH,
                json!({"camera_id": 1, "virtual_sensor_id": 5}),
            ))
            .await;

        assert_eq!(status, CommandStatus::Completed);
        assert_eq!(
            agent.transport().state().statuses,
            vec![(Id::Num(12), CommandStatus::Completed)]
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_reports_failed() {
        let dir = tempfile::tempdir().unwrap();
        let agent = online_agent(vec![], Arc::new(FakeGrabber::failing()), dir.path()).await;

        let status = agent
            .execute_command(command(13, CAPTURE_IMAGE, json!({})))
            .await;

        assert_eq!(status, CommandStatus::Failed);
        assert_eq!(agent.transport().state().statuses.len(), 1);
    }

    #[tokio::test]
    async fn test_capture_uploads_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let grabber = Arc::new(FakeGrabber::producing(b"hello"));
        let agent = online_agent(
            vec![camera(3, Some("rtsp://cam/stream"))],
            Arc::clone(&grabber),
            &uploads,
        )
        .await;
        agent.transport().state().pending =
            vec![command(20, CAPTURE_IMAGE, json!({"camera_id": 3}))];

        agent.poll_commands().await;

        let state = agent.transport().state();
        assert_eq!(state.statuses, vec![(Id::Num(20), CommandStatus::Completed)]);
        assert_eq!(state.uploads.len(), 1);

        let (camera_id, photo) = &state.uploads[0];
        assert_eq!(camera_id, &Id::Num(3));
        assert_eq!(photo.image, "aGVsbG8=");
        let name =
            regex::Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}_rpi-7_3\.jpg$").unwrap();
        assert!(name.is_match(&photo.filename), "got {}", photo.filename);

        assert_eq!(grabber.grabs.load(Ordering::SeqCst), 1);
        assert!(dir_is_empty(&uploads));
    }

    #[tokio::test]
    async fn test_upload_failure_still_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let agent = online_agent(
            vec![camera(3, Some("rtsp://cam/stream"))],
            Arc::new(FakeGrabber::producing(b"jpeg")),
            dir.path(),
        )
        .await;
        agent.transport().state().fail_uploads = true;

        let status = agent
            .execute_command(command(21, CAPTURE_IMAGE, json!({"camera_id": 3})))
            .await;

        assert_eq!(status, CommandStatus::Failed);
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_grab_failure_reports_failed_without_upload() {
        let dir = tempfile::tempdir().unwrap();
        let agent = online_agent(
            vec![camera(3, Some("rtsp://cam/stream"))],
            Arc::new(FakeGrabber::failing()),
            dir.path(),
        )
        .await;

        let status = agent
            .execute_command(command(22, CAPTURE_IMAGE, json!({"camera_id": 3})))
            .await;

        assert_eq!(status, CommandStatus::Failed);
        assert!(agent.transport().state().uploads.is_empty());
    }

    #[tokio::test]
    async fn test_capture_needs_configured_camera_with_url() {
        let dir = tempfile::tempdir().unwrap();
        let grabber = Arc::new(FakeGrabber::producing(b"jpeg"));
        let agent = online_agent(
            vec![camera(4, None), camera(5, Some(""))],
            Arc::clone(&grabber),
            dir.path(),
        )
        .await;

        for camera_id in [3, 4, 5] {
            let cmd = command(30 + camera_id, CAPTURE_IMAGE, json!({"camera_id": camera_id}));
            let status = agent.execute_command(cmd).await;
            assert_eq!(status, CommandStatus::Failed);
        }

        assert_eq!(grabber.grabs.load(Ordering::SeqCst), 0);
        assert_eq!(agent.transport().state().statuses.len(), 3);
    }

    #[tokio::test]
    async fn test_status_report_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let agent = online_agent(vec![], Arc::new(FakeGrabber::failing()), dir.path()).await;
        agent.transport().state().fail_status_updates = true;
        agent.transport().state().pending = vec![
            command(40, "REBOOT", json!({})),
            command(41, ANALYZE_SNOW_DEPTH, json!({"camera_id": 1, "virtual_sensor_id": 2})),
        ];

        agent.poll_commands().await;

        assert_eq!(agent.transport().state().statuses.len(), 2);
        assert_eq!(agent.state(), ConnectionState::Online);
    }
}
