use base64::Engine;
use chrono::{DateTime, Utc};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_FFMPEG: &str = "ffmpeg";
/// RTSP sources can stall indefinitely; the capture is killed after this
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Keep log lines readable when ffmpeg dumps a long error
const STDERR_TAIL: usize = 2048;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame grab exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("frame grab did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("frame grab produced no file at {0}")]
    MissingOutput(PathBuf),
}

/// Grabs a single still frame from a camera stream into a file
pub trait FrameGrabber: Send + Sync {
    fn grab(&self, stream_url: &str, output: &Path) -> Result<(), CaptureError>;
}

/// Frame grabber backed by an external `ffmpeg` process.
///
/// The frame is scaled to 1280 px wide and written as a JPEG at quality 4.
#[derive(Debug, Clone)]
pub struct FfmpegGrabber {
    program: PathBuf,
    timeout: Duration,
}

impl FfmpegGrabber {
    pub fn new() -> Self {
        Self::with_program(DEFAULT_FFMPEG)
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_CAPTURE_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn wait_with_deadline(
        &self,
        child: &mut std::process::Child,
    ) -> Result<ExitStatus, CaptureError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::TimedOut(self.timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Default for FfmpegGrabber {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameGrabber for FfmpegGrabber {
    fn grab(&self, stream_url: &str, output: &Path) -> Result<(), CaptureError> {
        let mut child = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-i", stream_url])
            .args(["-vframes", "1", "-vf", "scale=1280:-1", "-q:v", "4", "-y"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CaptureError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        // Drain stderr on its own thread so a chatty ffmpeg cannot fill the pipe
        let stderr = child.stderr.take();
        let stderr_reader = std::thread::spawn(move || {
            let mut text = String::new();
            if let Some(mut pipe) = stderr {
                let _ = pipe.read_to_string(&mut text);
            }
            text
        });

        let status = self.wait_with_deadline(&mut child);
        let stderr = stderr_reader.join().unwrap_or_default();
        let status = status?;

        if !status.success() {
            return Err(CaptureError::Failed {
                status,
                stderr: tail(stderr.trim(), STDERR_TAIL).to_string(),
            });
        }

        if !output.is_file() {
            return Err(CaptureError::MissingOutput(output.to_path_buf()));
        }

        Ok(())
    }
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// `<UTC timestamp>_<device>_<camera>.jpg`, filesystem safe (no colons)
pub fn capture_file_name(at: DateTime<Utc>, device_id: &str, camera_id: &str) -> String {
    format!(
        "{}_{}_{}.jpg",
        at.format("%Y-%m-%dT%H-%M-%S"),
        device_id,
        camera_id
    )
}

/// Read a captured image and encode it as standard base64
pub fn encode_image(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}
