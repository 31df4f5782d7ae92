use super::{setting_str, setting_u32};
use crate::config::Settings;
use serialport::SerialPort;
use std::io;
use std::time::Duration;

const DEFAULT_BAUD_RATE: u32 = 9600;

/// Port settings shared by the serial drivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
}

impl SerialSettings {
    /// `port` is required; `baudrate` defaults to 9600
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        let port = setting_str(settings, "port")?;
        let baud_rate = setting_u32(settings, "baudrate").unwrap_or(DEFAULT_BAUD_RATE);
        Some(Self { port, baud_rate })
    }
}

/// Open a serial port. Failures reachable from configuration (missing
/// device, permissions) are logged and turned into `None`.
pub(super) fn open(
    tag: &str,
    serial: &SerialSettings,
    read_timeout: Duration,
) -> Option<Box<dyn SerialPort>> {
    match serialport::new(&serial.port, serial.baud_rate)
        .timeout(read_timeout)
        .open()
    {
        Ok(port) => Some(port),
        Err(e) => {
            tracing::error!("{}: serial port error ({}): {}", tag, serial.port, e);
            if is_permission_denied(&e) {
                tracing::warn!(
                    "{}: make sure the agent user is in the 'dialout' group \
                     (sudo usermod -a -G dialout $USER) and log in again",
                    tag
                );
            }
            None
        }
    }
}

fn is_permission_denied(e: &serialport::Error) -> bool {
    matches!(
        e.kind,
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied)
    ) || e.description.contains("Permission denied")
}

/// A read that simply produced no bytes before the port timeout
pub(super) fn is_idle(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
