use super::serial::{self, SerialSettings};
use super::{single, Driver, DriverResult};
use crate::config::Settings;
use crate::reading::round_to;
use std::collections::VecDeque;
use std::io::Read;
use std::time::{Duration, Instant};

/// First byte of every distance frame
pub const FRAME_HEADER: u8 = 0xFF;
const FRAME_LEN: usize = 4;

/// Overall time allowed to find one valid frame
const READ_BUDGET: Duration = Duration::from_secs(3);
/// Per-read port timeout; short so the overall budget is honoured
const PORT_TIMEOUT: Duration = Duration::from_millis(200);

/// Incremental scanner for the DFRobot ultrasonic/lidar frame:
/// `[0xFF, distance_hi, distance_lo, checksum]` where checksum is the low
/// byte of the sum of the first three bytes.
///
/// On a bad header or checksum the scanner drops exactly one byte and looks
/// again, so it resynchronises on a frame boundary hidden anywhere in the
/// stream.
#[derive(Debug, Default)]
pub struct FrameScanner {
    buffer: VecDeque<u8>,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes);
    }

    /// Bytes waiting to be scanned
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next valid frame's distance in millimetres, consuming it
    pub fn next_distance_mm(&mut self) -> Option<u16> {
        while self.buffer.len() >= FRAME_LEN {
            let frame = [
                self.buffer[0],
                self.buffer[1],
                self.buffer[2],
                self.buffer[3],
            ];

            if frame[0] == FRAME_HEADER && checksum(&frame[..3]) == frame[3] {
                self.buffer.drain(..FRAME_LEN);
                return Some(u16::from_be_bytes([frame[1], frame[2]]));
            }

            self.buffer.pop_front();
        }

        None
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Millimetres to centimetres, one decimal place
pub fn mm_to_cm(mm: u16) -> f64 {
    round_to(f64::from(mm) / 10.0, 1)
}

/// Pull bytes from `source` until a valid frame shows up or `budget` runs
/// out. Port timeouts count as "no bytes yet".
pub(crate) fn read_distance_cm<R: Read>(
    source: &mut R,
    budget: Duration,
) -> std::io::Result<Option<f64>> {
    let started = Instant::now();
    let mut scanner = FrameScanner::new();
    let mut chunk = [0u8; 64];

    while started.elapsed() < budget {
        match source.read(&mut chunk) {
            Ok(0) => std::thread::sleep(Duration::from_millis(10)),
            Ok(n) => {
                scanner.push(&chunk[..n]);
                if let Some(mm) = scanner.next_distance_mm() {
                    return Ok(Some(mm_to_cm(mm)));
                }
            }
            Err(e) if serial::is_idle(&e) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(None)
}

/// DFRobot distance sensor on a UART
#[derive(Debug, Default)]
pub struct DfrobotUltDriver;

impl DfrobotUltDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for DfrobotUltDriver {
    fn read(&self, settings: &Settings) -> DriverResult {
        let Some(serial) = SerialSettings::from_settings(settings) else {
            tracing::error!("dfrobot_ult: no 'port' in sensor configuration");
            return Ok(None);
        };

        tracing::debug!(
            "dfrobot_ult: reading {} at {} baud",
            serial.port,
            serial.baud_rate
        );

        let Some(mut port) = serial::open("dfrobot_ult", &serial, PORT_TIMEOUT) else {
            return Ok(None);
        };

        match read_distance_cm(&mut port, READ_BUDGET)? {
            Some(distance_cm) => {
                tracing::debug!("dfrobot_ult: parsed {} cm", distance_cm);
                Ok(Some(single("distance_cm", distance_cm)))
            }
            None => {
                tracing::warn!(
                    "dfrobot_ult: no valid frame from {} within {}s",
                    serial.port,
                    READ_BUDGET.as_secs()
                );
                Ok(None)
            }
        }
    }
}
