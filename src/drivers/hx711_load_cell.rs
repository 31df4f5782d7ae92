use super::serial::{self, SerialSettings};
use super::{single, Driver, DriverError, DriverResult};
use crate::config::Settings;
use serialport::ClearBuffer;
use std::io::{BufRead, BufReader};
use std::time::{Duration, Instant};

/// Time for the microcontroller behind the port to reset after the port opens
const SETTLE_DELAY: Duration = Duration::from_secs(2);
/// Overall time allowed for one reading, settle delay included
const READ_BUDGET: Duration = Duration::from_secs(7);
const PORT_TIMEOUT: Duration = Duration::from_millis(500);
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Parse a weight line of the form `= 12.34`
pub fn parse_weight_line(line: &str) -> Option<f64> {
    line.trim()
        .strip_prefix('=')?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|w| w.is_finite())
}

/// Read lines until one parses as a weight or `deadline` passes.
/// Malformed and non-UTF-8 lines are skipped.
pub(crate) fn read_weight_kg<R: BufRead>(
    reader: &mut R,
    deadline: Instant,
) -> std::io::Result<Option<f64>> {
    let mut raw = Vec::new();

    while Instant::now() < deadline {
        match reader.read_until(b'\n', &mut raw) {
            Ok(0) => {
                std::thread::sleep(IDLE_BACKOFF);
                continue;
            }
            // Partial line; keep what we have and wait for the rest
            Ok(_) if raw.last() != Some(&b'\n') => continue,
            Ok(_) => {}
            Err(e) if serial::is_idle(&e) => continue,
            Err(e) => return Err(e),
        }

        let line = match std::str::from_utf8(&raw) {
            Ok(text) => text.trim().to_string(),
            Err(_) => {
                tracing::debug!("hx711_load_cell: skipping non-UTF-8 line");
                raw.clear();
                continue;
            }
        };
        raw.clear();

        if line.is_empty() {
            continue;
        }

        tracing::debug!("hx711_load_cell: raw line {:?}", line);

        match parse_weight_line(&line) {
            Some(weight) => return Ok(Some(weight)),
            None if line.starts_with('=') => {
                tracing::warn!("hx711_load_cell: could not parse weight from {:?}", line);
            }
            None => {}
        }
    }

    Ok(None)
}

/// HX711 load cell behind a microcontroller that prints `= <kg>` lines
#[derive(Debug, Default)]
pub struct Hx711LoadCellDriver;

impl Hx711LoadCellDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for Hx711LoadCellDriver {
    fn read(&self, settings: &Settings) -> DriverResult {
        let Some(serial) = SerialSettings::from_settings(settings) else {
            tracing::error!("hx711_load_cell: no 'port' in sensor configuration");
            return Ok(None);
        };

        tracing::debug!(
            "hx711_load_cell: reading {} at {} baud",
            serial.port,
            serial.baud_rate
        );

        let deadline = Instant::now() + READ_BUDGET;
        let Some(port) = serial::open("hx711_load_cell", &serial, PORT_TIMEOUT) else {
            return Ok(None);
        };

        // Opening the port resets most boards; drop whatever they print while booting
        std::thread::sleep(SETTLE_DELAY);
        port.clear(ClearBuffer::Input)
            .map_err(|e| DriverError::Serial(e.to_string()))?;

        let mut reader = BufReader::new(port);
        match read_weight_kg(&mut reader, deadline)? {
            Some(weight) => {
                tracing::debug!("hx711_load_cell: parsed {} kg", weight);
                Ok(Some(single("weight_kg", weight)))
            }
            None => {
                tracing::warn!(
                    "hx711_load_cell: no '= <kg>' line from {} within {}s",
                    serial.port,
                    READ_BUDGET.as_secs()
                );
                Ok(None)
            }
        }
    }
}
