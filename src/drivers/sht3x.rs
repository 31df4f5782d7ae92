use super::{setting_u32, Driver, DriverResult};
use crate::config::Settings;
use crate::reading::{round_to, Measurement};

const DEFAULT_ADDRESS: u16 = 0x44;
const DEFAULT_BUS: u32 = 1;

/// Single shot, high repeatability, clock stretching disabled
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
const SINGLE_SHOT_HIGH: [u8; 2] = [0x24, 0x00];
/// Max conversion time for high repeatability is 15.5 ms
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
const MEASUREMENT_DELAY: std::time::Duration = std::time::Duration::from_millis(20);

/// Sensirion CRC-8 (poly 0x31, init 0xFF)
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Decode a 6-byte measurement `[T_hi, T_lo, T_crc, RH_hi, RH_lo, RH_crc]`
/// into (°C, %RH). Returns `None` when either CRC does not match.
pub fn decode_measurement(raw: &[u8; 6]) -> Option<(f64, f64)> {
    if crc8(&raw[0..2]) != raw[2] || crc8(&raw[3..5]) != raw[5] {
        return None;
    }

    let t_raw = f64::from(u16::from_be_bytes([raw[0], raw[1]]));
    let rh_raw = f64::from(u16::from_be_bytes([raw[3], raw[4]]));

    let temperature = -45.0 + 175.0 * t_raw / 65535.0;
    let humidity = 100.0 * rh_raw / 65535.0;
    Some((temperature, humidity))
}

/// I2C address from settings: hex string ("0x44", "44") or plain number
fn parse_address(settings: &Settings) -> Option<u16> {
    match settings.get("address") {
        None => Some(DEFAULT_ADDRESS),
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            let digits = s
                .strip_prefix("0x")
                .or_else(|| s.strip_prefix("0X"))
                .unwrap_or(s);
            u16::from_str_radix(digits, 16).ok()
        }
        Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
        Some(_) => None,
    }
}

/// Sensirion SHT3x temperature/humidity sensor, single-shot mode
#[derive(Debug, Default)]
pub struct Sht3xDriver;

impl Sht3xDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for Sht3xDriver {
    fn read(&self, settings: &Settings) -> DriverResult {
        let Some(address) = parse_address(settings) else {
            tracing::error!(
                "sht3x: invalid I2C address {:?}, expected something like \"0x44\"",
                settings.get("address")
            );
            return Ok(None);
        };
        let bus = setting_u32(settings, "bus").unwrap_or(DEFAULT_BUS);

        tracing::debug!("sht3x: reading address {:#04x} on /dev/i2c-{}", address, bus);

        let Some(raw) = measure(bus, address) else {
            return Ok(None);
        };

        match decode_measurement(&raw) {
            Some((temperature, humidity)) => {
                let mut measurement = Measurement::new();
                measurement.insert("temperature".to_string(), round_to(temperature, 2));
                measurement.insert("humidity".to_string(), round_to(humidity, 2));
                Ok(Some(measurement))
            }
            None => {
                tracing::warn!("sht3x: CRC mismatch in measurement {:02x?}", raw);
                Ok(None)
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn measure(bus: u32, address: u16) -> Option<[u8; 6]> {
    use i2cdev::core::I2CDevice;
    use i2cdev::linux::LinuxI2CDevice;

    let path = format!("/dev/i2c-{}", bus);
    let result = LinuxI2CDevice::new(&path, address).and_then(|mut dev| {
        dev.write(&SINGLE_SHOT_HIGH)?;
        std::thread::sleep(MEASUREMENT_DELAY);
        let mut raw = [0u8; 6];
        dev.read(&mut raw)?;
        Ok(raw)
    });

    match result {
        Ok(raw) => Some(raw),
        Err(e) => {
            tracing::error!("sht3x: I2C transaction on {} failed: {}", path, e);
            tracing::warn!(
                "sht3x: check that the device shows up at {:#04x} with 'i2cdetect -y {}'",
                address,
                bus
            );
            None
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn measure(bus: u32, address: u16) -> Option<[u8; 6]> {
    tracing::warn!(
        "sht3x: I2C is only supported on Linux (bus {}, address {:#04x})",
        bus,
        address
    );
    None
}
