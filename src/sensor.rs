//! 1-wire DS18B20 temperature reader.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, error, info};

use crate::error::SensorError;
use crate::temperature::{sensor_sentinel, Temperature};
use crate::util::on_target;

const DEVICE_GLOB_PARENT: &str = "/sys/bus/w1/devices";

/// Loads the 1-wire kernel modules. A no-op off target.
pub fn init() {
    if !on_target() {
        debug!("not on target, skipping 1-wire module load");
        return;
    }
    let _ = std::process::Command::new("modprobe").arg("w1-gpio").status();
    let _ = std::process::Command::new("modprobe").arg("w1-therm").status();
    info!("DS18B20 sensor ready");
}

fn device_file(serial: &str) -> PathBuf {
    PathBuf::from(DEVICE_GLOB_PARENT)
        .join(format!("28-{serial}"))
        .join("w1_slave")
}

/// Read and parse the current temperature for a given sensor serial.
/// Any hardware fault returns the sentinel `Temperature(-1)`, logged at
/// the appropriate level, rather than propagating — callers treat a
/// missing sensor as "no reading this tick", not a fatal condition.
pub fn read(serial: &str) -> Temperature {
    match read_inner(serial) {
        Ok(t) => {
            debug!(temperature = %t, "sensor reading");
            t
        }
        Err(SensorError::Unavailable) => {
            error!("sensor not connected");
            sensor_sentinel()
        }
        Err(SensorError::Checksum) => {
            error!("sensor CRC check failed");
            sensor_sentinel()
        }
        Err(SensorError::Parse(detail)) => {
            error!(detail, "could not parse sensor output");
            sensor_sentinel()
        }
    }
}

fn read_inner(serial: &str) -> Result<Temperature, SensorError> {
    let path = device_file(serial);
    let contents = fs::read_to_string(&path).map_err(|_| SensorError::Unavailable)?;
    let mut lines = contents.lines();

    let crc_line = lines.next().ok_or(SensorError::Parse("missing CRC line".to_string()))?;
    let crc_token = crc_line
        .split_whitespace()
        .last()
        .ok_or(SensorError::Parse("missing CRC token".to_string()))?;
    if crc_token != "YES" {
        return Err(SensorError::Checksum);
    }

    let reading_line = lines.next().ok_or(SensorError::Parse("missing reading line".to_string()))?;
    let raw = reading_line
        .split_whitespace()
        .last()
        .and_then(|tok| tok.strip_prefix("t="))
        .ok_or(SensorError::Parse(format!("unrecognized reading line {reading_line:?}")))?;
    let millicelsius: i64 = raw
        .parse()
        .map_err(|_| SensorError::Parse(format!("non-numeric reading {raw:?}")))?;

    Ok(Temperature::from_millicelsius(millicelsius))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_sensor_file(dir: &std::path::Path, serial: &str, body: &str) -> PathBuf {
        let device_dir = dir.join(format!("28-{serial}"));
        fs::create_dir_all(&device_dir).unwrap();
        let file = device_dir.join("w1_slave");
        let mut f = fs::File::create(&file).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        file
    }

    fn parse_body(body: &str) -> Result<Temperature, SensorError> {
        let mut lines = body.lines();
        let crc_line = lines.next().unwrap();
        let crc_token = crc_line.split_whitespace().last().unwrap();
        if crc_token != "YES" {
            return Err(SensorError::Checksum);
        }
        let reading_line = lines.next().unwrap();
        let raw = reading_line
            .split_whitespace()
            .last()
            .and_then(|tok| tok.strip_prefix("t="))
            .unwrap();
        let millicelsius: i64 = raw.parse().unwrap();
        Ok(Temperature::from_millicelsius(millicelsius))
    }

    #[test]
    fn parses_good_crc_reading() {
        let body = "a1 01 4b 46 7f ff 0c 10 2c : crc=2c YES\na1 01 4b 46 7f ff 0c 10 2c t=21562\n";
        let t = parse_body(body).unwrap();
        assert_eq!(t.as_decimal(), rust_decimal::Decimal::new(21562, 3));
    }

    #[test]
    fn rejects_bad_crc() {
        let body = "a1 01 4b 46 7f ff 0c 10 2c : crc=2c NO\na1 01 4b 46 7f ff 0c 10 2c t=21562\n";
        assert_eq!(parse_body(body), Err(SensorError::Checksum));
    }

    #[test]
    fn read_missing_device_returns_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let _ = write_sensor_file(dir.path(), "unused", "placeholder");
        let t = read("0000000000ff");
        assert!(t.is_sentinel());
    }
}
