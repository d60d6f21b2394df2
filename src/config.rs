//! Configuration table for the oven: connection parameters, register map and
//! safety limits.
//!
//! Every value has a default matching the BINDER MK 53 controller, so an empty
//! YAML document (or no document at all) yields a working configuration.
//!
//! ```yaml
//! connection:
//!   port: 10001
//!   connect_timeout: 2s 500ms
//!   retries: 3
//!   read_timeout: 30s
//! safety:
//!   max_setpoint: 150.0
//! ```

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// TCP port of the serial-to-TCP adaptor.
pub const DEFAULT_PORT: u16 = 10001;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot open config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Connection attempts made after the first one fails.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Deadline for each read while waiting for a response. `None` waits forever.
    #[serde(default, with = "humantime_serde")]
    pub read_timeout: Option<Duration>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> Duration {
    Duration::from_millis(2500)
}

fn default_retries() -> u32 {
    3
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            connect_timeout: default_connect_timeout(),
            retries: default_retries(),
            read_timeout: None,
        }
    }
}

/// Register addresses of the controller.
///
/// The door, alarm, note, alarm text and temperature limit addresses were
/// reverse-engineered and are not part of the published interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterMap {
    /// Process value 1, float, read only.
    pub current_temperature: u16,
    /// Set point 1, float, read only.
    pub setpoint: u16,
    /// Set point 1 manual, float.
    pub manual_setpoint: u16,
    /// Set point 1 basic, float.
    pub basic_setpoint: u16,
    /// Mode flags, int.
    pub mode: u16,
    /// Track manual, int, bit 0-7 = line 0-7.
    pub operation_lines: u16,
    pub door: u16,
    pub temperature_limit: u16,
    pub alarm_text: u16,
    pub alarm: u16,
    pub note: u16,
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self {
            current_temperature: 0x11a9,
            setpoint: 0x1077,
            manual_setpoint: 0x1581,
            basic_setpoint: 0x156f,
            mode: 0x1a22,
            operation_lines: 0x158b,
            door: 0x1007,
            temperature_limit: 0x10bd,
            alarm_text: 0x1228,
            alarm: 0x123d,
            note: 0x123e,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyLimits {
    /// Rated minimum temperature setting in °C.
    pub min_setpoint: f32,
    /// Rated maximum temperature setting in °C.
    pub max_setpoint: f32,
    /// Condensation protection is only engaged below this setpoint (°C).
    pub condensation_threshold: f32,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            min_setpoint: -40.0,
            max_setpoint: 180.0,
            condensation_threshold: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OvenConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub registers: RegisterMap,
    #[serde(default)]
    pub safety: SafetyLimits,
    /// Consecutive in-tolerance readings required when waiting for a stable temperature.
    #[serde(default = "default_stable_readings")]
    pub stable_readings: u32,
}

fn default_stable_readings() -> u32 {
    6
}

impl Default for OvenConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            registers: RegisterMap::default(),
            safety: SafetyLimits::default(),
            stable_readings: default_stable_readings(),
        }
    }
}

impl OvenConfig {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_reader(reader)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        log::debug!("Loading config file from {:?}", path);
        Self::from_reader(File::open(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults() {
        let config = OvenConfig::default();
        assert_eq!(config.connection.port, 10001);
        assert_eq!(config.connection.retries, 3);
        assert_eq!(config.connection.read_timeout, None);
        assert_eq!(config.registers.current_temperature, 0x11a9);
        assert_eq!(config.registers.mode, 0x1a22);
        assert_eq!(config.safety.min_setpoint, -40.0);
        assert_eq!(config.safety.max_setpoint, 180.0);
        assert_eq!(config.stable_readings, 6);
    }

    #[test]
    fn empty_document_is_default() {
        let config = OvenConfig::from_reader("{}".as_bytes()).unwrap();
        assert_eq!(config, OvenConfig::default());
    }

    #[test]
    fn partial_overrides() {
        let yaml = "
connection:
  connect_timeout: 1s
  read_timeout: 30s
registers:
  door: 4104
safety:
  max_setpoint: 150.0
";
        let config = OvenConfig::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(config.connection.port, DEFAULT_PORT);
        assert_eq!(config.connection.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.connection.read_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.registers.door, 0x1008);
        assert_eq!(config.registers.alarm, 0x123d);
        assert_eq!(config.safety.max_setpoint, 150.0);
        assert_eq!(config.safety.min_setpoint, -40.0);
    }

    #[test]
    fn invalid_document() {
        assert_matches!(
            OvenConfig::from_reader("stable_readings: lots".as_bytes()),
            Err(ConfigError::Yaml(..))
        );
    }
}
