//! Driver configuration
//!
//! Serial framing is fixed by the device; the configuration only tunes
//! timeouts and the wavelength limits checked before commands are queued.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::dispatcher::DispatcherConfig;
use crate::protocol::{
    ProtocolError, SerialSettings, ABS_DATA_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_TIMEOUT_MS,
};

/// Wavelength range and sweep speeds supported by the instrument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCapabilities {
    /// Shortest selectable wavelength in nm
    pub wavelength_min: u16,
    /// Longest selectable wavelength in nm
    pub wavelength_max: u16,
    /// Baseline resolution in nm
    pub resolution_nm: u8,
    /// Slowest sweep speed
    pub speed_min: u8,
    /// Fastest sweep speed
    pub speed_max: u8,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            wavelength_min: 330,
            wavelength_max: 900,
            resolution_nm: 3,
            speed_min: 1,
            speed_max: 8,
        }
    }
}

impl DeviceCapabilities {
    /// Reject wavelengths outside the instrument range
    pub fn check_wavelength(&self, wavelength_nm: u16) -> Result<(), ProtocolError> {
        if !(self.wavelength_min..=self.wavelength_max).contains(&wavelength_nm) {
            return Err(ProtocolError::InvalidArgument(format!(
                "wavelength {} nm outside {}..={} nm",
                wavelength_nm, self.wavelength_min, self.wavelength_max
            )));
        }
        Ok(())
    }

    /// Reject baseline sweeps the instrument cannot perform
    pub fn check_baseline(
        &self,
        start_nm: u16,
        end_nm: u16,
        resolution_nm: u8,
        speed: u8,
    ) -> Result<(), ProtocolError> {
        self.check_wavelength(start_nm)?;
        self.check_wavelength(end_nm)?;
        if start_nm > end_nm {
            return Err(ProtocolError::InvalidArgument(format!(
                "baseline start {} nm after end {} nm",
                start_nm, end_nm
            )));
        }
        if resolution_nm == 0 {
            return Err(ProtocolError::InvalidArgument(
                "baseline resolution must be non-zero".into(),
            ));
        }
        if !(self.speed_min..=self.speed_max).contains(&speed) {
            return Err(ProtocolError::InvalidArgument(format!(
                "speed {} outside {}..={}",
                speed, self.speed_min, self.speed_max
            )));
        }
        Ok(())
    }
}

/// Driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Serial line parameters
    pub serial: SerialSettings,
    /// Default bound on a command's response
    pub command_timeout_ms: u64,
    /// Bound on the absorbance data fetched after an OK ack
    pub absorbance_data_timeout_ms: u64,
    /// Bound on each spectrum sample
    pub sample_timeout_ms: u64,
    /// Worker queue poll interval
    pub poll_interval_ms: u64,
    /// Instrument ranges used to validate verb arguments
    pub capabilities: DeviceCapabilities,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            command_timeout_ms: DEFAULT_TIMEOUT_MS,
            absorbance_data_timeout_ms: ABS_DATA_TIMEOUT_MS,
            sample_timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            capabilities: DeviceCapabilities::default(),
        }
    }
}

impl DriverConfig {
    /// Default location: `<config dir>/spectro/driver.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("spectro").join("driver.json"))
    }

    /// Load a configuration file; absent fields keep their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: DriverConfig = serde_json::from_str(&content)
            .map_err(|e| ProtocolError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save as pretty-printed JSON, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ProtocolError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProtocolError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check line settings, timing and capability ranges
    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.serial.validate()?;
        if self.poll_interval_ms == 0 {
            return Err(ProtocolError::Config(
                "poll interval must be non-zero".into(),
            ));
        }
        let caps = &self.capabilities;
        if caps.wavelength_min > caps.wavelength_max || caps.speed_min > caps.speed_max {
            return Err(ProtocolError::Config(
                "capability ranges are inverted".into(),
            ));
        }
        Ok(())
    }

    /// Default bound on a command's first read
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Timing handed to each new command worker
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            absorbance_data_timeout: Duration::from_millis(self.absorbance_data_timeout_ms),
            sample_timeout: Duration::from_millis(self.sample_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.serial.baud_rate, 4800);
        assert_eq!(config.command_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.dispatcher_config().absorbance_data_timeout,
            Duration::from_secs(2)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "command_timeout_ms": 8000, "serial": { "data_bits": 8 } }"#;
        let config: DriverConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.command_timeout_ms, 8000);
        assert_eq!(config.serial.baud_rate, 4800);
        assert_eq!(config.serial.data_bits, 8);
        assert_eq!(config.capabilities, DeviceCapabilities::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("driver.json");
        let mut config = DriverConfig::default();
        config.sample_timeout_ms = 750;
        config.save(&path).unwrap();

        assert_eq!(DriverConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_rejects_bad_framing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.json");
        fs::write(&path, r#"{ "serial": { "stop_bits": 2 } }"#).unwrap();
        assert!(matches!(
            DriverConfig::load(&path),
            Err(ProtocolError::Config(_))
        ));
        assert!(DriverConfig::load_or_default(dir.path().join("missing.json")).is_ok());
    }

    #[test]
    fn test_load_rejects_other_baud_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.json");
        fs::write(&path, r#"{ "serial": { "baud_rate": 9600 } }"#).unwrap();
        assert!(matches!(
            DriverConfig::load(&path),
            Err(ProtocolError::Config(_))
        ));
    }

    #[test]
    fn test_capability_checks() {
        let caps = DeviceCapabilities::default();
        assert!(caps.check_wavelength(330).is_ok());
        assert!(caps.check_wavelength(900).is_ok());
        assert!(caps.check_wavelength(329).is_err());
        assert!(caps.check_baseline(330, 900, 3, 8).is_ok());
        assert!(caps.check_baseline(600, 400, 3, 8).is_err());
        assert!(caps.check_baseline(330, 900, 0, 8).is_err());
        assert!(caps.check_baseline(330, 900, 3, 9).is_err());
    }
}
