//! Configuration loading for slsink
//!
//! Two layers, both fixed once a sink is opened:
//! 1. **TOML bootstrap**: optional `[sink]` and `[logging]` tables
//! 2. **Built-in defaults**: code constants used for anything the file omits
//!
//! # Config File Resolution
//!
//! 1. Command-line argument (highest priority)
//! 2. `SLSINK_CONFIG` environment variable
//! 3. `<config_dir>/slsink/config.toml`
//! 4. Compiled defaults (no file)
//!
//! A missing file is not an error. A file that exists but does not parse is.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SLSINK_CONFIG";

/// Sample rates the hardware buffer queue accepts
pub const SUPPORTED_SAMPLE_RATES: [u32; 13] = [
    8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 64000, 88200, 96000, 192000,
];

/// Upper bound on hardware queue slots
pub const MAX_POOL_CAPACITY: usize = 255;

/// How `write_samples` treats a chunk larger than the free ring space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    /// Accept the chunk only if free space strictly exceeds its size, otherwise drop it
    #[default]
    Whole,
    /// Accept as many bytes as currently fit
    Partial,
}

/// Sink parameters, fixed at open time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,

    /// Interleaved channel count
    pub channels: u16,

    /// Bits per channel sample (8, 16, 24 or 32)
    pub bit_depth: u16,

    /// Software ring buffer window in milliseconds
    ///
    /// Default: 100 ms (17640 bytes for 44.1kHz stereo 16-bit)
    pub buffer_window_ms: u32,

    /// Duration of one hardware unit in milliseconds
    ///
    /// Also the precision of the latency estimate.
    pub time_quantum_ms: u32,

    /// Number of hardware queue slots
    ///
    /// 255 slots of 10 ms buffer up to 2.55 s of audio in hardware.
    pub pool_capacity: usize,

    /// Oversized write handling
    pub write_policy: WritePolicy,

    /// Period of the background drain task (None = drain only after writes)
    pub drain_poll_interval_ms: Option<u64>,

    /// Event bus channel capacity
    pub event_capacity: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            bit_depth: 16,
            buffer_window_ms: 100,
            time_quantum_ms: 10,
            pool_capacity: MAX_POOL_CAPACITY,
            write_policy: WritePolicy::Whole,
            drain_poll_interval_ms: None,
            event_capacity: 100,
        }
    }
}

impl SinkConfig {
    /// Bytes in one interleaved sample frame (channels × bit depth / 8)
    pub fn bytes_per_sample(&self) -> usize {
        self.channels as usize * self.bit_depth as usize / 8
    }

    /// Sample frames in one hardware unit
    pub fn samples_per_unit(&self) -> usize {
        (self.time_quantum_ms as u64 * self.sample_rate as u64 / 1000) as usize
    }

    /// Bytes in one hardware unit
    pub fn unit_size_bytes(&self) -> usize {
        self.samples_per_unit() * self.bytes_per_sample()
    }

    /// Software ring buffer capacity in bytes
    pub fn ring_capacity_bytes(&self) -> usize {
        (self.sample_rate as u64 * self.bytes_per_sample() as u64 * self.buffer_window_ms as u64
            / 1000) as usize
    }

    /// Check every parameter against what the hardware queue can accept
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(Error::Config(format!(
                "unsupported sample rate {} Hz",
                self.sample_rate
            )));
        }
        if !(1..=8).contains(&self.channels) {
            return Err(Error::Config(format!(
                "channel count {} outside 1..=8",
                self.channels
            )));
        }
        if !matches!(self.bit_depth, 8 | 16 | 24 | 32) {
            return Err(Error::Config(format!(
                "unsupported bit depth {}",
                self.bit_depth
            )));
        }
        if self.time_quantum_ms == 0 {
            return Err(Error::Config("time_quantum_ms must be non-zero".to_string()));
        }
        if self.pool_capacity == 0 || self.pool_capacity > MAX_POOL_CAPACITY {
            return Err(Error::Config(format!(
                "pool_capacity {} outside 1..={}",
                self.pool_capacity, MAX_POOL_CAPACITY
            )));
        }
        if self.drain_poll_interval_ms == Some(0) {
            return Err(Error::Config(
                "drain_poll_interval_ms must be non-zero when set".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be non-zero".to_string()));
        }
        if self.ring_capacity_bytes() <= self.unit_size_bytes() {
            return Err(Error::Config(format!(
                "buffer window {}ms ({} bytes) cannot hold one {}ms unit ({} bytes)",
                self.buffer_window_ms,
                self.ring_capacity_bytes(),
                self.time_quantum_ms,
                self.unit_size_bytes()
            )));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Sink parameters
    #[serde(default)]
    pub sink: SinkConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TomlConfig {
    /// Parse TOML text and validate the sink table
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.sink.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}

/// Resolve which config file to use, if any
///
/// Returns None when neither an explicit path nor the platform default exists.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path().filter(|path| path.exists())
}

/// Platform default config file location (`<config_dir>/slsink/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("slsink").join("config.toml"))
}

/// Load bootstrap configuration with graceful degradation
///
/// A resolved path that does not exist logs a warning and falls back to defaults.
/// A file that exists but fails to parse or validate is returned as an error.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = resolve_config_path(cli_arg) else {
        info!("No config file found, using built-in defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!(
            "Config file {} not found, using built-in defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    TomlConfig::load(&path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry_44k_stereo() {
        let config = SinkConfig::default();
        assert_eq!(config.bytes_per_sample(), 4);
        assert_eq!(config.samples_per_unit(), 441);
        assert_eq!(config.unit_size_bytes(), 1764);
        assert_eq!(config.ring_capacity_bytes(), 17640);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_geometry_truncates_fractional_unit() {
        let config = SinkConfig {
            sample_rate: 11025,
            channels: 1,
            ..SinkConfig::default()
        };
        // 110.25 samples per 10ms unit
        assert_eq!(config.samples_per_unit(), 110);
        assert_eq!(config.unit_size_bytes(), 220);
    }

    #[test]
    fn test_validate_rejects_unsupported_rate() {
        let config = SinkConfig {
            sample_rate: 44000,
            ..SinkConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_pool_bounds() {
        let zero = SinkConfig {
            pool_capacity: 0,
            ..SinkConfig::default()
        };
        let too_many = SinkConfig {
            pool_capacity: MAX_POOL_CAPACITY + 1,
            ..SinkConfig::default()
        };
        assert!(zero.validate().is_err());
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_window_smaller_than_unit() {
        let config = SinkConfig {
            buffer_window_ms: 10,
            time_quantum_ms: 10,
            ..SinkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_odd_bit_depth() {
        let config = SinkConfig {
            bit_depth: 12,
            ..SinkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let config = SinkConfig {
            drain_poll_interval_ms: Some(0),
            ..SinkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [sink]
            sample_rate = 48000
            write_policy = "partial"
            "#,
        )
        .unwrap();
        assert_eq!(config.sink.sample_rate, 48000);
        assert_eq!(config.sink.channels, 2);
        assert_eq!(config.sink.write_policy, WritePolicy::Partial);
        assert_eq!(config.logging.level, "info");
    }
}
