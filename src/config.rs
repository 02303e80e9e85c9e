//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading for the scale reader.
//! Configuration is loaded from:
//! 1. `config/scale_daq.toml` (base configuration)
//! 2. Environment variables (prefixed with `SCALE_DAQ_`, sections split on `__`)
//!
//! Every field has a default, so a missing or empty file yields a usable
//! configuration for the stock firmware.
//!
//! # Example
//! ```no_run
//! use scale_daq::config::ScaleConfig;
//!
//! let config = ScaleConfig::load()?;
//! println!("Port: {}", config.serial.port);
//! # Ok::<(), scale_daq::error::ScaleError>(())
//! ```

use crate::error::{ScaleError, ScaleResult};
use crate::measurement::ToleranceRule;
use crate::protocol::PhraseTable;
use crate::tracing_setup::LogFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/scale_daq.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial transport settings
    pub serial: SerialConfig,
    /// Device phrase tables
    pub protocol: PhraseTable,
    /// Sink settings (history, tolerance, freshness)
    pub measurement: MeasurementConfig,
    /// Persistence settings for confirmed weighings
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Color terminal output (pretty and compact formats)
    pub log_ansi: bool,
    /// Print file and line of each event
    pub log_source_location: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Scale DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            log_ansi: true,
            log_source_location: false,
        }
    }
}

/// Serial transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Communication speed. The scale firmware talks at 9600.
    pub baud_rate: u32,
    /// Size of each read issued against the transport
    pub read_chunk_size: usize,
    /// Terminator appended to every command written to the device
    pub command_terminator: String,
    /// Lines longer than this many bytes are dropped
    pub max_line_bytes: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            read_chunk_size: 256,
            command_terminator: "\n".to_string(),
            max_line_bytes: crate::protocol::framer::DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Measurement sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    /// Number of chart points retained
    pub history_capacity: usize,
    /// Rule deciding the OK / out-of-range verdict
    pub tolerance: ToleranceRule,
    /// Data is considered live while a record arrived within this window
    pub freshness_window_ms: u64,
    /// Period of the freshness check
    pub freshness_check_interval_ms: u64,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            history_capacity: 50,
            tolerance: ToleranceRule::default(),
            freshness_window_ms: 7000,
            freshness_check_interval_ms: 1000,
        }
    }
}

impl MeasurementConfig {
    /// Freshness window as a `Duration`.
    pub fn freshness_window(&self) -> Duration {
        Duration::from_millis(self.freshness_window_ms)
    }

    /// Freshness check period as a `Duration`.
    pub fn freshness_check_interval(&self) -> Duration {
        Duration::from_millis(self.freshness_check_interval_ms)
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Table confirmed weighings are inserted into
    pub table: String,
    /// Optional CSV file every saved weighing is appended to
    pub csv_backup: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            table: crate::storage::SACOS_TABLE.to_string(),
            csv_backup: None,
        }
    }
}

impl ScaleConfig {
    /// Load configuration from `config/scale_daq.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `SCALE_DAQ_`.
    /// Example: `SCALE_DAQ_SERIAL__PORT=/dev/ttyACM0`
    pub fn load() -> ScaleResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> ScaleResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(ScaleConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SCALE_DAQ_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ScaleResult<()> {
        crate::tracing_setup::parse_log_level(&self.application.log_level)?;

        if self.serial.baud_rate == 0 {
            return Err(ScaleError::Configuration(
                "serial.baud_rate must be greater than 0".to_string(),
            ));
        }
        if self.serial.read_chunk_size == 0 {
            return Err(ScaleError::Configuration(
                "serial.read_chunk_size must be greater than 0".to_string(),
            ));
        }

        if self.measurement.history_capacity == 0 {
            return Err(ScaleError::Configuration(
                "measurement.history_capacity must be greater than 0".to_string(),
            ));
        }
        self.measurement
            .tolerance
            .validate()
            .map_err(ScaleError::Configuration)?;
        if self.measurement.freshness_check_interval_ms == 0 {
            return Err(ScaleError::Configuration(
                "measurement.freshness_check_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.measurement.freshness_window_ms < self.measurement.freshness_check_interval_ms {
            return Err(ScaleError::Configuration(format!(
                "measurement.freshness_window_ms ({}) is shorter than the check interval ({})",
                self.measurement.freshness_window_ms,
                self.measurement.freshness_check_interval_ms
            )));
        }

        self.protocol
            .validate()
            .map_err(ScaleError::Configuration)?;

        Ok(())
    }
}
