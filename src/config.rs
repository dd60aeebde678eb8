//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{Result, SimlinkError};
use crate::crsf::protocol::{CRSF_CHANNEL_VALUE_CENTER, CRSF_CHANNEL_VALUE_MAX, CRSF_CHANNEL_VALUE_MIN};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub link: LinkConfig,

    #[serde(default)]
    pub controls: ControlsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Link pacing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    /// Retransmit timer governing ping/parameter/channel cadence
    #[serde(default = "default_retransmit_timeout_ms")]
    pub retransmit_timeout_ms: u64,

    /// How often to re-request link statistics while connected
    #[serde(default = "default_stats_refresh_interval_ms")]
    pub stats_refresh_interval_ms: u64,
}

/// Control axis output bounds
#[derive(Debug, Deserialize, Clone)]
pub struct ControlsConfig {
    /// Throttle output ceiling in channel units (992..=1811)
    #[serde(default = "default_max_throttle")]
    pub max_throttle: u16,

    /// Brake output floor in channel units (172..=992)
    #[serde(default = "default_max_brake")]
    pub max_brake: u16,

    /// Steering deflection around center in channel units
    #[serde(default = "default_steer_range")]
    pub steer_range: u16,

    /// Shift applied to the steering center point
    #[serde(default)]
    pub steering_center_offset: i16,
}

/// Telemetry logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 921_600 }

fn default_retransmit_timeout_ms() -> u64 { 5 }
fn default_stats_refresh_interval_ms() -> u64 { 5000 }

fn default_max_throttle() -> u16 { CRSF_CHANNEL_VALUE_MAX }
fn default_max_brake() -> u16 { CRSF_CHANNEL_VALUE_MIN }
fn default_steer_range() -> u16 { CRSF_CHANNEL_VALUE_MAX - CRSF_CHANNEL_VALUE_CENTER }

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_interval_ms() -> u64 { 1000 }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            retransmit_timeout_ms: default_retransmit_timeout_ms(),
            stats_refresh_interval_ms: default_stats_refresh_interval_ms(),
        }
    }
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            max_throttle: default_max_throttle(),
            max_brake: default_max_brake(),
            steer_range: default_steer_range(),
            steering_center_offset: 0,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
            log_interval_ms: default_log_interval_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, TOML parsing fails, or
    /// validation fails.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use simlink::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.serial.baud_rate == 0 {
            return Err(SimlinkError::ConfigValidation(
                "serial.baud_rate must be non-zero".to_string(),
            ));
        }

        if self.link.retransmit_timeout_ms == 0 {
            return Err(SimlinkError::ConfigValidation(
                "link.retransmit_timeout_ms must be non-zero".to_string(),
            ));
        }

        let c = &self.controls;
        if !(CRSF_CHANNEL_VALUE_CENTER..=CRSF_CHANNEL_VALUE_MAX).contains(&c.max_throttle) {
            return Err(SimlinkError::ConfigValidation(format!(
                "controls.max_throttle {} outside {}..={}",
                c.max_throttle, CRSF_CHANNEL_VALUE_CENTER, CRSF_CHANNEL_VALUE_MAX
            )));
        }
        if !(CRSF_CHANNEL_VALUE_MIN..=CRSF_CHANNEL_VALUE_CENTER).contains(&c.max_brake) {
            return Err(SimlinkError::ConfigValidation(format!(
                "controls.max_brake {} outside {}..={}",
                c.max_brake, CRSF_CHANNEL_VALUE_MIN, CRSF_CHANNEL_VALUE_CENTER
            )));
        }
        if c.steer_range > CRSF_CHANNEL_VALUE_MAX - CRSF_CHANNEL_VALUE_CENTER {
            return Err(SimlinkError::ConfigValidation(format!(
                "controls.steer_range {} exceeds {}",
                c.steer_range,
                CRSF_CHANNEL_VALUE_MAX - CRSF_CHANNEL_VALUE_CENTER
            )));
        }

        if self.telemetry.enabled {
            if self.telemetry.max_records_per_file == 0 {
                return Err(SimlinkError::ConfigValidation(
                    "telemetry.max_records_per_file must be non-zero".to_string(),
                ));
            }
            if self.telemetry.max_files_to_keep == 0 {
                return Err(SimlinkError::ConfigValidation(
                    "telemetry.max_files_to_keep must be non-zero".to_string(),
                ));
            }
        }

        Ok(())
    }
}
