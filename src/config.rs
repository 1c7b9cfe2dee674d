//! Configuration management module.

use crate::acquisition::AcquisitionRequest;
use crate::frame::DynamicRange;
use crate::protocol::{DEFAULT_CTRL_PORT, DEFAULT_STOP_PORT, TimingMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration load result.
#[derive(Debug)]
pub enum ConfigLoadResult {
    /// Config loaded successfully.
    Loaded(AppConfig),
    /// Config file missing (first run).
    Missing,
    /// Config file exists but invalid.
    Invalid(ConfigError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
}

/// Detector server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub host: String,
    /// Control port (default: 1952).
    #[serde(default = "default_ctrl_port")]
    pub ctrl_port: u16,
    /// Stop port (default: 1953).
    #[serde(default = "default_stop_port")]
    pub stop_port: u16,
    /// Connect and request timeout in seconds (default: 10).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bound on going live after START, in seconds (default: 5).
    #[serde(default = "default_live_timeout_secs")]
    pub live_timeout_secs: u64,
}

fn default_ctrl_port() -> u16 {
    DEFAULT_CTRL_PORT
}

fn default_stop_port() -> u16 {
    DEFAULT_STOP_PORT
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_live_timeout_secs() -> u64 {
    5
}

/// Acquisition defaults used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub nb_frames: i64,
    pub nb_cycles: i64,
    pub exposure_time_secs: f64,
    /// 0 leaves the device's frame period unchanged.
    pub frame_period_secs: f64,
    /// Bits per pixel: 8, 16, 24 or 32.
    pub dynamic_range: i32,
    pub timing_mode: Option<String>,
    /// Seconds between progress reports; 0 disables them.
    pub progress_interval_secs: f64,
}

impl AppConfig {
    /// Get config file path (same directory as executable).
    pub fn default_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Attempt to load config with detailed result.
    pub fn try_load(path: &Path) -> ConfigLoadResult {
        if !path.exists() {
            return ConfigLoadResult::Missing;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<AppConfig>(&content) {
                Ok(config) => match config.validate() {
                    Ok(()) => ConfigLoadResult::Loaded(config),
                    Err(e) => ConfigLoadResult::Invalid(e),
                },
                Err(e) => ConfigLoadResult::Invalid(ConfigError::Parse(e)),
            },
            Err(e) => ConfigLoadResult::Invalid(ConfigError::Read(e)),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detector.validate()?;
        self.acquisition.validate()
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation("Detector host cannot be empty".to_string()));
        }
        if self.ctrl_port == 0 || self.stop_port == 0 {
            return Err(ConfigError::Validation("Ports must be greater than 0".to_string()));
        }
        if self.ctrl_port == self.stop_port {
            return Err(ConfigError::Validation("Control and stop ports must differ".to_string()));
        }
        if self.timeout_secs < 1 {
            return Err(ConfigError::Validation("Timeout must be at least 1 second".to_string()));
        }
        if self.live_timeout_secs < 1 {
            return Err(ConfigError::Validation("Live timeout must be at least 1 second".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn live_timeout(&self) -> Duration {
        Duration::from_secs(self.live_timeout_secs)
    }
}

impl AcquisitionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nb_frames < 1 {
            return Err(ConfigError::Validation("Frame count must be at least 1".to_string()));
        }
        if self.nb_cycles < 1 {
            return Err(ConfigError::Validation("Cycle count must be at least 1".to_string()));
        }
        seconds("Exposure time", self.exposure_time_secs)?;
        seconds("Frame period", self.frame_period_secs)?;
        seconds("Progress interval", self.progress_interval_secs)?;
        if DynamicRange::try_from(self.dynamic_range).is_err() {
            return Err(ConfigError::Validation(format!(
                "Unsupported dynamic range {} (use 8, 16, 24 or 32)",
                self.dynamic_range
            )));
        }
        if let Some(mode) = &self.timing_mode {
            if TimingMode::from_name(mode).is_none() {
                return Err(ConfigError::Validation(format!("Unknown timing mode '{mode}'")));
            }
        }
        Ok(())
    }

    /// Validated acquisition request for these settings.
    pub fn to_request(&self) -> Result<AcquisitionRequest, ConfigError> {
        self.validate()?;
        let dynamic_range = DynamicRange::try_from(self.dynamic_range)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        let mut request = AcquisitionRequest::new()
            .nb_frames(self.nb_frames)
            .nb_cycles(self.nb_cycles)
            .exposure_time(seconds("Exposure time", self.exposure_time_secs)?)
            .dynamic_range(dynamic_range);
        if self.frame_period_secs > 0.0 {
            request = request.frame_period(seconds("Frame period", self.frame_period_secs)?);
        }
        if let Some(mode) = self.timing_mode.as_deref().and_then(TimingMode::from_name) {
            request = request.timing_mode(mode);
        }
        Ok(request)
    }

    /// Interval between progress reports; zero disables them.
    pub fn progress_interval(&self) -> Result<Duration, ConfigError> {
        seconds("Progress interval", self.progress_interval_secs)
    }
}

/// Seconds as a `Duration`, rejecting negative, non-finite and overflowing values.
fn seconds(what: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| ConfigError::Validation(format!("{what} must be a non-negative number of seconds, got {value}")))
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            ctrl_port: default_ctrl_port(),
            stop_port: default_stop_port(),
            timeout_secs: default_timeout_secs(),
            live_timeout_secs: default_live_timeout_secs(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            nb_frames: 1,
            nb_cycles: 1,
            exposure_time_secs: 1.0,
            frame_period_secs: 0.0,
            dynamic_range: 16,
            timing_mode: None,
            progress_interval_secs: 0.25,
        }
    }
}
