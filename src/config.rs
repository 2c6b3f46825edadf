use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::interval::Interval;

pub const DEFAULT_INTERVAL: Interval = Interval::from_secs(30);
pub const DEFAULT_TARGET_TEMP: i32 = 60;
pub const DEFAULT_MIN_FAN_SPEED: u32 = 30;
pub const DEFAULT_MAX_FAN_SPEED: u32 = 100;
pub const DEFAULT_NVIDIA_SETTINGS: &str = "nvidia-settings";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("display is required")]
    MissingDisplay,
    #[error("xauthority is required")]
    MissingXauthority,
    #[error("interval must be greater than zero")]
    InvalidInterval,
    #[error("target temperature must be greater than zero, got {0}°C")]
    InvalidTargetTemp(i32),
    #[error("min fan speed must be between 1% and 100%, got {0}%")]
    InvalidMinFanSpeed(u32),
    #[error("max fan speed must be between 1% and 100%, got {0}%")]
    InvalidMaxFanSpeed(u32),
    #[error(
        "max fan speed ({max}%) must not be lower than min fan speed ({min}%)"
    )]
    InvertedFanSpeedRange { min: u32, max: u32 },

    #[error("failed to open configuration file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// Daemon configuration, only a validated configuration
// is accepted by the fan controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    // X display and authority file handed to nvidia-settings
    pub display: String,
    pub xauthority: String,

    pub interval: Interval,

    // Temperature the controller steers towards, in °C
    pub target_temp: i32,

    // Allowed fan speed range in percent
    pub min_fan_speed: u32,
    pub max_fan_speed: u32,

    // Index of the GPU and of the fan addressed by nvidia-settings
    pub gpu: u32,
    pub fan: u32,

    pub nvidia_settings: PathBuf,

    // Give the fan back to the driver when the daemon stops
    pub restore_auto: bool,
}

impl Config {
    // Load a configuration from a Json file,
    // fields missing from the file keep their default value
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Parsing config file at: {:?}", path);

        let file = File::open(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    // Check every constraint in a fixed order and
    // report the first one that doesn't hold
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.display.is_empty() {
            return Err(ConfigError::MissingDisplay);
        }

        if self.xauthority.is_empty() {
            return Err(ConfigError::MissingXauthority);
        }

        if self.interval.is_zero() {
            return Err(ConfigError::InvalidInterval);
        }

        if self.target_temp <= 0 {
            return Err(ConfigError::InvalidTargetTemp(self.target_temp));
        }

        if !(1..=100).contains(&self.min_fan_speed) {
            return Err(ConfigError::InvalidMinFanSpeed(self.min_fan_speed));
        }

        if !(1..=100).contains(&self.max_fan_speed) {
            return Err(ConfigError::InvalidMaxFanSpeed(self.max_fan_speed));
        }

        if self.min_fan_speed > self.max_fan_speed {
            return Err(ConfigError::InvertedFanSpeedRange {
                min: self.min_fan_speed,
                max: self.max_fan_speed,
            });
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            display: String::new(),
            xauthority: String::new(),
            interval: DEFAULT_INTERVAL,
            target_temp: DEFAULT_TARGET_TEMP,
            min_fan_speed: DEFAULT_MIN_FAN_SPEED,
            max_fan_speed: DEFAULT_MAX_FAN_SPEED,
            gpu: 0,
            fan: 0,
            nvidia_settings: PathBuf::from(DEFAULT_NVIDIA_SETTINGS),
            restore_auto: false,
        }
    }
}
