pub mod nvidia_settings;

use std::{num::ParseIntError, process::ExitStatus};

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to run {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program:?} failed with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("empty response to query \"{query}\"")]
    EmptyOutput { query: String },
    #[error("non-numeric response \"{output}\" to query \"{query}\"")]
    InvalidOutput {
        query: String,
        output: String,
        #[source]
        source: ParseIntError,
    },
    #[error("{program:?} was interrupted by shutdown")]
    Interrupted { program: String },
}

// Sensor and actuator of a single GPU fan.
// Every call is a full round trip to the device, nothing is cached
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FanDevice: Send + Sync {
    // Return the GPU core temperature in °C
    async fn read_core_temperature(&self) -> Result<i32, DeviceError>;

    // Return the fan target speed in percent
    async fn read_fan_speed(&self) -> Result<u32, DeviceError>;

    // Switch the fan to manual control and set its target speed
    async fn write_fan_speed(&self, speed: u32) -> Result<(), DeviceError>;

    // Hand the fan control back to the driver
    async fn restore_auto(&self) -> Result<(), DeviceError>;
}
