use thiserror::Error;

use crate::device::DeviceError;

// A failed read, the tick stops before any fan speed change
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("failed to read the GPU core temperature")]
    Temperature(#[source] DeviceError),
    #[error("failed to read the GPU fan speed")]
    FanSpeed(#[source] DeviceError),
}

// A failed write, never retried
#[derive(Debug, Error)]
#[error("failed to set the GPU fan speed to {speed}%")]
pub struct ActuatorError {
    pub speed: u32,
    #[source]
    pub source: DeviceError,
}

// Automatic fan control couldn't be given back to the driver
#[derive(Debug, Error)]
#[error("failed to restore automatic fan control")]
pub struct ReleaseError(#[source] pub DeviceError);

// Any error aborting a control loop tick
#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error(transparent)]
    Actuator(#[from] ActuatorError),
}

impl TickError {
    // Return the device error at the root of this tick error
    pub fn device_error(&self) -> &DeviceError {
        match self {
            Self::Sensor(SensorError::Temperature(err))
            | Self::Sensor(SensorError::FanSpeed(err))
            | Self::Actuator(ActuatorError { source: err, .. }) => err,
        }
    }

    // True when the tick failed only because shutdown
    // killed the device command it was waiting on
    pub fn is_interrupted(&self) -> bool {
        matches!(self.device_error(), DeviceError::Interrupted { .. })
    }
}

// Outcome of a whole control loop run, including the
// optional release of the fan on the way out
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Tick(#[from] TickError),
    #[error(transparent)]
    Release(#[from] ReleaseError),
}
