use std::sync::Arc;

use tracing::info;

use crate::{
    config::{Config, ConfigError},
    device::FanDevice,
    errors::{ActuatorError, ReleaseError, SensorError, TickError},
};

// Temperature and fan speed sampled during a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub temperature: i32,
    pub fan_speed: u32,
}

// Result of a successful tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub observation: Observation,
    pub next_fan_speed: u32,
}

impl TickOutcome {
    // True when the tick wrote a new fan speed to the device
    pub fn adjusted(&self) -> bool {
        self.next_fan_speed != self.observation.fan_speed
    }
}

// The part of the configuration that drives the fan speed decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPolicy {
    pub target_temp: i32,
    pub min_fan_speed: u32,
    pub max_fan_speed: u32,
}

impl StepPolicy {
    // Out of range speeds are first clamped back into range,
    // otherwise the speed moves by one percent towards the
    // target temperature
    pub fn next_fan_speed(&self, observation: Observation) -> u32 {
        let Observation { temperature, fan_speed } = observation;

        if fan_speed < self.min_fan_speed {
            self.min_fan_speed
        } else if fan_speed > self.max_fan_speed {
            self.max_fan_speed
        } else if temperature > self.target_temp
            && fan_speed < self.max_fan_speed
        {
            fan_speed + 1
        } else if temperature < self.target_temp
            && fan_speed > self.min_fan_speed
        {
            fan_speed - 1
        } else {
            fan_speed
        }
    }
}

impl From<&Config> for StepPolicy {
    fn from(config: &Config) -> Self {
        Self {
            target_temp: config.target_temp,
            min_fan_speed: config.min_fan_speed,
            max_fan_speed: config.max_fan_speed,
        }
    }
}

pub struct Controller<D: FanDevice> {
    config: Arc<Config>,
    policy: StepPolicy,

    device: D,
}

impl<D: FanDevice> Controller<D> {
    // Create a controller, the configuration is validated first
    // and an invalid one is refused
    pub fn new(config: Arc<Config>, device: D) -> Result<Self, ConfigError> {
        config.validate()?;

        let policy = StepPolicy::from(config.as_ref());

        Ok(Self {
            config,
            policy,
            device,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // Sample the device and nudge the fan speed if needed.
    // Any device error aborts the tick right away
    pub async fn tick(&self) -> Result<TickOutcome, TickError> {
        let temperature = self
            .device
            .read_core_temperature()
            .await
            .map_err(SensorError::Temperature)?;
        let fan_speed = self
            .device
            .read_fan_speed()
            .await
            .map_err(SensorError::FanSpeed)?;

        info!("{}°C / {}%", temperature, fan_speed);

        let observation = Observation { temperature, fan_speed };
        let next_fan_speed = self.policy.next_fan_speed(observation);

        if next_fan_speed != fan_speed {
            self.device
                .write_fan_speed(next_fan_speed)
                .await
                .map_err(|source| ActuatorError {
                    speed: next_fan_speed,
                    source,
                })?;

            info!("Fan speed: {}% -> {}%", fan_speed, next_fan_speed);
        }

        Ok(TickOutcome {
            observation,
            next_fan_speed,
        })
    }

    // Give the fan control back to the driver
    pub async fn release(&self) -> Result<(), ReleaseError> {
        self.device.restore_auto().await.map_err(ReleaseError)?;

        info!("Fan control handed back to the driver");

        Ok(())
    }
}
