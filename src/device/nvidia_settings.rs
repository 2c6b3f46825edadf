use std::{num::ParseIntError, path::PathBuf, process::Stdio, str::FromStr};

use async_trait::async_trait;
use tokio::{process::Command, select};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    config::Config,
    device::{DeviceError, FanDevice},
};

// Fan device driven through the nvidia-settings command line utility.
// Every call spawns one nvidia-settings process addressing the
// configured X display
pub struct NvidiaSettings {
    program: PathBuf,

    // Passed to the child as DISPLAY and XAUTHORITY
    display: String,
    xauthority: String,

    gpu: u32,
    fan: u32,

    // Cancelling this token kills any running query.
    // Assignments always run to completion so the fan is
    // never left with a half applied update
    token: CancellationToken,
}

impl NvidiaSettings {
    pub fn new(config: &Config, token: CancellationToken) -> Self {
        Self {
            program: config.nvidia_settings.clone(),
            display: config.display.clone(),
            xauthority: config.xauthority.clone(),
            gpu: config.gpu,
            fan: config.fan,
            token,
        }
    }

    fn core_temp_attribute(&self) -> String {
        format!("[gpu:{}]/GPUCoreTemp", self.gpu)
    }

    fn fan_speed_attribute(&self) -> String {
        format!("[fan:{}]/GPUTargetFanSpeed", self.fan)
    }

    fn control_state_assignment(&self, manual: bool) -> String {
        format!("[gpu:{}]/GPUFanControlState={}", self.gpu, u8::from(manual))
    }

    // Query a single integer attribute
    async fn query<T>(&self, attribute: String) -> Result<T, DeviceError>
    where
        T: FromStr<Err = ParseIntError>,
    {
        let output = self.execute(&["-q", attribute.as_str(), "-t"], true).await?;

        parse_value(&attribute, &output)
    }

    // Apply all the assignments with a single invocation
    async fn assign(&self, assignments: &[String]) -> Result<(), DeviceError> {
        let args = assignments
            .iter()
            .flat_map(|a| ["-a", a.as_str()])
            .collect::<Vec<_>>();

        self.execute(&args, false).await?;

        Ok(())
    }

    // Run nvidia-settings and return its standard output.
    // When interruptible the child is killed as soon
    // as the cancellation token fires
    async fn execute(
        &self,
        args: &[&str],
        interruptible: bool,
    ) -> Result<String, DeviceError> {
        let program = self.program.display().to_string();

        debug!("Running: {} {}", program, args.join(" "));

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .env("DISPLAY", &self.display)
            .env("XAUTHORITY", &self.xauthority)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = if interruptible {
            select! {
                biased;
                _ = self.token.cancelled() => {
                    return Err(DeviceError::Interrupted { program });
                },
                output = command.output() => output,
            }
        } else {
            command.output().await
        };

        let output = output.map_err(|source| DeviceError::Spawn {
            program: program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(DeviceError::Failed {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr)
                    .trim()
                    .to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        trace!("{} output: {:?}", program, stdout);

        Ok(stdout)
    }
}

#[async_trait]
impl FanDevice for NvidiaSettings {
    async fn read_core_temperature(&self) -> Result<i32, DeviceError> {
        self.query(self.core_temp_attribute()).await
    }

    async fn read_fan_speed(&self) -> Result<u32, DeviceError> {
        self.query(self.fan_speed_attribute()).await
    }

    async fn write_fan_speed(&self, speed: u32) -> Result<(), DeviceError> {
        let assignments = [
            self.control_state_assignment(true),
            format!("{}={}", self.fan_speed_attribute(), speed),
        ];

        self.assign(&assignments).await
    }

    async fn restore_auto(&self) -> Result<(), DeviceError> {
        self.assign(&[self.control_state_assignment(false)]).await
    }
}

// Parse the terse output of a query, a single integer
// optionally surrounded by whitespace
fn parse_value<T>(query: &str, output: &str) -> Result<T, DeviceError>
where
    T: FromStr<Err = ParseIntError>,
{
    let value = output.trim();

    if value.is_empty() {
        return Err(DeviceError::EmptyOutput {
            query: query.to_string(),
        });
    }

    value.parse().map_err(|source| DeviceError::InvalidOutput {
        query: query.to_string(),
        output: value.to_string(),
        source,
    })
}
