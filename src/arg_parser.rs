use std::{
    io::{self, Write},
    path::PathBuf,
};

use argparse::{ArgumentParser, Print, StoreOption, StoreTrue};
use thiserror::Error;

use crate::{
    config::{Config, ConfigError},
    interval::Interval,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartupError {
    // The parser already reported the cause on stderr
    #[error("invalid command line arguments (exit code {0})")]
    InvalidArguments(i32),
    // Help or version was printed, nothing left to do
    #[error("nothing to run")]
    EarlyExit,
}

// Command line options, every setting is optional here
// so that it only overrides the configuration file when given
#[derive(Debug, Default)]
pub struct ArgsOptions {
    pub config_file_path: Option<PathBuf>,

    pub display: Option<String>,
    pub xauthority: Option<String>,
    pub interval: Option<Interval>,
    pub target_temp: Option<i32>,
    pub min_fan_speed: Option<u32>,
    pub max_fan_speed: Option<u32>,

    pub gpu: Option<u32>,
    pub fan: Option<u32>,
    pub nvidia_settings: Option<PathBuf>,
    pub restore_auto: bool,
}

impl ArgsOptions {
    // Parse the process arguments, usage and errors
    // go to the process stdout and stderr
    pub fn parse() -> Result<Self, StartupError> {
        Self::parse_from(
            std::env::args().collect(),
            &mut io::stdout(),
            &mut io::stderr(),
        )
    }

    // Parse the given arguments, the first one being the program name
    pub fn parse_from(
        args: Vec<String>,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<Self, StartupError> {
        let mut options = ArgsOptions::default();

        {
            let mut parser = ArgumentParser::new();
            parser.set_description(
                "Keep an NVIDIA GPU at a target temperature by nudging \
                 its fan speed one percent at a time",
            );

            parser.refer(&mut options.config_file_path).add_option(
                &["-c", "--config"],
                StoreOption,
                "Json configuration file, command line options take precedence",
            );

            parser.refer(&mut options.display).add_option(
                &["--display"],
                StoreOption,
                "X display used by nvidia-settings (required)",
            );

            parser.refer(&mut options.xauthority).add_option(
                &["--xauthority"],
                StoreOption,
                "X authority file used by nvidia-settings (required)",
            );

            parser.refer(&mut options.interval).add_option(
                &["--interval"],
                StoreOption,
                "Time between two updates, e.g. 30s or 1m30s (default 30s)",
            );

            parser.refer(&mut options.target_temp).add_option(
                &["--target-temp"],
                StoreOption,
                "Target GPU core temperature in °C (default 60)",
            );

            parser.refer(&mut options.min_fan_speed).add_option(
                &["--min-fan-speed"],
                StoreOption,
                "Lowest fan speed in percent (default 30)",
            );

            parser.refer(&mut options.max_fan_speed).add_option(
                &["--max-fan-speed"],
                StoreOption,
                "Highest fan speed in percent (default 100)",
            );

            parser.refer(&mut options.gpu).add_option(
                &["--gpu"],
                StoreOption,
                "Index of the GPU whose temperature is read (default 0)",
            );

            parser.refer(&mut options.fan).add_option(
                &["--fan"],
                StoreOption,
                "Index of the controlled fan (default 0)",
            );

            parser.refer(&mut options.nvidia_settings).add_option(
                &["--nvidia-settings"],
                StoreOption,
                "Path of the nvidia-settings executable",
            );

            parser.refer(&mut options.restore_auto).add_option(
                &["--restore-auto"],
                StoreTrue,
                "Give the fan back to the driver on exit",
            );

            // Show daemon version
            parser.add_option(
                &["-V", "--version"],
                Print(env!("CARGO_PKG_VERSION").to_string()),
                "Show the daemon version",
            );

            match parser.parse(args, stdout, stderr) {
                Ok(()) => {}
                Err(0) => return Err(StartupError::EarlyExit),
                Err(code) => return Err(StartupError::InvalidArguments(code)),
            }
        }

        Ok(options)
    }

    // Build the daemon configuration: defaults, then the
    // configuration file if any, then the command line
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config_file_path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        self.apply(&mut config);
        config.validate()?;

        Ok(config)
    }

    // Override the configuration with the options given on the command line
    pub fn apply(&self, config: &mut Config) {
        if let Some(display) = &self.display {
            config.display = display.clone();
        }
        if let Some(xauthority) = &self.xauthority {
            config.xauthority = xauthority.clone();
        }
        if let Some(interval) = self.interval {
            config.interval = interval;
        }
        if let Some(target_temp) = self.target_temp {
            config.target_temp = target_temp;
        }
        if let Some(min_fan_speed) = self.min_fan_speed {
            config.min_fan_speed = min_fan_speed;
        }
        if let Some(max_fan_speed) = self.max_fan_speed {
            config.max_fan_speed = max_fan_speed;
        }
        if let Some(gpu) = self.gpu {
            config.gpu = gpu;
        }
        if let Some(fan) = self.fan {
            config.fan = fan;
        }
        if let Some(nvidia_settings) = &self.nvidia_settings {
            config.nvidia_settings = nvidia_settings.clone();
        }
        if self.restore_auto {
            config.restore_auto = true;
        }
    }
}
