use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use fankong::{
    arg_parser::{ArgsOptions, StartupError},
    controller::Controller,
    device::nvidia_settings::NvidiaSettings,
    logger,
    scheduler::Scheduler,
};
use tokio::{
    select,
    signal::{
        ctrl_c,
        unix::{SignalKind, signal},
    },
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    logger::init_logging();

    // Parse the command line arguments
    let args_options = match ArgsOptions::parse() {
        Ok(options) => options,
        Err(StartupError::EarlyExit) => return ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match run(args_options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            for e in err.chain() {
                error!("{e}");
            }

            ExitCode::FAILURE
        }
    }
}

async fn run(args_options: ArgsOptions) -> Result<()> {
    let config = Arc::new(
        args_options
            .load_config()
            .with_context(|| "Invalid configuration")?,
    );

    info!(
        "Target {}°C, fan speed between {}% and {}%",
        config.target_temp, config.min_fan_speed, config.max_fan_speed
    );

    // This token and tracker will be used to handle graceful shutdown
    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    // Both SIGINT and SIGTERM stop the control loop
    let mut terminate = signal(SignalKind::terminate())
        .with_context(|| "Failed to install the SIGTERM handler")?;
    {
        let token = token.clone();

        tracker.spawn(async move {
            select! {
                _ = token.cancelled() => {},
                Ok(()) = ctrl_c() => {
                    info!("Interrupted, shutting down");
                },
                _ = terminate.recv() => {
                    info!("Terminated, shutting down");
                },
            }

            token.cancel();
        });
    }

    let device = NvidiaSettings::new(&config, token.clone());
    let controller = Controller::new(config.clone(), device)?;

    let scheduler =
        Scheduler::new(config.interval.as_duration(), token.clone());
    let result = scheduler.run_and_release(&controller).await;

    // Cancel the token to communicate the program
    // termination to the running tasks
    token.cancel();

    // Wait for the tasks to finish
    tracker.close();
    tracker.wait().await;

    result.with_context(|| "Fan control loop failed")?;

    Ok(())
}
