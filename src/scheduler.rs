use std::time::Duration;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, trace_span, warn};

use crate::{
    controller::Controller,
    device::FanDevice,
    errors::{RunError, TickError},
};

// Run the controller once right away and then once per interval,
// the wait only starts after the previous tick completed
pub struct Scheduler {
    interval: Duration,

    // Cancelled on shutdown, only observed between ticks
    token: CancellationToken,
}

impl Scheduler {
    pub fn new(interval: Duration, token: CancellationToken) -> Self {
        Self { interval, token }
    }

    // Drive the controller until the token is cancelled or a tick fails.
    // A cancellation is a clean exit, as is a tick whose device
    // command got killed because of that cancellation
    pub async fn run<D: FanDevice>(
        &self,
        controller: &Controller<D>,
    ) -> Result<(), TickError> {
        info!("Fan controller: Running, interval {:?}", self.interval);

        loop {
            let tick = controller.tick().instrument(trace_span!("tick"));

            if let Err(err) = tick.await {
                if self.token.is_cancelled() && err.is_interrupted() {
                    warn!("Fan controller: Tick interrupted by shutdown");
                    break;
                }

                return Err(err);
            }

            select! {
                biased;
                _ = self.token.cancelled() => {
                    break;
                },
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Fan controller: Quitting");

        Ok(())
    }

    // Run the loop, then hand the fan back to the driver when
    // the configuration asks for it, whatever ended the loop.
    // A loop failure wins over a release failure, which is only logged
    pub async fn run_and_release<D: FanDevice>(
        &self,
        controller: &Controller<D>,
    ) -> Result<(), RunError> {
        let result = self.run(controller).await;

        if !controller.config().restore_auto {
            return Ok(result?);
        }

        let released = controller.release().await;

        match (result, released) {
            (Err(err), Err(release_err)) => {
                warn!("{release_err}");
                Err(err.into())
            }
            (result, released) => {
                result?;
                Ok(released?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use mockall::predicate::eq;

    use super::*;
    use crate::{
        config::Config,
        device::{DeviceError, MockFanDevice},
        errors::{ReleaseError, SensorError},
    };

    fn config() -> Arc<Config> {
        Arc::new(Config {
            display: ":0".to_string(),
            xauthority: "/tmp/.Xauthority".to_string(),
            ..Config::default()
        })
    }

    fn restoring_config() -> Arc<Config> {
        Arc::new(Config {
            restore_auto: true,
            ..config().as_ref().clone()
        })
    }

    fn empty_temperature() -> DeviceError {
        DeviceError::EmptyOutput {
            query: "[gpu:0]/GPUCoreTemp".to_string(),
        }
    }

    fn restore_failure() -> DeviceError {
        DeviceError::Failed {
            program: "nvidia-settings".to_string(),
            status: std::process::ExitStatus::default(),
            stderr: "ERROR: Error assigning value".to_string(),
        }
    }

    // Device sitting at the target temperature, counts its ticks
    fn steady_device(ticks: Arc<AtomicUsize>) -> MockFanDevice {
        let mut device = MockFanDevice::new();

        device.expect_read_core_temperature().returning(move || {
            ticks.fetch_add(1, Ordering::SeqCst);
            Ok(60)
        });
        device.expect_read_fan_speed().returning(|| Ok(60));
        device.expect_write_fan_speed().never();

        device
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_immediately_then_every_interval() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();

        let controller =
            Controller::new(config(), steady_device(ticks.clone())).unwrap();
        let scheduler = Scheduler::new(Duration::from_secs(30), token.clone());

        let (result, _) = tokio::join!(scheduler.run(&controller), async {
            tokio::time::sleep(Duration::from_secs(65)).await;
            token.cancel();
        });

        assert!(result.is_ok());
        // Ticks at 0s, 30s and 60s
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_waits_for_the_running_tick() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        token.cancel();

        let controller =
            Controller::new(config(), steady_device(ticks.clone())).unwrap();
        let scheduler = Scheduler::new(Duration::from_secs(30), token);

        assert!(scheduler.run(&controller).await.is_ok());
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_failure_ends_the_loop() {
        let mut device = MockFanDevice::new();
        device.expect_read_core_temperature().times(1).returning(|| {
            Err(DeviceError::EmptyOutput {
                query: "[gpu:0]/GPUCoreTemp".to_string(),
            })
        });

        let controller = Controller::new(config(), device).unwrap();
        let scheduler =
            Scheduler::new(Duration::from_secs(30), CancellationToken::new());

        let err = scheduler.run(&controller).await.unwrap_err();
        assert!(!err.is_interrupted());
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_tick_after_shutdown_is_clean() {
        let token = CancellationToken::new();
        let mut device = MockFanDevice::new();

        {
            let token = token.clone();
            device.expect_read_core_temperature().times(1).returning(
                move || {
                    token.cancel();
                    Err(DeviceError::Interrupted {
                        program: "nvidia-settings".to_string(),
                    })
                },
            );
        }

        let controller = Controller::new(config(), device).unwrap();
        let scheduler = Scheduler::new(Duration::from_secs(30), token);

        assert!(scheduler.run(&controller).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_tick_without_shutdown_is_an_error() {
        let mut device = MockFanDevice::new();
        device.expect_read_core_temperature().times(1).returning(|| {
            Err(DeviceError::Interrupted {
                program: "nvidia-settings".to_string(),
            })
        });

        let controller = Controller::new(config(), device).unwrap();
        let scheduler =
            Scheduler::new(Duration::from_secs(30), CancellationToken::new());

        assert!(scheduler.run(&controller).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_a_tick_lets_it_finish() {
        let token = CancellationToken::new();
        let mut device = MockFanDevice::new();

        {
            let token = token.clone();
            device.expect_read_core_temperature().times(1).returning(
                move || {
                    token.cancel();
                    Ok(70)
                },
            );
        }
        device.expect_read_fan_speed().times(1).returning(|| Ok(50));
        device
            .expect_write_fan_speed()
            .with(eq(51))
            .times(1)
            .returning(|_| Ok(()));

        let controller = Controller::new(config(), device).unwrap();
        let scheduler = Scheduler::new(Duration::from_secs(30), token);

        assert!(scheduler.run(&controller).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn fan_is_left_alone_without_restore_auto() {
        let token = CancellationToken::new();
        token.cancel();

        let ticks = Arc::new(AtomicUsize::new(0));
        let mut device = steady_device(ticks);
        device.expect_restore_auto().never();

        let controller = Controller::new(config(), device).unwrap();
        let scheduler = Scheduler::new(Duration::from_secs(30), token);

        assert!(scheduler.run_and_release(&controller).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn release_failure_after_a_clean_loop_is_an_error() {
        let token = CancellationToken::new();
        token.cancel();

        let ticks = Arc::new(AtomicUsize::new(0));
        let mut device = steady_device(ticks);
        device
            .expect_restore_auto()
            .times(1)
            .returning(|| Err(restore_failure()));

        let controller = Controller::new(restoring_config(), device).unwrap();
        let scheduler = Scheduler::new(Duration::from_secs(30), token);

        let err = scheduler.run_and_release(&controller).await.unwrap_err();
        assert!(matches!(
            err,
            RunError::Release(ReleaseError(DeviceError::Failed { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn tick_failure_wins_over_release_failure() {
        let mut device = MockFanDevice::new();
        device
            .expect_read_core_temperature()
            .times(1)
            .returning(|| Err(empty_temperature()));
        device
            .expect_restore_auto()
            .times(1)
            .returning(|| Err(restore_failure()));

        let controller = Controller::new(restoring_config(), device).unwrap();
        let scheduler =
            Scheduler::new(Duration::from_secs(30), CancellationToken::new());

        let err = scheduler.run_and_release(&controller).await.unwrap_err();
        assert!(matches!(
            err,
            RunError::Tick(TickError::Sensor(SensorError::Temperature(
                DeviceError::EmptyOutput { .. }
            )))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn fan_is_released_after_a_tick_failure() {
        let mut device = MockFanDevice::new();
        device
            .expect_read_core_temperature()
            .times(1)
            .returning(|| Err(empty_temperature()));
        device.expect_restore_auto().times(1).returning(|| Ok(()));

        let controller = Controller::new(restoring_config(), device).unwrap();
        let scheduler =
            Scheduler::new(Duration::from_secs(30), CancellationToken::new());

        let err = scheduler.run_and_release(&controller).await.unwrap_err();
        assert!(matches!(err, RunError::Tick(_)));
    }
}
