//! Periodic tasks of a running robot.
//!
//! [`run`] drives the safety poll and the status poll from one execution
//! context.  The `select!` is biased: shutdown first, then the safety poll,
//! so a slow status poll never delays stop propagation by more than one
//! status cycle.  Both polls are synchronous; nothing is awaited while a
//! module lock is held.

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

use crate::config::RuntimeConfig;
use crate::robot::Robot;

/// Run until `shutdown` turns `true` or its sender is dropped, then stop
/// the robot.
pub async fn run(robot: &Robot, config: &RuntimeConfig, mut shutdown: watch::Receiver<bool>) {
    let mut safety = time::interval(config.safety_period());
    safety.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut status = time::interval(config.status_period());
    status.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        profile = robot.profile(),
        safety_ms = config.safety_period_ms,
        status_ms = config.status_period_ms,
        "scheduler started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = safety.tick() => {
                robot.safety_poll();
            }
            _ = status.tick() => {
                robot.status_poll();
            }
        }
    }

    info!(profile = robot.profile(), "scheduler stopping");
    if let Err(e) = robot.stop().await {
        error!(error = %e, "stop during shutdown failed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fieldos_bus::Topic;
    use fieldos_hal::{Axis, Wheels};
    use fieldos_types::{AxisMotion, EventPayload, SafetyState};

    use super::*;

    fn config() -> RuntimeConfig {
        RuntimeConfig {
            simulation: true,
            safety_period_ms: 5,
            status_period_ms: 10,
            ..RuntimeConfig::default()
        }
    }

    #[tokio::test]
    async fn polls_until_shutdown_then_stops() {
        let config = config();
        let robot = Robot::assemble(&config).unwrap();
        let mut telemetry = robot.subscribe(Topic::Telemetry);
        let mut y = robot.axis("y_axis").unwrap();
        y.home().unwrap();
        let mut wheels = robot.wheels().unwrap();
        wheels.drive(0.2, 0.0).unwrap();

        let (tx, rx) = watch::channel(false);
        let stopper = async {
            time::sleep(Duration::from_millis(60)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(run(&robot, &config, rx), stopper);

        assert!(matches!(
            telemetry.try_recv().map(|e| e.payload),
            Ok(EventPayload::Telemetry(_))
        ));
        assert_eq!(y.state(), AxisMotion::Referenced);
        assert_eq!(wheels.velocities(), (0.0, 0.0));
    }

    #[tokio::test]
    async fn soft_stop_is_observed_by_safety_poll() {
        let config = config();
        let robot = Robot::assemble(&config).unwrap();
        let mut safety = robot.subscribe(Topic::Safety);

        let (tx, rx) = watch::channel(false);
        let operator = async {
            time::sleep(Duration::from_millis(20)).await;
            robot.set_soft_estop(true).unwrap();
            time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(run(&robot, &config, rx), operator);

        assert_eq!(robot.safety_state(), SafetyState::SoftStopped);
        assert!(matches!(
            safety.try_recv().map(|e| e.payload),
            Ok(EventPayload::EstopTriggered {
                state: SafetyState::SoftStopped,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn dropped_sender_ends_the_loop() {
        let config = config();
        let robot = Robot::assemble(&config).unwrap();
        let (tx, rx) = watch::channel(false);
        drop(tx);
        run(&robot, &config, rx).await;
    }
}
