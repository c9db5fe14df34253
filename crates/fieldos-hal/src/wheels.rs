//! Differential drive.
//!
//! | Variant | Backend |
//! |---|---|
//! | `wheels`, `double_wheels` | [`OdriveWheels`], one motor controller per wheel on CAN |
//! | any | [`SimulatedWheels`], integrates an odometry pose |

use std::sync::Arc;
use std::time::{Duration, Instant};

use fieldos_bus::CanBus;
use fieldos_types::{FieldError, ensure_finite};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::odrive::{AxisRequest, OdriveNode};

pub trait Wheels: Send {
    fn name(&self) -> &str;

    /// Command a body velocity: `linear` in m/s, `angular` in rad/s.
    ///
    /// # Errors
    ///
    /// [`FieldError::InvalidCommand`] for non-finite values, [`FieldError::Bus`]
    /// when a motor controller cannot be reached.
    fn drive(&mut self, linear: f64, angular: f64) -> Result<(), FieldError>;

    /// Command zero velocity on every wheel.
    fn stop(&mut self) -> Result<(), FieldError>;

    /// Last accepted `(linear, angular)` command.
    fn velocities(&self) -> (f64, f64);

    fn poll(&mut self) -> Result<(), FieldError>;
}

pub type SharedWheels = Arc<Mutex<dyn Wheels>>;

pub fn shared_wheels<W: Wheels + 'static>(wheels: W) -> SharedWheels {
    Arc::new(Mutex::new(wheels))
}

/// Split a body velocity into `(left, right)` wheel surface speeds in m/s.
pub fn wheel_speeds(linear: f64, angular: f64, wheel_distance: f64) -> (f64, f64) {
    let half = angular * wheel_distance / 2.0;
    (linear - half, linear + half)
}

fn check_velocities(name: &str, linear: f64, angular: f64) -> Result<(), FieldError> {
    ensure_finite(name, "linear velocity", linear)?;
    ensure_finite(name, "angular velocity", angular)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriveConfig {
    pub name: String,
    /// Controller node addresses per side; `double_wheels` has two each.
    pub left_nodes: Vec<u16>,
    pub right_nodes: Vec<u16>,
    pub is_left_reversed: bool,
    pub is_right_reversed: bool,
    /// Ground travel per motor turn.
    pub m_per_turn: f64,
    pub wheel_distance: f64,
}

struct Side {
    nodes: Vec<OdriveNode>,
    reversed: bool,
}

impl Side {
    fn send(&self, speed: f64, m_per_turn: f64) -> Result<(), FieldError> {
        let sign = if self.reversed { -1.0 } else { 1.0 };
        let turns_per_s = (sign * speed / m_per_turn) as f32;
        let mut result = Ok(());
        for node in &self.nodes {
            result = result.and(node.set_input_vel(turns_per_s));
        }
        result
    }
}

/// Wheels driven by motor controllers in velocity control.
pub struct OdriveWheels {
    config: DriveConfig,
    left: Side,
    right: Side,
    velocities: (f64, f64),
    /// Newest heartbeat already inspected, per node.
    seen: Vec<(u16, u64)>,
}

impl OdriveWheels {
    /// Put every wheel controller into closed-loop control.
    pub fn connect(config: DriveConfig, bus: &CanBus) -> Result<Self, FieldError> {
        let side = |nodes: &[u16], reversed| Side {
            nodes: nodes.iter().map(|&n| OdriveNode::new(bus.clone(), n)).collect(),
            reversed,
        };
        let left = side(&config.left_nodes, config.is_left_reversed);
        let right = side(&config.right_nodes, config.is_right_reversed);
        for node in left.nodes.iter().chain(&right.nodes) {
            node.set_axis_state(AxisRequest::ClosedLoop)?;
        }
        let seen = config
            .left_nodes
            .iter()
            .chain(&config.right_nodes)
            .map(|&n| (n, 0))
            .collect();
        info!(
            wheels = %config.name,
            left = ?config.left_nodes,
            right = ?config.right_nodes,
            "wheels ready"
        );
        Ok(Self {
            config,
            left,
            right,
            velocities: (0.0, 0.0),
            seen,
        })
    }

    fn nodes(&self) -> impl Iterator<Item = &OdriveNode> {
        self.left.nodes.iter().chain(&self.right.nodes)
    }
}

impl Wheels for OdriveWheels {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn drive(&mut self, linear: f64, angular: f64) -> Result<(), FieldError> {
        check_velocities(&self.config.name, linear, angular)?;
        let (left, right) = wheel_speeds(linear, angular, self.config.wheel_distance);
        debug!(wheels = %self.config.name, left, right, "drive");
        self.left.send(left, self.config.m_per_turn)?;
        self.right.send(right, self.config.m_per_turn)?;
        self.velocities = (linear, angular);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), FieldError> {
        self.velocities = (0.0, 0.0);
        let left = self.left.send(0.0, self.config.m_per_turn);
        let right = self.right.send(0.0, self.config.m_per_turn);
        left.and(right)
    }

    fn velocities(&self) -> (f64, f64) {
        self.velocities
    }

    /// Report the first controller that raised a new error since the last
    /// poll.
    fn poll(&mut self) -> Result<(), FieldError> {
        let heartbeats: Vec<_> = self.nodes().map(|n| (n.node(), n.heartbeat())).collect();
        let mut fault = None;
        for (node, heartbeat) in heartbeats {
            let Some(heartbeat) = heartbeat else { continue };
            let Some(entry) = self.seen.iter_mut().find(|(n, _)| *n == node) else {
                continue;
            };
            if heartbeat.seq <= entry.1 {
                continue;
            }
            entry.1 = heartbeat.seq;
            if heartbeat.error != 0 && fault.is_none() {
                warn!(wheels = %self.config.name, node, error = heartbeat.error, "wheel controller error");
                fault = Some(FieldError::Bus {
                    bus: self.config.name.clone(),
                    details: format!("node 0x{node:03X} reported error 0x{:X}", heartbeat.error),
                });
            }
        }
        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Planar pose in the odometry frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl Pose {
    /// Advance by a constant body velocity held for `dt` seconds.
    pub fn integrate(&mut self, linear: f64, angular: f64, dt: f64) {
        let heading = self.heading + angular * dt / 2.0;
        self.x += linear * heading.cos() * dt;
        self.y += linear * heading.sin() * dt;
        self.heading += angular * dt;
    }
}

pub struct SimulatedWheels {
    name: String,
    velocities: (f64, f64),
    pose: Pose,
    last_poll: Option<Instant>,
    controller_error: Option<u32>,
}

impl SimulatedWheels {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            velocities: (0.0, 0.0),
            pose: Pose::default(),
            last_poll: None,
            controller_error: None,
        }
    }

    /// Raise a controller error code; the next poll reports it once.
    pub fn raise_controller_error(&mut self, code: u32) {
        self.controller_error = Some(code);
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Integrate the current command over `dt`.
    pub fn advance(&mut self, dt: Duration) {
        let (linear, angular) = self.velocities;
        self.pose.integrate(linear, angular, dt.as_secs_f64());
    }
}

impl Wheels for SimulatedWheels {
    fn name(&self) -> &str {
        &self.name
    }

    fn drive(&mut self, linear: f64, angular: f64) -> Result<(), FieldError> {
        check_velocities(&self.name, linear, angular)?;
        self.velocities = (linear, angular);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), FieldError> {
        self.velocities = (0.0, 0.0);
        Ok(())
    }

    fn velocities(&self) -> (f64, f64) {
        self.velocities
    }

    fn poll(&mut self) -> Result<(), FieldError> {
        let now = Instant::now();
        if let Some(last) = self.last_poll.replace(now) {
            self.advance(now.duration_since(last));
        }
        match self.controller_error.take() {
            Some(code) => Err(FieldError::Bus {
                bus: self.name.clone(),
                details: format!("simulated controller error 0x{code:X}"),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use fieldos_bus::MockCanAdapter;

    use super::*;
    use crate::odrive::testing::{commands_for, heartbeat_frame};
    use crate::odrive::{CMD_SET_AXIS_STATE, CMD_SET_INPUT_VEL};

    fn double_wheels() -> (OdriveWheels, CanBus, MockCanAdapter) {
        let mock = MockCanAdapter::new();
        let bus = CanBus::new("can", Box::new(mock.clone()));
        let config = DriveConfig {
            name: "wheels".into(),
            left_nodes: vec![0x000, 0x100],
            right_nodes: vec![0x200, 0x300],
            is_left_reversed: false,
            is_right_reversed: true,
            m_per_turn: 0.1,
            wheel_distance: 0.5,
        };
        let wheels = OdriveWheels::connect(config, &bus).unwrap();
        (wheels, bus, mock)
    }

    #[test]
    fn speeds_split_around_centre() {
        assert_eq!(wheel_speeds(1.0, 0.0, 0.5), (1.0, 1.0));
        assert_eq!(wheel_speeds(0.0, 2.0, 0.5), (-0.5, 0.5));
        let (left, right) = wheel_speeds(0.3, 0.4, 0.5);
        assert!((left - 0.2).abs() < 1e-12);
        assert!((right - 0.4).abs() < 1e-12);
    }

    #[test]
    fn connect_enters_closed_loop() {
        let (_wheels, _bus, mock) = double_wheels();
        for node in [0x000, 0x100, 0x200, 0x300] {
            let cmds = commands_for(&mock, node);
            assert_eq!(cmds.len(), 1);
            assert_eq!(cmds[0].0, CMD_SET_AXIS_STATE);
        }
    }

    #[test]
    fn drive_converts_to_motor_turns() {
        let (mut wheels, _bus, mock) = double_wheels();
        mock.take_sent();
        wheels.drive(0.3, 0.4).unwrap();
        // left 0.2 m/s, right 0.4 m/s reversed, 0.1 m per turn
        for node in [0x000, 0x100] {
            let cmds = commands_for(&mock, node);
            assert_eq!(cmds[0].0, CMD_SET_INPUT_VEL);
            assert!((cmds[0].1 - 2.0).abs() < 1e-5);
        }
        for node in [0x200, 0x300] {
            assert!((commands_for(&mock, node)[0].1 + 4.0).abs() < 1e-5);
        }
        assert_eq!(wheels.velocities(), (0.3, 0.4));
    }

    #[test]
    fn stop_zeroes_every_wheel() {
        let (mut wheels, _bus, mock) = double_wheels();
        wheels.drive(0.5, 0.0).unwrap();
        mock.take_sent();
        wheels.stop().unwrap();
        assert_eq!(mock.sent().len(), 4);
        assert!(mock.sent().iter().all(|f| f.f32_at(0) == Some(0.0)));
        assert_eq!(wheels.velocities(), (0.0, 0.0));
    }

    #[test]
    fn non_finite_velocity_is_rejected_before_the_bus() {
        let (mut wheels, _bus, mock) = double_wheels();
        mock.take_sent();
        assert!(matches!(
            wheels.drive(f64::NAN, 0.0),
            Err(FieldError::InvalidCommand { .. })
        ));
        assert!(mock.sent().is_empty());

        let mut sim = SimulatedWheels::new("wheels");
        assert!(matches!(
            sim.drive(0.0, f64::INFINITY),
            Err(FieldError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn write_failure_keeps_previous_command() {
        let (mut wheels, _bus, mock) = double_wheels();
        wheels.drive(0.2, 0.0).unwrap();
        mock.set_fail(true);
        assert!(matches!(wheels.drive(0.5, 0.0), Err(FieldError::Bus { .. })));
        assert_eq!(wheels.velocities(), (0.2, 0.0));
    }

    #[test]
    fn controller_error_is_reported_once() {
        let (mut wheels, bus, mock) = double_wheels();
        mock.inject(heartbeat_frame(0x200, 0x80, 8));
        bus.poll().unwrap();
        assert!(matches!(wheels.poll(), Err(FieldError::Bus { .. })));
        assert!(wheels.poll().is_ok());
    }

    fn same_outcome(hw: &Result<(), FieldError>, sim: &Result<(), FieldError>) -> bool {
        match (hw, sim) {
            (Ok(()), Ok(())) => true,
            (Err(a), Err(b)) => std::mem::discriminant(a) == std::mem::discriminant(b),
            _ => false,
        }
    }

    #[test]
    fn simulation_and_hardware_agree() {
        let (mut hw, bus, mock) = double_wheels();
        let mut sim = SimulatedWheels::new("wheels");

        let step = |label: &str,
                    hw: &mut OdriveWheels,
                    sim: &mut SimulatedWheels,
                    command: &dyn Fn(&mut dyn Wheels) -> Result<(), FieldError>| {
            let hw_result = command(hw);
            let sim_result = command(sim);
            assert_eq!(hw_result, sim_result, "{label}: results differ");
            bus.poll().unwrap();
            let hw_poll = hw.poll();
            let sim_poll = sim.poll();
            assert!(same_outcome(&hw_poll, &sim_poll), "{label}: {hw_poll:?} vs {sim_poll:?}");
            assert_eq!(hw.velocities(), sim.velocities(), "{label}: velocities differ");
        };

        step("drive", &mut hw, &mut sim, &|w| w.drive(0.4, 0.0));
        step("turn", &mut hw, &mut sim, &|w| w.drive(0.1, -0.5));
        step("nan", &mut hw, &mut sim, &|w| w.drive(f64::NAN, 0.0));
        step("infinite", &mut hw, &mut sim, &|w| w.drive(0.0, f64::INFINITY));
        step("stop while driving", &mut hw, &mut sim, &|w| w.stop());
        step("stop idle", &mut hw, &mut sim, &|w| w.stop());

        mock.inject(heartbeat_frame(0x100, 0x20, 8));
        sim.raise_controller_error(0x20);
        step("controller error", &mut hw, &mut sim, &|w| w.drive(0.2, 0.0));
        step("after error", &mut hw, &mut sim, &|w| w.drive(0.3, 0.1));
        step("final stop", &mut hw, &mut sim, &|w| w.stop());
        assert_eq!(hw.velocities(), (0.0, 0.0));
    }

    #[test]
    fn simulation_integrates_pose() {
        let mut sim = SimulatedWheels::new("wheels");
        sim.drive(0.5, 0.0).unwrap();
        sim.advance(Duration::from_secs(2));
        assert!((sim.pose().x - 1.0).abs() < 1e-9);
        assert_eq!(sim.pose().y, 0.0);

        sim.stop().unwrap();
        sim.advance(Duration::from_secs(2));
        assert!((sim.pose().x - 1.0).abs() < 1e-9);
    }
}
