use fieldos_bus::PinPort;
use fieldos_types::{AxisMotion, FieldError};
use tracing::{info, warn};

use super::{Axis, AxisState, EndSwitch};
use crate::odrive::{AxisRequest, OdriveNode};

/// A move is complete once the encoder is this close to the setpoint.
const POSITION_TOLERANCE_TURNS: f32 = 0.01;
const VELOCITY_TOLERANCE_TURNS_PER_S: f32 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub struct TornadoConfig {
    pub name: String,
    pub z_node: u16,
    pub turn_node: u16,
    /// Vertical travel per z motor turn.
    pub m_per_turn: f64,
    pub is_z_reversed: bool,
    /// Turns per second.
    pub speed_limit: f64,
    /// Amperes.
    pub current_limit: f64,
    pub min_position: f64,
    pub max_position: f64,
    pub end_switches: Vec<EndSwitch>,
    pub reference_pins: Vec<u8>,
}

/// Vertical axis of the rotary-linear tool; the z motor runs in position
/// control, the turn motor is held idle between operations.
pub struct TornadoAxis {
    state: AxisState,
    config: TornadoConfig,
    z: OdriveNode,
    turn: OdriveNode,
    switches: PinPort,
    zero_turns: f32,
    last_seq: u64,
    awaiting_stop: bool,
    /// The controller has reported its homing state since `home()`.  Only
    /// an idle heartbeat after that ends the reference run.
    homing_seen: bool,
}

impl TornadoAxis {
    pub fn connect(
        config: TornadoConfig,
        z: OdriveNode,
        turn: OdriveNode,
        switches: PinPort,
    ) -> Result<Self, FieldError> {
        let (speed, current) = (config.speed_limit as f32, config.current_limit as f32);
        z.set_limits(speed, current)?;
        turn.set_limits(speed, current)?;
        turn.set_axis_state(AxisRequest::Idle)?;
        for switch in &config.end_switches {
            switches.watch(switch.pin)?;
        }
        for pin in &config.reference_pins {
            switches.watch(*pin)?;
        }
        info!(
            axis = %config.name,
            z_node = z.node(),
            turn_node = turn.node(),
            "tornado axis ready"
        );
        Ok(Self {
            state: AxisState::new(config.name.clone(), config.min_position, config.max_position),
            config,
            z,
            turn,
            switches,
            zero_turns: 0.0,
            last_seq: 0,
            awaiting_stop: false,
            homing_seen: false,
        })
    }

    fn direction(&self) -> f64 {
        if self.config.is_z_reversed { -1.0 } else { 1.0 }
    }

    fn to_turns(&self, position: f64) -> f32 {
        let offset = (position - self.state.home_position()) / self.config.m_per_turn;
        self.zero_turns + (offset * self.direction()) as f32
    }

    fn to_position(&self, turns: f32) -> f64 {
        let offset = f64::from(turns - self.zero_turns) * self.direction();
        self.state.home_position() + offset * self.config.m_per_turn
    }

    fn mark_command(&mut self) {
        let heartbeat = self.z.heartbeat().map_or(0, |h| h.seq);
        let encoder = self.z.encoder().map_or(0, |e| e.seq);
        self.last_seq = self.last_seq.max(heartbeat).max(encoder);
    }

    fn hold(&self) -> Result<(), FieldError> {
        let turns = self.z.encoder().map_or(self.to_turns(self.state.position()), |e| e.position);
        self.z.set_input_pos(turns)
    }

    fn check_end_switches(&mut self) -> Result<(), FieldError> {
        if self.state.motion() != AxisMotion::Moving {
            return Ok(());
        }
        let tripped = self
            .config
            .end_switches
            .iter()
            .find(|switch| switch.is_tripped(self.switches.input(switch.pin)))
            .map(|switch| switch.label.clone());
        if let Some(label) = tripped {
            warn!(axis = %self.config.name, switch = %label, "end switch tripped while moving");
            let result = self.hold();
            self.state.fault(&format!("end switch {label}"));
            result?;
        }
        Ok(())
    }
}

impl Axis for TornadoAxis {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn home(&mut self) -> Result<(), FieldError> {
        self.z.set_axis_state(AxisRequest::Homing)?;
        self.mark_command();
        self.awaiting_stop = false;
        self.homing_seen = false;
        self.state.begin_home();
        Ok(())
    }

    fn move_to(&mut self, position: f64) -> Result<(), FieldError> {
        self.state.check_move(position)?;
        self.z.set_input_pos(self.to_turns(position))?;
        self.mark_command();
        self.awaiting_stop = false;
        self.state.begin_move(position);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), FieldError> {
        let result = match self.state.motion() {
            AxisMotion::Homing => self.z.set_axis_state(AxisRequest::Idle),
            AxisMotion::Moving => self.hold(),
            AxisMotion::Unknown | AxisMotion::Referenced | AxisMotion::Fault => Ok(()),
        };
        let turn = self.turn.set_input_vel(0.0);
        self.mark_command();
        self.awaiting_stop = self.state.motion() == AxisMotion::Moving;
        self.state.stop();
        result.and(turn)
    }

    fn is_referenced(&self) -> bool {
        self.state.is_referenced()
    }

    fn current_position(&self) -> f64 {
        self.state.position()
    }

    fn state(&self) -> AxisMotion {
        self.state.motion()
    }

    fn bounds(&self) -> (f64, f64) {
        self.state.bounds()
    }

    fn poll(&mut self) -> Result<(), FieldError> {
        let mut newest = self.last_seq;

        if let Some(heartbeat) = self.z.heartbeat().filter(|h| h.seq > self.last_seq) {
            newest = newest.max(heartbeat.seq);
            if heartbeat.error != 0 {
                self.state.fault(&format!("controller error 0x{:X}", heartbeat.error));
            } else if self.state.motion() == AxisMotion::Homing {
                if heartbeat.is_homing() {
                    self.homing_seen = true;
                } else if heartbeat.is_idle() && self.homing_seen {
                    self.zero_turns = self.z.encoder().map_or(0.0, |e| e.position);
                    self.homing_seen = false;
                    self.state.finish_home();
                    self.z.set_axis_state(AxisRequest::ClosedLoop)?;
                }
            }
        }

        if let Some(encoder) = self.z.encoder().filter(|e| e.seq > self.last_seq) {
            newest = newest.max(encoder.seq);
            match self.state.motion() {
                AxisMotion::Moving => {
                    let target = self.state.target().map(|t| self.to_turns(t));
                    let settled = target.is_some_and(|t| {
                        (encoder.position - t).abs() < POSITION_TOLERANCE_TURNS
                            && encoder.velocity.abs() < VELOCITY_TOLERANCE_TURNS_PER_S
                    });
                    if settled {
                        self.state.finish_move();
                    } else {
                        self.state.track(self.to_position(encoder.position));
                    }
                }
                AxisMotion::Referenced if self.awaiting_stop => {
                    self.state.track(self.to_position(encoder.position));
                    self.awaiting_stop = false;
                }
                _ => {}
            }
        }

        self.last_seq = newest;
        self.check_end_switches()
    }
}
