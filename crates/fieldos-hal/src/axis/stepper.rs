use fieldos_bus::{Command, PinPort, StepperStatus};
use fieldos_types::{AxisMotion, FieldError};
use tracing::{debug, info, warn};

use super::{Axis, AxisState};

/// An idle report this close to the commanded step count completes a move.
const ARRIVAL_TOLERANCE_STEPS: i64 = 1;

/// A limit switch that stops the axis when it trips during a move.
#[derive(Debug, Clone, PartialEq)]
pub struct EndSwitch {
    pub label: String,
    pub pin: u8,
    /// The switch reads low while tripped.
    pub inverted: bool,
}

impl EndSwitch {
    pub fn new(label: impl Into<String>, pin: u8, inverted: bool) -> Self {
        Self {
            label: label.into(),
            pin,
            inverted,
        }
    }

    pub(crate) fn is_tripped(&self, level: Option<bool>) -> bool {
        level.is_some_and(|level| level != self.inverted)
    }
}

/// Wiring and kinematics of a stepper-driven axis.
#[derive(Debug, Clone, PartialEq)]
pub struct StepperConfig {
    pub name: String,
    pub step_pin: u8,
    pub dir_pin: u8,
    pub alarm_pin: u8,
    pub ccw: bool,
    /// Steps per second for moves and reference runs.
    pub speed: u32,
    pub steps_per_m: f64,
    pub min_position: f64,
    pub max_position: f64,
    pub end_switches: Vec<EndSwitch>,
    /// Reference switches; used by the controller during reference runs.
    pub reference_pins: Vec<u8>,
}

/// Stepper axis driven through the line protocol.
pub struct StepperAxis {
    state: AxisState,
    config: StepperConfig,
    motor: PinPort,
    switches: PinPort,
    last_seq: u64,
    awaiting_stop: bool,
    /// Step count of the pending move.
    target_steps: Option<i64>,
    /// A `moving` report arrived since the pending move was commanded.
    progress_seen: bool,
}

impl StepperAxis {
    /// Register the stepper with its controller and watch its switches.
    pub fn connect(config: StepperConfig, motor: PinPort, switches: PinPort) -> Result<Self, FieldError> {
        motor.send(&Command::StepperSetup {
            bank: motor.bank(),
            name: config.name.clone(),
            step: config.step_pin,
            dir: config.dir_pin,
            alarm: config.alarm_pin,
            ccw: config.ccw,
        })?;
        for switch in &config.end_switches {
            switches.watch(switch.pin)?;
        }
        for pin in &config.reference_pins {
            switches.watch(*pin)?;
        }
        info!(
            axis = %config.name,
            motor = %motor.bank(),
            switches = %switches.bank(),
            steps_per_m = config.steps_per_m,
            "stepper axis ready"
        );

        let last_seq = motor.bus().stepper(&config.name).map_or(0, |r| r.seq);
        Ok(Self {
            state: AxisState::new(config.name.clone(), config.min_position, config.max_position),
            config,
            motor,
            switches,
            last_seq,
            awaiting_stop: false,
            target_steps: None,
            progress_seen: false,
        })
    }

    fn mark_command(&mut self) {
        self.last_seq = self
            .motor
            .bus()
            .stepper(&self.config.name)
            .map_or(self.last_seq, |r| r.seq);
    }

    /// Whether an idle report ends the pending move.  Idle reports sent
    /// before the controller read the move command carry the old step count.
    fn has_arrived(&self, steps: i64) -> bool {
        self.progress_seen
            || self
                .target_steps
                .is_some_and(|target| (steps - target).abs() <= ARRIVAL_TOLERANCE_STEPS)
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
            let result = self.motor.send(&Command::StepperStop {
                bank: self.motor.bank(),
                name: self.config.name.clone(),
            });
            self.state.fault(&format!("end switch {label}"));
            result?;
        }
        Ok(())
    }
}

impl Axis for StepperAxis {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn home(&mut self) -> Result<(), FieldError> {
        self.motor.send(&Command::StepperHome {
            bank: self.motor.bank(),
            name: self.config.name.clone(),
            speed: self.config.speed,
        })?;
        self.mark_command();
        self.awaiting_stop = false;
        self.state.begin_home();
        Ok(())
    }

    fn move_to(&mut self, position: f64) -> Result<(), FieldError> {
        self.state.check_move(position)?;
        let steps = (position * self.config.steps_per_m).round() as i64;
        self.motor.send(&Command::StepperMove {
            bank: self.motor.bank(),
            name: self.config.name.clone(),
            steps,
            speed: self.config.speed,
        })?;
        self.mark_command();
        self.awaiting_stop = false;
        self.target_steps = Some(steps);
        self.progress_seen = false;
        self.state.begin_move(position);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), FieldError> {
        let result = self.motor.send(&Command::StepperStop {
            bank: self.motor.bank(),
            name: self.config.name.clone(),
        });
        self.mark_command();
        self.awaiting_stop = true;
        self.target_steps = None;
        self.state.stop();
        result
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
        if let Some(report) = self.motor.bus().stepper(&self.config.name) {
            if report.seq > self.last_seq {
                self.last_seq = report.seq;
                let position = report.steps as f64 / self.config.steps_per_m;
                match (report.status, self.state.motion()) {
                    (StepperStatus::Alarm, _) => self.state.fault("drive alarm"),
                    (StepperStatus::Idle, AxisMotion::Homing) => self.state.finish_home(),
                    (StepperStatus::Idle, AxisMotion::Moving) => {
                        if self.has_arrived(report.steps) {
                            self.state.finish_move_at(position);
                            self.target_steps = None;
                        } else {
                            debug!(axis = %self.config.name, steps = report.steps, "idle report predates move");
                        }
                    }
                    (StepperStatus::Idle, AxisMotion::Referenced) if self.awaiting_stop => {
                        self.state.track(position);
                        self.awaiting_stop = false;
                    }
                    (StepperStatus::Moving, AxisMotion::Moving) => {
                        self.progress_seen = true;
                        self.state.track(position);
                    }
                    _ => {}
                }
            }
        }
        self.check_end_switches()
    }
}
