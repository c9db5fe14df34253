//! [`KernelGate`] – the motion gate between callers and the capability modules.
//!
//! Every motion command (`Wheels::drive`, `Axis::home`, `Axis::move_to`)
//! passes through [`KernelGate::check_motion`].  The gate enforces **two
//! independent checks** in order:
//!
//! 1. **Interlock**: the command is refused with
//!    [`FieldError::SafetyInterlock`] unless both the live stop sources and
//!    the state latched by the last safety poll are `Armed`.  A stop condition
//!    therefore blocks commands immediately, while re-arming waits for a
//!    safety poll.
//! 2. **Speed caps** ([`SpeedCaps`]): drive requests above the configured
//!    caps are refused with [`FieldError::InvalidCommand`].
//!
//! Stop commands are never gated.
//!
//! [`SafeWheels`] and [`SafeAxis`] wrap shared modules so that callers cannot
//! bypass the gate.  Both check the gate while holding the module lock: a
//! safety poll that latches a stop in between has to wait for the lock, and
//! its `stop()` lands after the command.

use std::collections::BTreeMap;
use std::sync::Arc;

use fieldos_hal::{Axis, SharedAxis, SharedBumper, SharedEStop, SharedWheels, Wheels};
use fieldos_types::{AxisMotion, FieldError, SafetyState};
use parking_lot::RwLock;
use tracing::debug;

/// Optional drive speed limits, absolute values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeedCaps {
    pub max_linear: Option<f64>,
    pub max_angular: Option<f64>,
}

impl SpeedCaps {
    fn check(&self, component: &str, linear: f64, angular: f64) -> Result<(), FieldError> {
        if let Some(max) = self.max_linear.filter(|max| linear.abs() > *max) {
            return Err(FieldError::invalid_command(
                component,
                format!("linear velocity {linear} exceeds cap {max}"),
            ));
        }
        if let Some(max) = self.max_angular.filter(|max| angular.abs() > *max) {
            return Err(FieldError::invalid_command(
                component,
                format!("angular velocity {angular} exceeds cap {max}"),
            ));
        }
        Ok(())
    }
}

fn severity(state: SafetyState) -> u8 {
    match state {
        SafetyState::Armed => 0,
        SafetyState::SoftStopped => 1,
        SafetyState::HardStopped => 2,
    }
}

/// Cheap to clone; clones share the latched state.
#[derive(Clone)]
pub struct KernelGate {
    estop: SharedEStop,
    bumper: Option<SharedBumper>,
    latched: Arc<RwLock<SafetyState>>,
    caps: SpeedCaps,
}

impl KernelGate {
    pub fn new(estop: SharedEStop, bumper: Option<SharedBumper>, caps: SpeedCaps) -> Self {
        Self {
            estop,
            bumper,
            latched: Arc::new(RwLock::new(SafetyState::Armed)),
            caps,
        }
    }

    /// Every stop source, estop and bumper, with its current state.
    pub fn sources(&self) -> BTreeMap<String, bool> {
        let mut sources = self.estop.lock().source_states();
        if let Some(bumper) = &self.bumper {
            sources.extend(bumper.lock().source_states());
        }
        sources
    }

    /// State derived from the stop sources right now.
    pub fn live_state(&self) -> SafetyState {
        let (hard, soft) = {
            let estop = self.estop.lock();
            (estop.is_hard_active(), estop.is_soft_estop_active())
        };
        let bumped = self
            .bumper
            .as_ref()
            .is_some_and(|bumper| !bumper.lock().active_bumpers().is_empty());
        SafetyState::from_sources(hard || bumped, soft)
    }

    /// State observed by the last safety poll.
    pub fn latched_state(&self) -> SafetyState {
        *self.latched.read()
    }

    /// Store `state`, returning the previous latched state.
    pub(crate) fn latch(&self, state: SafetyState) -> SafetyState {
        std::mem::replace(&mut *self.latched.write(), state)
    }

    /// The more severe of the live and the latched state.
    pub fn state(&self) -> SafetyState {
        let live = self.live_state();
        let latched = self.latched_state();
        if severity(live) >= severity(latched) { live } else { latched }
    }

    pub fn check_motion(&self) -> Result<(), FieldError> {
        match self.state() {
            SafetyState::Armed => Ok(()),
            state => {
                debug!(%state, "motion refused");
                Err(FieldError::SafetyInterlock { state })
            }
        }
    }

    pub fn check_drive(&self, component: &str, linear: f64, angular: f64) -> Result<(), FieldError> {
        self.check_motion()?;
        self.caps.check(component, linear, angular)
    }
}

/// Wheels whose `drive` goes through the gate.
pub struct SafeWheels {
    name: String,
    wheels: SharedWheels,
    gate: KernelGate,
}

impl SafeWheels {
    pub fn new(wheels: SharedWheels, gate: KernelGate) -> Self {
        let name = wheels.lock().name().to_string();
        Self { name, wheels, gate }
    }
}

impl Wheels for SafeWheels {
    fn name(&self) -> &str {
        &self.name
    }

    fn drive(&mut self, linear: f64, angular: f64) -> Result<(), FieldError> {
        let mut wheels = self.wheels.lock();
        self.gate.check_drive(&self.name, linear, angular)?;
        wheels.drive(linear, angular)
    }

    fn stop(&mut self) -> Result<(), FieldError> {
        self.wheels.lock().stop()
    }

    fn velocities(&self) -> (f64, f64) {
        self.wheels.lock().velocities()
    }

    fn poll(&mut self) -> Result<(), FieldError> {
        self.wheels.lock().poll()
    }
}

/// Axis whose `home` and `move_to` go through the gate.
pub struct SafeAxis {
    name: String,
    axis: SharedAxis,
    gate: KernelGate,
}

impl SafeAxis {
    pub fn new(axis: SharedAxis, gate: KernelGate) -> Self {
        let name = axis.lock().name().to_string();
        Self { name, axis, gate }
    }
}

impl Axis for SafeAxis {
    fn name(&self) -> &str {
        &self.name
    }

    fn home(&mut self) -> Result<(), FieldError> {
        let mut axis = self.axis.lock();
        self.gate.check_motion()?;
        axis.home()
    }

    fn move_to(&mut self, position: f64) -> Result<(), FieldError> {
        let mut axis = self.axis.lock();
        self.gate.check_motion()?;
        axis.move_to(position)
    }

    fn stop(&mut self) -> Result<(), FieldError> {
        self.axis.lock().stop()
    }

    fn is_referenced(&self) -> bool {
        self.axis.lock().is_referenced()
    }

    fn current_position(&self) -> f64 {
        self.axis.lock().current_position()
    }

    fn state(&self) -> AxisMotion {
        self.axis.lock().state()
    }

    fn bounds(&self) -> (f64, f64) {
        self.axis.lock().bounds()
    }

    fn poll(&mut self) -> Result<(), FieldError> {
        self.axis.lock().poll()
    }
}

#[cfg(test)]
mod tests {
    use fieldos_hal::{
        EStop, SimulatedAxis, SimulatedBumper, SimulatedEstop, SimulatedWheels, shared, shared_estop,
        shared_wheels,
    };

    use super::*;

    fn gate(caps: SpeedCaps) -> (KernelGate, Arc<parking_lot::Mutex<SimulatedEstop>>) {
        let estop = Arc::new(parking_lot::Mutex::new(SimulatedEstop::new("estop", ["1"])));
        let handle: SharedEStop = estop.clone();
        (KernelGate::new(handle, None, caps), estop)
    }

    #[test]
    fn armed_gate_passes_motion() {
        let (gate, _estop) = gate(SpeedCaps::default());
        assert_eq!(gate.state(), SafetyState::Armed);
        assert!(gate.check_motion().is_ok());
    }

    #[test]
    fn live_stop_blocks_before_any_poll() {
        let (gate, estop) = gate(SpeedCaps::default());
        estop.lock().set_source("estop_1", true);
        assert_eq!(gate.latched_state(), SafetyState::Armed);
        assert_eq!(
            gate.check_motion(),
            Err(FieldError::SafetyInterlock {
                state: SafetyState::HardStopped
            })
        );
    }

    #[test]
    fn latched_stop_blocks_until_rearmed() {
        let (gate, _estop) = gate(SpeedCaps::default());
        gate.latch(SafetyState::SoftStopped);
        assert!(matches!(
            gate.check_motion(),
            Err(FieldError::SafetyInterlock {
                state: SafetyState::SoftStopped
            })
        ));
        assert_eq!(gate.latch(SafetyState::Armed), SafetyState::SoftStopped);
        assert!(gate.check_motion().is_ok());
    }

    #[test]
    fn hard_source_outranks_soft() {
        let (gate, estop) = gate(SpeedCaps::default());
        estop.lock().set_software_stop(true).unwrap();
        assert_eq!(gate.live_state(), SafetyState::SoftStopped);
        estop.lock().set_source("estop_1", true);
        assert_eq!(gate.live_state(), SafetyState::HardStopped);
    }

    #[test]
    fn bumper_is_a_hard_source() {
        let estop = shared_estop(SimulatedEstop::new("estop", ["1"]));
        let bumper = Arc::new(parking_lot::Mutex::new(SimulatedBumper::new("bumper", ["back"])));
        let handle: SharedBumper = bumper.clone();
        let gate = KernelGate::new(estop, Some(handle), SpeedCaps::default());
        assert_eq!(gate.sources().len(), 3);

        bumper.lock().set_pressed("bumper_back", true);
        assert_eq!(gate.live_state(), SafetyState::HardStopped);
        assert_eq!(gate.sources().get("bumper_back"), Some(&true));
    }

    #[test]
    fn speed_caps_reject_fast_drive() {
        let caps = SpeedCaps {
            max_linear: Some(1.0),
            max_angular: Some(0.5),
        };
        let (gate, _estop) = gate(caps);
        assert!(gate.check_drive("wheels", 0.8, -0.5).is_ok());
        assert!(matches!(
            gate.check_drive("wheels", -1.2, 0.0),
            Err(FieldError::InvalidCommand { .. })
        ));
        assert!(matches!(
            gate.check_drive("wheels", 0.0, 0.6),
            Err(FieldError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn safe_modules_refuse_motion_but_stop() {
        let (gate, estop) = gate(SpeedCaps::default());
        let wheels = shared_wheels(SimulatedWheels::new("wheels"));
        let axis = shared(SimulatedAxis::new("y_axis", -0.12, 0.12));
        let mut safe_wheels = SafeWheels::new(wheels.clone(), gate.clone());
        let mut safe_axis = SafeAxis::new(axis.clone(), gate.clone());

        safe_wheels.drive(0.3, 0.0).unwrap();
        safe_axis.home().unwrap();
        safe_axis.poll().unwrap();

        estop.lock().set_software_stop(true).unwrap();
        assert!(matches!(
            safe_wheels.drive(0.3, 0.0),
            Err(FieldError::SafetyInterlock { .. })
        ));
        assert!(matches!(
            safe_axis.move_to(0.05),
            Err(FieldError::SafetyInterlock { .. })
        ));
        assert!(matches!(safe_axis.home(), Err(FieldError::SafetyInterlock { .. })));
        safe_wheels.stop().unwrap();
        assert_eq!(wheels.lock().velocities(), (0.0, 0.0));
        assert_eq!(safe_axis.name(), "y_axis");
        assert!(safe_axis.is_referenced());
    }
}
