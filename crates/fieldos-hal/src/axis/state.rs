//! Backend-independent axis bookkeeping.
//!
//! Both backends drive the same [`AxisState`] through the same transitions,
//! so a command sequence yields identical states and errors whether the axis
//! is simulated or wired to a real drive.

use fieldos_types::{AxisMotion, FieldError, ensure_finite};
use tracing::{debug, warn};

/// Position estimate, motion state and travel bounds of one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisState {
    name: String,
    motion: AxisMotion,
    position: f64,
    target: Option<f64>,
    min: f64,
    max: f64,
}

impl AxisState {
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            motion: AxisMotion::Unknown,
            position: 0.0,
            target: None,
            min,
            max,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn motion(&self) -> AxisMotion {
        self.motion
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn target(&self) -> Option<f64> {
        self.target
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    pub fn is_referenced(&self) -> bool {
        matches!(self.motion, AxisMotion::Referenced | AxisMotion::Moving)
    }

    /// Where a finished reference run leaves the axis.
    pub fn home_position(&self) -> f64 {
        0.0_f64.clamp(self.min, self.max)
    }

    /// Validate a move request without changing anything.
    ///
    /// Checked in order: fault, reference, finiteness, bounds.
    pub fn check_move(&self, target: f64) -> Result<(), FieldError> {
        if self.motion == AxisMotion::Fault {
            return Err(FieldError::AxisFault {
                axis: self.name.clone(),
            });
        }
        if !self.is_referenced() {
            return Err(FieldError::NotHomed {
                axis: self.name.clone(),
            });
        }
        ensure_finite(&self.name, "target", target)?;
        if target < self.min || target > self.max {
            return Err(FieldError::OutOfRange {
                axis: self.name.clone(),
                target,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    pub fn begin_move(&mut self, target: f64) {
        debug!(axis = %self.name, target, "move started");
        self.motion = AxisMotion::Moving;
        self.target = Some(target);
    }

    /// Start a reference run.  A fault is cleared; the axis is unreferenced
    /// until the run completes.
    pub fn begin_home(&mut self) {
        if self.motion == AxisMotion::Fault {
            debug!(axis = %self.name, "fault cleared by reference run");
        }
        self.motion = AxisMotion::Homing;
        self.target = None;
    }

    pub fn finish_home(&mut self) {
        self.position = self.home_position();
        self.motion = AxisMotion::Referenced;
        debug!(axis = %self.name, position = self.position, "referenced");
    }

    /// Complete the pending move at its commanded target.
    pub fn finish_move(&mut self) {
        if let Some(target) = self.target.take() {
            self.position = target;
        }
        self.motion = AxisMotion::Referenced;
    }

    /// Complete the pending move at a measured position.
    pub fn finish_move_at(&mut self, position: f64) {
        self.track(position);
        self.target = None;
        self.motion = AxisMotion::Referenced;
    }

    /// Update the position estimate while travelling.
    pub fn track(&mut self, position: f64) {
        if position.is_finite() {
            self.position = position;
        }
    }

    /// `Moving` becomes `Referenced`; an interrupted reference run leaves the
    /// axis `Unknown`.  `Fault` is kept.
    pub fn stop(&mut self) {
        match self.motion {
            AxisMotion::Moving => self.motion = AxisMotion::Referenced,
            AxisMotion::Homing => self.motion = AxisMotion::Unknown,
            AxisMotion::Unknown | AxisMotion::Referenced | AxisMotion::Fault => {}
        }
        self.target = None;
    }

    /// Latch a drive alarm.  The axis loses its reference.
    pub fn fault(&mut self, reason: &str) {
        if self.motion != AxisMotion::Fault {
            warn!(axis = %self.name, reason, "axis fault");
        }
        self.motion = AxisMotion::Fault;
        self.target = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn referenced() -> AxisState {
        let mut state = AxisState::new("y_axis", -0.12, 0.12);
        state.begin_home();
        state.finish_home();
        state
    }

    #[test]
    fn new_axis_is_unknown_and_rejects_moves() {
        let state = AxisState::new("y_axis", -0.12, 0.12);
        assert_eq!(state.motion(), AxisMotion::Unknown);
        assert_eq!(
            state.check_move(0.05),
            Err(FieldError::NotHomed {
                axis: "y_axis".into()
            })
        );
    }

    #[test]
    fn home_position_is_clamped_into_bounds() {
        let state = AxisState::new("z_axis", -0.197, 0.0);
        assert_eq!(state.home_position(), 0.0);
        let state = AxisState::new("lift", 0.1, 0.3);
        assert_eq!(state.home_position(), 0.1);
    }

    #[test]
    fn move_cycle() {
        let mut state = referenced();
        state.check_move(0.05).unwrap();
        state.begin_move(0.05);
        assert!(state.is_referenced());
        state.finish_move();
        assert_eq!(state.motion(), AxisMotion::Referenced);
        assert_eq!(state.position(), 0.05);
    }

    #[test]
    fn bounds_are_inclusive() {
        let state = referenced();
        assert!(state.check_move(0.12).is_ok());
        assert!(state.check_move(-0.12).is_ok());
        assert!(matches!(
            state.check_move(0.2),
            Err(FieldError::OutOfRange { .. })
        ));
        assert!(matches!(
            state.check_move(f64::NAN),
            Err(FieldError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn fault_takes_precedence_and_drops_reference() {
        let mut state = referenced();
        state.fault("alarm");
        assert!(!state.is_referenced());
        assert_eq!(
            state.check_move(0.0),
            Err(FieldError::AxisFault {
                axis: "y_axis".into()
            })
        );
        state.stop();
        assert_eq!(state.motion(), AxisMotion::Fault);
        state.begin_home();
        assert_eq!(state.motion(), AxisMotion::Homing);
    }

    #[test]
    fn stop_transitions() {
        let mut state = referenced();
        state.begin_move(0.1);
        state.stop();
        assert_eq!(state.motion(), AxisMotion::Referenced);
        assert_eq!(state.position(), 0.0);
        assert_eq!(state.target(), None);

        let mut state = AxisState::new("y_axis", -0.12, 0.12);
        state.stop();
        assert_eq!(state.motion(), AxisMotion::Unknown);
        state.begin_home();
        state.stop();
        assert_eq!(state.motion(), AxisMotion::Unknown);
    }
}
