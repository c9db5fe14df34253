use fieldos_types::{AxisMotion, FieldError};

use super::{Axis, AxisState};

/// In-memory axis.  Reference runs and moves complete on the next poll.
pub struct SimulatedAxis {
    state: AxisState,
    alarm: bool,
}

impl SimulatedAxis {
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            state: AxisState::new(name, min, max),
            alarm: false,
        }
    }

    /// Raise or clear the simulated drive alarm; it is observed on the next
    /// poll.
    pub fn set_alarm(&mut self, active: bool) {
        self.alarm = active;
    }
}

impl Axis for SimulatedAxis {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn home(&mut self) -> Result<(), FieldError> {
        self.state.begin_home();
        Ok(())
    }

    fn move_to(&mut self, position: f64) -> Result<(), FieldError> {
        self.state.check_move(position)?;
        self.state.begin_move(position);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), FieldError> {
        self.state.stop();
        Ok(())
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
        if self.alarm {
            self.state.fault("simulated alarm");
            return Ok(());
        }
        match self.state.motion() {
            AxisMotion::Homing => self.state.finish_home(),
            AxisMotion::Moving => self.state.finish_move(),
            AxisMotion::Unknown | AxisMotion::Referenced | AxisMotion::Fault => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_before_home_fails_and_keeps_position() {
        let mut axis = SimulatedAxis::new("y_axis", -0.12, 0.12);
        assert_eq!(
            axis.move_to(0.05),
            Err(FieldError::NotHomed {
                axis: "y_axis".into()
            })
        );
        assert_eq!(axis.current_position(), 0.0);
        assert_eq!(axis.state(), AxisMotion::Unknown);
    }

    #[test]
    fn home_then_move() {
        let mut axis = SimulatedAxis::new("y_axis", -0.12, 0.12);
        axis.home().unwrap();
        assert_eq!(axis.state(), AxisMotion::Homing);
        assert!(!axis.is_referenced());
        axis.poll().unwrap();
        assert!(axis.is_referenced());

        axis.move_to(0.05).unwrap();
        assert_eq!(axis.state(), AxisMotion::Moving);
        axis.poll().unwrap();
        assert_eq!(axis.state(), AxisMotion::Referenced);
        assert_eq!(axis.current_position(), 0.05);
    }

    #[test]
    fn stop_cancels_pending_move() {
        let mut axis = SimulatedAxis::new("z_axis", -0.197, 0.0);
        axis.home().unwrap();
        axis.poll().unwrap();
        axis.move_to(-0.1).unwrap();
        axis.stop().unwrap();
        axis.poll().unwrap();
        assert_eq!(axis.state(), AxisMotion::Referenced);
        assert_eq!(axis.current_position(), 0.0);
    }

    #[test]
    fn alarm_faults_until_rehomed() {
        let mut axis = SimulatedAxis::new("y_axis", -0.12, 0.12);
        axis.home().unwrap();
        axis.poll().unwrap();
        axis.set_alarm(true);
        axis.poll().unwrap();
        assert_eq!(axis.state(), AxisMotion::Fault);
        assert!(matches!(axis.move_to(0.0), Err(FieldError::AxisFault { .. })));

        // Alarm still present: the new reference run faults again.
        axis.home().unwrap();
        axis.poll().unwrap();
        assert_eq!(axis.state(), AxisMotion::Fault);

        axis.set_alarm(false);
        axis.home().unwrap();
        axis.poll().unwrap();
        assert_eq!(axis.state(), AxisMotion::Referenced);
    }
}
