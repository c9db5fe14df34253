//! [`SafetyCoordinator`] – the safety interlock state machine.
//!
//! ```text
//!            any source on                hard source on
//! ARMED ───────────────────▶ SOFT_STOPPED ───────────────▶ HARD_STOPPED
//!   ▲                              │  ◀── hard source off, soft on ──┘
//!   └──── every source off ────────┘─────────────────────────────────┘
//! ```
//!
//! Each safety poll samples every stop source, latches the derived state in
//! the [`KernelGate`] and, on entering a stopped state, issues `stop()` to the
//! wheels and every axis.  Only after the stop has been propagated is the
//! transition published on [`Topic::Safety`].  Nothing is retried when the
//! robot re-arms.

use std::collections::BTreeMap;

use fieldos_bus::{EventBus, Topic};
use fieldos_hal::{SharedAxis, SharedBumper, SharedEStop, SharedWheels};
use fieldos_types::{Event, EventPayload, FieldError, SafetyState};
use tracing::{error, info, warn};

use crate::kernel_gate::{KernelGate, SpeedCaps};

pub const EVENT_SOURCE: &str = "fieldos-kernel::safety";

pub struct SafetyCoordinator {
    gate: KernelGate,
    estop: SharedEStop,
    wheels: Option<SharedWheels>,
    axes: Vec<SharedAxis>,
    events: EventBus,
}

impl SafetyCoordinator {
    /// The coordinator starts latched `Armed`; the first poll brings it in
    /// line with the sources.
    pub fn new(
        estop: SharedEStop,
        bumper: Option<SharedBumper>,
        wheels: Option<SharedWheels>,
        axes: Vec<SharedAxis>,
        events: EventBus,
        caps: SpeedCaps,
    ) -> Self {
        Self {
            gate: KernelGate::new(estop.clone(), bumper, caps),
            estop,
            wheels,
            axes,
            events,
        }
    }

    pub fn gate(&self) -> KernelGate {
        self.gate.clone()
    }

    /// The state latched by the last poll.
    pub fn state(&self) -> SafetyState {
        self.gate.latched_state()
    }

    /// Sample every stop source and apply the resulting transition.
    pub fn poll(&self) -> SafetyState {
        let sources = self.gate.sources();
        let next = self.gate.live_state();
        self.apply(next, sources)
    }

    /// Set or clear the software stop and evaluate the interlock right away.
    ///
    /// The stop is latched locally even if mirroring it to the controller
    /// fails; the error is returned after the transition has been applied.
    pub fn set_software_stop(&self, active: bool) -> Result<SafetyState, FieldError> {
        let mirrored = self.estop.lock().set_software_stop(active);
        let state = self.poll();
        mirrored.map(|()| state)
    }

    /// Issue `stop()` to the wheels and every axis.  Every module is tried;
    /// the first failure is returned.
    pub fn stop_all(&self) -> Result<(), FieldError> {
        let mut first = None;
        let wheels = self.wheels.iter().map(|wheels| {
            let mut wheels = wheels.lock();
            (wheels.name().to_string(), wheels.stop())
        });
        let axes = self.axes.iter().map(|axis| {
            let mut axis = axis.lock();
            (axis.name().to_string(), axis.stop())
        });
        for (module, result) in wheels.chain(axes) {
            if let Err(e) = result {
                error!(module = %module, error = %e, "stop failed");
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn apply(&self, next: SafetyState, sources: BTreeMap<String, bool>) -> SafetyState {
        let previous = self.gate.latch(next);
        if previous == next {
            return next;
        }
        if next.is_armed() {
            info!(from = %previous, "all stop sources clear, robot armed");
            self.events
                .publish_to(Topic::Safety, Event::new(EVENT_SOURCE, EventPayload::EstopReleased));
        } else {
            let active: Vec<&str> = sources
                .iter()
                .filter(|(_, on)| **on)
                .map(|(source, _)| source.as_str())
                .collect();
            warn!(from = %previous, to = %next, ?active, "stop triggered");
            // Failures are logged per module; the transition stands.
            let _ = self.stop_all();
            self.events.publish_to(
                Topic::Safety,
                Event::new(EVENT_SOURCE, EventPayload::EstopTriggered { state: next, sources }),
            );
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fieldos_hal::{
        Axis, EStop, SimulatedAxis, SimulatedBumper, SimulatedEstop, SimulatedWheels, Wheels,
    };
    use fieldos_types::AxisMotion;
    use parking_lot::Mutex;

    use super::*;

    struct Rig {
        coordinator: SafetyCoordinator,
        estop: Arc<Mutex<SimulatedEstop>>,
        bumper: Arc<Mutex<SimulatedBumper>>,
        wheels: Arc<Mutex<SimulatedWheels>>,
        axis: Arc<Mutex<SimulatedAxis>>,
        events: EventBus,
    }

    fn rig() -> Rig {
        let estop = Arc::new(Mutex::new(SimulatedEstop::new("estop", ["1", "2"])));
        let bumper = Arc::new(Mutex::new(SimulatedBumper::new("bumper", ["front"])));
        let wheels = Arc::new(Mutex::new(SimulatedWheels::new("wheels")));
        let axis = Arc::new(Mutex::new(SimulatedAxis::new("y_axis", -0.12, 0.12)));
        let events = EventBus::default();
        let coordinator = SafetyCoordinator::new(
            estop.clone(),
            Some(bumper.clone()),
            Some(wheels.clone()),
            vec![axis.clone() as SharedAxis],
            events.clone(),
            SpeedCaps::default(),
        );
        Rig {
            coordinator,
            estop,
            bumper,
            wheels,
            axis,
            events,
        }
    }

    #[test]
    fn hard_stop_propagates_before_event() {
        let rig = rig();
        let mut safety = rig.events.subscribe_to(Topic::Safety);
        {
            let mut axis = rig.axis.lock();
            axis.home().unwrap();
            axis.poll().unwrap();
            axis.move_to(0.1).unwrap();
        }
        rig.wheels.lock().drive(0.4, 0.0).unwrap();

        rig.estop.lock().set_source("estop_1", true);
        assert_eq!(rig.coordinator.poll(), SafetyState::HardStopped);

        assert_eq!(rig.wheels.lock().velocities(), (0.0, 0.0));
        assert_eq!(rig.axis.lock().state(), AxisMotion::Referenced);
        let event = safety.try_recv().unwrap();
        match event.payload {
            EventPayload::EstopTriggered { state, sources } => {
                assert_eq!(state, SafetyState::HardStopped);
                assert_eq!(sources.get("estop_1"), Some(&true));
                assert_eq!(sources.get("bumper_front"), Some(&false));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(event.source, EVENT_SOURCE);
    }

    #[test]
    fn unchanged_state_publishes_nothing() {
        let rig = rig();
        let mut safety = rig.events.subscribe_to(Topic::Safety);
        assert_eq!(rig.coordinator.poll(), SafetyState::Armed);
        assert!(safety.try_recv().is_err());
    }

    #[test]
    fn clearing_soft_stop_keeps_hard_stop() {
        let rig = rig();
        rig.coordinator.set_software_stop(true).unwrap();
        assert_eq!(rig.coordinator.state(), SafetyState::SoftStopped);

        rig.bumper.lock().set_pressed("bumper_front", true);
        assert_eq!(rig.coordinator.poll(), SafetyState::HardStopped);

        assert_eq!(
            rig.coordinator.set_software_stop(false).unwrap(),
            SafetyState::HardStopped
        );
        assert!(matches!(
            rig.coordinator.gate().check_motion(),
            Err(FieldError::SafetyInterlock {
                state: SafetyState::HardStopped
            })
        ));

        rig.bumper.lock().set_pressed("bumper_front", false);
        assert_eq!(rig.coordinator.poll(), SafetyState::Armed);
        assert!(rig.coordinator.gate().check_motion().is_ok());
    }

    #[test]
    fn software_stop_is_evaluated_synchronously() {
        let rig = rig();
        rig.wheels.lock().drive(0.4, 0.1).unwrap();
        let mut safety = rig.events.subscribe_to(Topic::Safety);

        assert_eq!(
            rig.coordinator.set_software_stop(true).unwrap(),
            SafetyState::SoftStopped
        );
        assert_eq!(rig.wheels.lock().velocities(), (0.0, 0.0));
        assert!(rig.estop.lock().is_soft_estop_active());
        assert!(safety.try_recv().is_ok());

        assert_eq!(rig.coordinator.set_software_stop(false).unwrap(), SafetyState::Armed);
        assert!(matches!(
            safety.try_recv().map(|e| e.payload),
            Ok(EventPayload::EstopReleased)
        ));
    }

    #[test]
    fn rearming_does_not_resume_motion() {
        let rig = rig();
        rig.wheels.lock().drive(0.4, 0.0).unwrap();
        rig.estop.lock().set_source("estop_2", true);
        rig.coordinator.poll();
        rig.estop.lock().set_source("estop_2", false);
        assert_eq!(rig.coordinator.poll(), SafetyState::Armed);
        assert_eq!(rig.wheels.lock().velocities(), (0.0, 0.0));
    }

    #[test]
    fn stop_all_tries_every_module() {
        let rig = rig();
        rig.wheels.lock().drive(0.2, 0.0).unwrap();
        assert!(rig.coordinator.stop_all().is_ok());
        assert_eq!(rig.wheels.lock().velocities(), (0.0, 0.0));
    }
}
