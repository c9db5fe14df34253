//! [`Robot`] – the assembled robot composite.
//!
//! Owns every module of one profile together with the safety coordinator,
//! the notification bus and the link watchdog.  Callers reach motion modules
//! only through gated handles ([`SafeWheels`], [`SafeAxis`]).
//!
//! Shutdown stops every module exactly once, whichever way it is reached:
//! [`Robot::stop`], [`Robot::shutdown`] or dropping the robot.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use fieldos_bus::{EventBus, Topic, TopicReceiver};
use fieldos_hal::{
    Axis, Bms, EStop, Flashlight, SharedBatteryControl, SharedBms, SharedEStop,
    SharedFlashlight, Wheels,
};
use fieldos_kernel::{KernelGate, SafeAxis, SafeWheels, SafetyCoordinator, Watchdog};
use fieldos_profile::RobotProfile;
use fieldos_types::{Event, EventPayload, FieldError, SafetyState, TelemetryData};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::assembly::{Backend, Modules, SystemLinks, assemble_modules};
use crate::config::RuntimeConfig;

pub const EVENT_SOURCE: &str = "fieldos-runtime::robot";

pub struct Robot {
    profile: String,
    modules: Modules,
    coordinator: SafetyCoordinator,
    gate: KernelGate,
    events: EventBus,
    watchdog: Mutex<Watchdog>,
    stopped: AtomicBool,
}

impl Robot {
    /// Resolve the configured profile and assemble it.
    pub fn assemble(config: &RuntimeConfig) -> Result<Self, FieldError> {
        config.validate()?;
        let profile = match &config.profile_path {
            Some(path) => fieldos_profile::load_file(path)?,
            None => fieldos_profile::resolve(&config.profile)?,
        };
        let backend = if config.simulation {
            Backend::Simulation
        } else {
            Backend::Hardware(Box::new(SystemLinks::from_config(config)))
        };
        Self::assemble_with(&profile, backend, config)
    }

    pub fn assemble_with(
        profile: &RobotProfile,
        backend: Backend,
        config: &RuntimeConfig,
    ) -> Result<Self, FieldError> {
        let simulation = matches!(backend, Backend::Simulation);
        let modules = assemble_modules(profile, backend)?;
        let robot = Self::from_modules(&profile.name, modules, config);
        info!(profile = %profile.name, simulation, "robot assembled");
        Ok(robot)
    }

    /// Wire the safety coordinator and watchdog around assembled modules.
    pub fn from_modules(profile: &str, modules: Modules, config: &RuntimeConfig) -> Self {
        let events = EventBus::default();
        let coordinator = SafetyCoordinator::new(
            modules.estop.clone(),
            modules.bumper.clone(),
            modules.wheels.clone(),
            modules.axes.clone(),
            events.clone(),
            config.speed_caps(),
        );
        let mut watchdog = Watchdog::new();
        if let Some(serial) = &modules.serial {
            watchdog.register(serial.name(), config.link_timeout());
        }
        if let Some(can) = &modules.can {
            watchdog.register(can.name(), config.link_timeout());
        }
        Self {
            profile: profile.to_string(),
            gate: coordinator.gate(),
            modules,
            coordinator,
            events,
            watchdog: Mutex::new(watchdog),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    // ── Modules ───────────────────────────────────────────────────────────

    pub fn wheels(&self) -> Option<SafeWheels> {
        self.modules
            .wheels
            .clone()
            .map(|wheels| SafeWheels::new(wheels, self.gate.clone()))
    }

    pub fn axis(&self, name: &str) -> Option<SafeAxis> {
        self.modules
            .axes
            .iter()
            .find(|axis| axis.lock().name() == name)
            .map(|axis| SafeAxis::new(axis.clone(), self.gate.clone()))
    }

    /// Every axis in assembly order.
    pub fn axes(&self) -> Vec<SafeAxis> {
        self.modules
            .axes
            .iter()
            .map(|axis| SafeAxis::new(axis.clone(), self.gate.clone()))
            .collect()
    }

    pub fn flashlight(&self) -> Option<SharedFlashlight> {
        self.modules.flashlight.clone()
    }

    pub fn bms(&self) -> Option<SharedBms> {
        self.modules.bms.clone()
    }

    pub fn battery_control(&self) -> Option<SharedBatteryControl> {
        self.modules.battery_control.clone()
    }

    pub fn estop(&self) -> SharedEStop {
        self.modules.estop.clone()
    }

    // ── Safety ────────────────────────────────────────────────────────────

    pub fn safety_state(&self) -> SafetyState {
        self.gate.state()
    }

    /// True while any stop, hard or soft, is in effect.
    pub fn is_estop_active(&self) -> bool {
        !self.safety_state().is_armed()
    }

    pub fn is_soft_estop_active(&self) -> bool {
        self.modules.estop.lock().is_soft_estop_active()
    }

    /// Set or clear the software stop; takes effect before returning.
    pub fn set_soft_estop(&self, active: bool) -> Result<SafetyState, FieldError> {
        self.coordinator.set_software_stop(active)
    }

    // ── Events ────────────────────────────────────────────────────────────

    pub fn subscribe(&self, topic: Topic) -> TopicReceiver {
        self.events.subscribe_to(topic)
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    // ── Periodic work ─────────────────────────────────────────────────────

    /// Read the serial link and evaluate every stop source.
    pub fn safety_poll(&self) -> SafetyState {
        if let Some(serial) = &self.modules.serial {
            match serial.poll() {
                Ok(0) => {}
                Ok(_) => self.watchdog.lock().heartbeat(serial.name()),
                Err(e) => self.publish_fault(serial.name(), &e.to_string()),
            }
        }
        self.coordinator.poll()
    }

    /// Read the CAN bus, poll every module, check link health and publish a
    /// telemetry snapshot.
    pub fn status_poll(&self) {
        if let Some(can) = &self.modules.can {
            match can.poll() {
                Ok(0) => {}
                Ok(_) => self.watchdog.lock().heartbeat(can.name()),
                Err(e) => self.publish_fault(can.name(), &e.to_string()),
            }
        }

        let mut results = Vec::new();
        if let Some(wheels) = &self.modules.wheels {
            let mut wheels = wheels.lock();
            results.push((wheels.name().to_string(), wheels.poll()));
        }
        for axis in &self.modules.axes {
            let mut axis = axis.lock();
            results.push((axis.name().to_string(), axis.poll()));
        }
        if let Some(flashlight) = &self.modules.flashlight {
            let mut flashlight = flashlight.lock();
            results.push((flashlight.name().to_string(), flashlight.poll()));
        }
        if let Some(bms) = &self.modules.bms {
            let mut bms = bms.lock();
            results.push((bms.name().to_string(), bms.poll()));
        }
        for (module, result) in results {
            if let Err(e) = result {
                self.publish_fault(&module, &e.to_string());
            }
        }

        let silent = self.watchdog.lock().newly_silent();
        for link in silent {
            self.publish_fault(&link, "no data received within the link timeout");
        }

        self.events.publish_to(
            Topic::Telemetry,
            Event::new(EVENT_SOURCE, EventPayload::Telemetry(self.telemetry())),
        );
    }

    pub fn telemetry(&self) -> TelemetryData {
        let (linear_velocity, angular_velocity) = self
            .modules
            .wheels
            .as_ref()
            .map_or((0.0, 0.0), |wheels| wheels.lock().velocities());
        let axes: BTreeMap<String, f64> = self
            .modules
            .axes
            .iter()
            .map(|axis| {
                let axis = axis.lock();
                (axis.name().to_string(), axis.current_position())
            })
            .collect();
        TelemetryData {
            safety: self.safety_state(),
            linear_velocity,
            angular_velocity,
            axes,
            battery: self.modules.bms.as_ref().and_then(|bms| bms.lock().battery()),
            silent_links: self.watchdog.lock().check_all(),
        }
    }

    fn publish_fault(&self, module: &str, message: &str) {
        warn!(module, message, "module fault");
        self.events.publish_to(
            Topic::Faults,
            Event::new(
                EVENT_SOURCE,
                EventPayload::ModuleFault {
                    module: module.to_string(),
                    message: message.to_string(),
                },
            ),
        );
    }

    // ── Shutdown ──────────────────────────────────────────────────────────

    /// Stop every module and switch the flashlight off.
    pub async fn stop(&self) -> Result<(), FieldError> {
        self.shutdown()
    }

    /// Synchronous form of [`stop`][Self::stop].  Only the first call does
    /// anything.
    pub fn shutdown(&self) -> Result<(), FieldError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!(profile = %self.profile, "already shut down");
            return Ok(());
        }
        info!(profile = %self.profile, "shutting down");
        let stopped = self.coordinator.stop_all();
        let dimmed = match &self.modules.flashlight {
            Some(flashlight) => flashlight.lock().set_intensity(0.0),
            None => Ok(()),
        };
        if let Err(e) = &dimmed {
            error!(error = %e, "could not switch the flashlight off");
        }
        stopped.and(dimmed)
    }
}

impl Drop for Robot {
    fn drop(&mut self) {
        // Errors are logged inside.
        let _ = self.shutdown();
    }
}
