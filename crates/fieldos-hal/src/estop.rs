//! Emergency stop sources.
//!
//! Each physical button is a hard source named `<module>_<key>`
//! (`estop_1`, `estop_2`, …).  The software stop is the soft source
//! [`SOFT_SOURCE`].  Buttons are wired active-low; an input the controller
//! has not reported yet counts as pressed.

use std::collections::BTreeMap;
use std::sync::Arc;

use fieldos_bus::{Command, PinPort};
use fieldos_types::FieldError;
use parking_lot::Mutex;
use tracing::{info, warn};

pub const SOFT_SOURCE: &str = "soft";

pub trait EStop: Send {
    fn name(&self) -> &str;

    /// Every source with its current state, the soft source included.
    fn source_states(&self) -> BTreeMap<String, bool>;

    fn is_soft_estop_active(&self) -> bool;

    fn set_software_stop(&mut self, active: bool) -> Result<(), FieldError>;

    fn is_active(&self) -> bool {
        self.source_states().values().any(|active| *active)
    }

    /// `true` when any physical source is active.
    fn is_hard_active(&self) -> bool {
        self.source_states()
            .iter()
            .any(|(source, active)| *active && source != SOFT_SOURCE)
    }

    fn poll(&mut self) -> Result<(), FieldError> {
        Ok(())
    }
}

pub type SharedEStop = Arc<Mutex<dyn EStop>>;

pub fn shared_estop<E: EStop + 'static>(estop: E) -> SharedEStop {
    Arc::new(Mutex::new(estop))
}

/// Source name for the input keyed `key` of module `module`.
pub fn source_name(module: &str, key: &str) -> String {
    format!("{module}_{key}")
}

pub struct HardwareEstop {
    name: String,
    port: PinPort,
    /// Source name → input pin.
    pins: BTreeMap<String, u8>,
    soft: bool,
}

impl HardwareEstop {
    /// Watch every button input.  `pins` maps keys such as `"1"` to pins.
    pub fn connect(
        name: impl Into<String>,
        port: PinPort,
        pins: &BTreeMap<String, u8>,
    ) -> Result<Self, FieldError> {
        let name = name.into();
        let pins: BTreeMap<String, u8> = pins
            .iter()
            .map(|(key, pin)| (source_name(&name, key), *pin))
            .collect();
        for pin in pins.values() {
            port.watch(*pin)?;
        }
        info!(estop = %name, bank = %port.bank(), sources = ?pins.keys().collect::<Vec<_>>(), "estop ready");
        Ok(Self {
            name,
            port,
            pins,
            soft: false,
        })
    }
}

impl EStop for HardwareEstop {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_states(&self) -> BTreeMap<String, bool> {
        let mut states: BTreeMap<String, bool> = self
            .pins
            .iter()
            .map(|(source, pin)| (source.clone(), self.port.input(*pin).is_none_or(|level| !level)))
            .collect();
        states.insert(SOFT_SOURCE.to_string(), self.soft);
        states
    }

    fn is_soft_estop_active(&self) -> bool {
        self.soft
    }

    /// Latches locally first, then mirrors the flag to the core controller.
    fn set_software_stop(&mut self, active: bool) -> Result<(), FieldError> {
        self.soft = active;
        self.port.send(&Command::SoftStop { active }).inspect_err(|e| {
            warn!(estop = %self.name, error = %e, "could not mirror soft stop to controller");
        })
    }
}

pub struct SimulatedEstop {
    name: String,
    sources: BTreeMap<String, bool>,
    soft: bool,
}

impl SimulatedEstop {
    pub fn new<'a>(name: impl Into<String>, keys: impl IntoIterator<Item = &'a str>) -> Self {
        let name = name.into();
        let sources = keys
            .into_iter()
            .map(|key| (source_name(&name, key), false))
            .collect();
        Self {
            name,
            sources,
            soft: false,
        }
    }

    /// Press or release a simulated button; unknown sources are ignored.
    pub fn set_source(&mut self, source: &str, active: bool) {
        match self.sources.get_mut(source) {
            Some(state) => *state = active,
            None => warn!(estop = %self.name, source, "no such estop source"),
        }
    }
}

impl EStop for SimulatedEstop {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_states(&self) -> BTreeMap<String, bool> {
        let mut states = self.sources.clone();
        states.insert(SOFT_SOURCE.to_string(), self.soft);
        states
    }

    fn is_soft_estop_active(&self) -> bool {
        self.soft
    }

    fn set_software_stop(&mut self, active: bool) -> Result<(), FieldError> {
        self.soft = active;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use fieldos_bus::{MockTransport, SerialBus};

    use super::*;

    fn pins() -> BTreeMap<String, u8> {
        BTreeMap::from([("1".to_string(), 34), ("2".to_string(), 35)])
    }

    fn hardware() -> (HardwareEstop, SerialBus, MockTransport) {
        let mock = MockTransport::new();
        let bus = SerialBus::new("serial", Box::new(mock.clone()));
        let estop = HardwareEstop::connect("estop", bus.core_port(), &pins()).unwrap();
        (estop, bus, mock)
    }

    #[test]
    fn connect_watches_buttons() {
        let (_estop, _bus, mock) = hardware();
        assert_eq!(mock.written_lines(), vec!["core.watch 34", "core.watch 35"]);
    }

    #[test]
    fn unreported_inputs_count_as_active() {
        let (estop, bus, mock) = hardware();
        assert!(estop.is_active());
        assert!(estop.is_hard_active());

        mock.inject_line("core.in 34 1");
        bus.poll().unwrap();
        assert_eq!(estop.source_states().get("estop_1"), Some(&false));
        assert_eq!(estop.source_states().get("estop_2"), Some(&true));

        mock.inject_line("core.in 35 1");
        bus.poll().unwrap();
        assert!(!estop.is_active());
    }

    #[test]
    fn low_level_is_pressed() {
        let (estop, bus, mock) = hardware();
        mock.inject_line("core.in 34 1");
        mock.inject_line("core.in 35 0");
        bus.poll().unwrap();
        assert!(estop.is_hard_active());
        assert_eq!(estop.source_states().get("estop_2"), Some(&true));
    }

    #[test]
    fn software_stop_is_mirrored() {
        let (mut estop, bus, mock) = hardware();
        mock.inject_line("core.in 34 1");
        mock.inject_line("core.in 35 1");
        bus.poll().unwrap();
        mock.take_written_lines();

        estop.set_software_stop(true).unwrap();
        assert_eq!(mock.take_written_lines(), vec!["core.softstop 1"]);
        assert!(estop.is_active());
        assert!(estop.is_soft_estop_active());
        assert!(!estop.is_hard_active());
    }

    #[test]
    fn soft_stop_latches_even_if_mirroring_fails() {
        let (mut estop, _bus, mock) = hardware();
        mock.set_fail_writes(true);
        assert!(estop.set_software_stop(true).is_err());
        assert!(estop.is_soft_estop_active());
    }

    #[test]
    fn simulation_sources() {
        let mut estop = SimulatedEstop::new("estop", ["1", "2"]);
        assert!(!estop.is_active());
        assert_eq!(estop.source_states().len(), 3);

        estop.set_source("estop_2", true);
        assert!(estop.is_hard_active());
        estop.set_source("estop_2", false);
        estop.set_software_stop(true).unwrap();
        assert!(estop.is_active());
        assert!(!estop.is_hard_active());
    }
}
