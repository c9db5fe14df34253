//! Contact bumpers, a hard stop source next to the estop buttons.
//!
//! Bumper inputs are active-high.  As with the buttons, an input that has not
//! been reported yet counts as pressed.

use std::collections::BTreeMap;
use std::sync::Arc;

use fieldos_bus::PinPort;
use fieldos_types::FieldError;
use parking_lot::Mutex;
use tracing::info;

use crate::estop::source_name;

pub trait Bumper: Send {
    fn name(&self) -> &str;

    fn source_states(&self) -> BTreeMap<String, bool>;

    /// Names of the pressed bumpers.
    fn active_bumpers(&self) -> Vec<String> {
        self.source_states()
            .into_iter()
            .filter_map(|(source, active)| active.then_some(source))
            .collect()
    }

    fn poll(&mut self) -> Result<(), FieldError> {
        Ok(())
    }
}

pub type SharedBumper = Arc<Mutex<dyn Bumper>>;

pub fn shared_bumper<B: Bumper + 'static>(bumper: B) -> SharedBumper {
    Arc::new(Mutex::new(bumper))
}

pub struct HardwareBumper {
    name: String,
    port: PinPort,
    pins: BTreeMap<String, u8>,
}

impl HardwareBumper {
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
        info!(bumper = %name, bank = %port.bank(), count = pins.len(), "bumper ready");
        Ok(Self { name, port, pins })
    }
}

impl Bumper for HardwareBumper {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_states(&self) -> BTreeMap<String, bool> {
        self.pins
            .iter()
            .map(|(source, pin)| (source.clone(), self.port.input(*pin).unwrap_or(true)))
            .collect()
    }
}

pub struct SimulatedBumper {
    name: String,
    sources: BTreeMap<String, bool>,
}

impl SimulatedBumper {
    pub fn new<'a>(name: impl Into<String>, keys: impl IntoIterator<Item = &'a str>) -> Self {
        let name = name.into();
        let sources = keys
            .into_iter()
            .map(|key| (source_name(&name, key), false))
            .collect();
        Self { name, sources }
    }

    pub fn set_pressed(&mut self, source: &str, pressed: bool) {
        if let Some(state) = self.sources.get_mut(source) {
            *state = pressed;
        }
    }
}

impl Bumper for SimulatedBumper {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_states(&self) -> BTreeMap<String, bool> {
        self.sources.clone()
    }
}
