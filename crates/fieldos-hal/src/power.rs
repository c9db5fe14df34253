//! Battery management and the battery relay control board.

use std::sync::Arc;

use fieldos_bus::{Command, PinPort};
use fieldos_types::{BatteryState, FieldError};
use parking_lot::Mutex;
use tracing::info;

pub trait Bms: Send {
    fn name(&self) -> &str;

    /// Latest battery snapshot, `None` until the BMS has reported.
    fn battery(&self) -> Option<BatteryState>;

    fn poll(&mut self) -> Result<(), FieldError> {
        Ok(())
    }
}

pub type SharedBms = Arc<Mutex<dyn Bms>>;

pub fn shared_bms<B: Bms + 'static>(bms: B) -> SharedBms {
    Arc::new(Mutex::new(bms))
}

/// UART settings of the BMS link on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BmsLink {
    pub rx_pin: u8,
    pub tx_pin: u8,
    pub baud: u32,
    pub num: u8,
}

pub struct HardwareBms {
    name: String,
    port: PinPort,
}

impl HardwareBms {
    pub fn connect(name: impl Into<String>, port: PinPort, link: BmsLink) -> Result<Self, FieldError> {
        let name = name.into();
        port.send(&Command::BmsSetup {
            bank: port.bank(),
            rx: link.rx_pin,
            tx: link.tx_pin,
            baud: link.baud,
            num: link.num,
        })?;
        info!(bms = %name, bank = %port.bank(), baud = link.baud, "bms ready");
        Ok(Self { name, port })
    }
}

impl Bms for HardwareBms {
    fn name(&self) -> &str {
        &self.name
    }

    fn battery(&self) -> Option<BatteryState> {
        self.port.bus().battery(self.port.bank()).map(|report| BatteryState {
            percent: report.percent,
            voltage: report.voltage,
            is_charging: report.charging,
        })
    }
}

pub struct SimulatedBms {
    name: String,
    state: BatteryState,
}

impl SimulatedBms {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: BatteryState {
                percent: 100.0,
                voltage: 25.2,
                is_charging: false,
            },
        }
    }

    pub fn set_battery(&mut self, state: BatteryState) {
        self.state = state;
    }
}

impl Bms for SimulatedBms {
    fn name(&self) -> &str {
        &self.name
    }

    fn battery(&self) -> Option<BatteryState> {
        Some(self.state)
    }
}

pub trait BatteryControl: Send {
    fn name(&self) -> &str;

    /// Pulse the reset line so the battery relays close again after a cut-off.
    fn release_relays(&mut self) -> Result<(), FieldError>;

    /// Level of the status line, `None` until reported.
    fn status(&self) -> Option<bool>;
}

pub type SharedBatteryControl = Arc<Mutex<dyn BatteryControl>>;

pub fn shared_battery_control<B: BatteryControl + 'static>(control: B) -> SharedBatteryControl {
    Arc::new(Mutex::new(control))
}

pub struct HardwareBatteryControl {
    name: String,
    port: PinPort,
    reset_pin: u8,
    status_pin: u8,
}

impl HardwareBatteryControl {
    pub fn connect(
        name: impl Into<String>,
        port: PinPort,
        reset_pin: u8,
        status_pin: u8,
    ) -> Result<Self, FieldError> {
        let name = name.into();
        port.output(reset_pin, false)?;
        port.watch(status_pin)?;
        info!(battery_control = %name, bank = %port.bank(), reset_pin, status_pin, "battery control ready");
        Ok(Self {
            name,
            port,
            reset_pin,
            status_pin,
        })
    }
}

impl BatteryControl for HardwareBatteryControl {
    fn name(&self) -> &str {
        &self.name
    }

    fn release_relays(&mut self) -> Result<(), FieldError> {
        info!(battery_control = %self.name, "releasing battery relays");
        self.port.output(self.reset_pin, true)?;
        self.port.output(self.reset_pin, false)
    }

    fn status(&self) -> Option<bool> {
        self.port.input(self.status_pin)
    }
}

pub struct SimulatedBatteryControl {
    name: String,
    releases: usize,
}

impl SimulatedBatteryControl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            releases: 0,
        }
    }

    pub fn releases(&self) -> usize {
        self.releases
    }
}

impl BatteryControl for SimulatedBatteryControl {
    fn name(&self) -> &str {
        &self.name
    }

    fn release_relays(&mut self) -> Result<(), FieldError> {
        self.releases += 1;
        Ok(())
    }

    fn status(&self) -> Option<bool> {
        Some(true)
    }
}
