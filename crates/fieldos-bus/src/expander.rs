//! GPIO access on either pin bank of a [`SerialBus`].

use fieldos_types::FieldError;
use tracing::info;

use crate::protocol::{Bank, Command};
use crate::serial::SerialBus;

/// Handle to one pin bank (`core` or `p0`) reached through a serial link.
#[derive(Clone)]
pub struct PinPort {
    bus: SerialBus,
    bank: Bank,
}

impl PinPort {
    pub fn new(bus: SerialBus, bank: Bank) -> Self {
        Self { bus, bank }
    }

    pub fn bank(&self) -> Bank {
        self.bank
    }

    pub fn bus(&self) -> &SerialBus {
        &self.bus
    }

    pub fn output(&self, pin: u8, level: bool) -> Result<(), FieldError> {
        self.bus.send(&Command::Output {
            bank: self.bank,
            pin,
            level,
        })
    }

    /// Drive `pin` with a PWM duty cycle in `[0, 1]`.
    pub fn pwm(&self, pin: u8, duty: f64) -> Result<(), FieldError> {
        self.bus.send(&Command::Pwm {
            bank: self.bank,
            pin,
            duty: duty.clamp(0.0, 1.0),
        })
    }

    /// Ask the controller to report level changes of `pin`.
    pub fn watch(&self, pin: u8) -> Result<(), FieldError> {
        self.bus.send(&Command::Watch {
            bank: self.bank,
            pin,
        })
    }

    /// Last reported level, `None` until the controller has reported the pin.
    pub fn input(&self, pin: u8) -> Option<bool> {
        self.bus.input(self.bank, pin)
    }

    pub fn send(&self, command: &Command) -> Result<(), FieldError> {
        self.bus.send(command)
    }
}

/// The I/O expander controller hanging off the core controller's UART.
#[derive(Clone)]
pub struct Expander {
    port: PinPort,
}

impl Expander {
    /// Boot the expander through its `boot`/`enable` core pins.
    pub fn connect(bus: &SerialBus, boot: u8, enable: u8) -> Result<Self, FieldError> {
        bus.send(&Command::ExpanderSetup { boot, enable })?;
        info!(bus = bus.name(), boot, enable, "expander configured");
        Ok(Self {
            port: PinPort::new(bus.clone(), Bank::Expander),
        })
    }

    pub fn port(&self) -> PinPort {
        self.port.clone()
    }
}
