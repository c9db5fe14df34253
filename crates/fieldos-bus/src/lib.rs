//! `fieldos-bus` – Physical buses and the notification bus
//!
//! Everything that moves bytes: the serial link to the core controller, the
//! I/O expander behind it, the CAN bus to the motor controllers, and the
//! in-process event bus that carries safety and fault notifications.
//!
//! # Modules
//!
//! - [`serial`] – [`SerialBus`] with its locked writer and report cache.
//! - [`expander`] – Pin banks reached through the serial link.
//! - [`protocol`] – Line protocol commands and reports.
//! - [`can`] – [`CanBus`], [`CanFrame`] and the [`CanAdapter`] seam.
//! - [`transport`] – Byte transports and the in-memory mock.
//! - [`events`] – Topic-based broadcast [`EventBus`].

use thiserror::Error;

pub mod can;
pub mod events;
pub mod expander;
pub mod protocol;
pub mod serial;
#[cfg(target_os = "linux")]
pub mod socket_can;
pub mod transport;

pub use can::{CanAdapter, CanBus, CanFrame, MockCanAdapter};
pub use events::{EventBus, Topic, TopicReceiver};
pub use expander::{Expander, PinPort};
pub use protocol::{Bank, Command, Report, StepperStatus};
pub use serial::{BatteryReport, SerialBus, SerialTransport, StepperReport};
#[cfg(target_os = "linux")]
pub use socket_can::SocketCanAdapter;
pub use transport::{MockTransport, Transport};

/// Low-level failure of a physical bus.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Link closed")]
    Closed,
}
