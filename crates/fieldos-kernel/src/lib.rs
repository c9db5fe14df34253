//! `fieldos-kernel` – Safety interlock
//!
//! The kernel does not decide what the robot does; it decides whether a
//! requested motion is permitted and makes sure it is aborted when a stop
//! source fires.
//!
//! # Modules
//!
//! - [`kernel_gate`] – [`KernelGate`][kernel_gate::KernelGate]: the motion
//!   gate every drive and axis command passes through, plus the
//!   [`SafeWheels`][kernel_gate::SafeWheels] and
//!   [`SafeAxis`][kernel_gate::SafeAxis] wrappers that enforce it.
//! - [`safety`] – [`SafetyCoordinator`][safety::SafetyCoordinator]: samples
//!   the estop and bumper sources on every safety poll, latches the
//!   `ARMED` / `SOFT_STOPPED` / `HARD_STOPPED` state, stops the wheels and
//!   axes and publishes the transition.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: tracks data arriving
//!   on each bus and reports links that have gone silent.

pub mod kernel_gate;
pub mod safety;
pub mod watchdog;

pub use kernel_gate::{KernelGate, SafeAxis, SafeWheels, SpeedCaps};
pub use safety::SafetyCoordinator;
pub use watchdog::Watchdog;
