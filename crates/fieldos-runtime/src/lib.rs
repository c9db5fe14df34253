//! `fieldos-runtime` – Robot assembly and the periodic tasks
//!
//! Turns a resolved profile into a running robot: builds every module in
//! dependency order, wires the safety coordinator around them and drives the
//! safety and status polls.
//!
//! # Modules
//!
//! - [`config`] – [`RuntimeConfig`]: profile selection, bus devices, poll
//!   periods and speed caps, with `FIELDOS_*` environment overrides.
//! - [`assembly`] – [`assemble_modules`]: strict-order construction of the
//!   hardware or simulation backends.  Physical links are opened through the
//!   [`Links`] seam so tests can substitute [`MockLinks`].
//! - [`robot`] – [`Robot`]: the composite handed to callers; gated motion
//!   handles, safety queries, event subscription and exactly-once shutdown.
//! - [`scheduler`] – [`run`][scheduler::run]: the biased safety/status loop.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber.
//!
//! # Safety gating
//!
//! Motion reaches the modules only through
//! [`SafeWheels`][fieldos_kernel::SafeWheels] and
//! [`SafeAxis`][fieldos_kernel::SafeAxis]; the raw module handles stay inside
//! the robot and the safety coordinator.

pub mod assembly;
pub mod config;
pub mod robot;
pub mod scheduler;
pub mod telemetry;

pub use assembly::{Backend, Links, MockLinks, Modules, SystemLinks, assemble_modules};
pub use config::RuntimeConfig;
pub use robot::Robot;
pub use telemetry::init_tracing;
