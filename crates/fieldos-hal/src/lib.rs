//! # fieldos-hal
//!
//! Capability modules of the robot.  Every module kind is a trait with exactly
//! two backends: one that drives the real hardware through `fieldos-bus`, and
//! a simulation that keeps its state in memory and produces the same
//! observable transitions and errors for the same command sequence.
//!
//! | Trait | Hardware | Simulation |
//! |---|---|---|
//! | [`Axis`] | [`StepperAxis`], [`TornadoAxis`] | [`SimulatedAxis`] |
//! | [`Wheels`] | [`OdriveWheels`] | [`SimulatedWheels`] |
//! | [`Flashlight`] | [`SwitchedFlashlight`], [`PwmFlashlight`] | [`SimulatedFlashlight`] |
//! | [`EStop`] | [`HardwareEstop`] | [`SimulatedEstop`] |
//! | [`Bumper`] | [`HardwareBumper`] | [`SimulatedBumper`] |
//! | [`Bms`] | [`HardwareBms`] | [`SimulatedBms`] |
//! | [`BatteryControl`] | [`HardwareBatteryControl`] | [`SimulatedBatteryControl`] |
//!
//! Modules are shared as `Arc<parking_lot::Mutex<dyn Trait>>` so the safety
//! coordinator and the command surface can both reach them.

pub mod axis;
pub mod bumper;
pub mod estop;
pub mod flashlight;
pub mod odrive;
pub mod power;
pub mod wheels;

pub use axis::{
    Axis, AxisState, EndSwitch, SharedAxis, SimulatedAxis, StepperAxis, StepperConfig,
    TornadoAxis, TornadoConfig, shared,
};
pub use bumper::{Bumper, HardwareBumper, SharedBumper, SimulatedBumper, shared_bumper};
pub use estop::{EStop, HardwareEstop, SOFT_SOURCE, SharedEStop, SimulatedEstop, shared_estop};
pub use flashlight::{
    Flashlight, PwmFlashlight, SharedFlashlight, SimulatedFlashlight, SwitchedFlashlight,
    shared_flashlight,
};
pub use odrive::OdriveNode;
pub use power::{
    BatteryControl, Bms, BmsLink, HardwareBatteryControl, HardwareBms, SharedBatteryControl,
    SharedBms, SimulatedBatteryControl, SimulatedBms, shared_battery_control, shared_bms,
};
pub use wheels::{
    DriveConfig, OdriveWheels, Pose, SharedWheels, SimulatedWheels, Wheels, shared_wheels,
    wheel_speeds,
};
