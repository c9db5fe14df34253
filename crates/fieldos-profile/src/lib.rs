//! `fieldos-profile` – Robot variant registry
//!
//! Resolves a variant name (`u1`…`u4`, `ff3`) into a validated
//! [`RobotProfile`]: which module variant sits in each slot, its pins and CAN
//! addresses, and the chassis constants.  Resolution is pure and happens once
//! at startup.
//!
//! # Modules
//!
//! - [`model`] – Typed profile document with tagged module slots.
//! - [`registry`] – Embedded profiles, [`resolve`], [`parse`], [`names`].
//! - [`validate`] – Range checks and bus claim collision detection.

pub mod model;
pub mod registry;
pub mod validate;

pub use model::{
    AxisConfig, BatteryControlConfig, BmsConfig, BumperConfig, CanConfig, EstopConfig,
    ExpanderConfig, FlashlightConfig, Params, RobotProfile, SerialConfig, WheelsConfig,
};
pub use registry::{load_file, names, parse, resolve};
pub use validate::{Claim, Resource};
