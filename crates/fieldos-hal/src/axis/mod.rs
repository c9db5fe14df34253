//! Tool axes.
//!
//! | Variant | Backend | Drive |
//! |---|---|---|
//! | `chain_axis`, `y_axis`, `y_axis_tornado`, `z_axis_v2` | [`StepperAxis`] | stepper over the serial link |
//! | `tornado` | [`TornadoAxis`] | motor controller on CAN |
//! | any | [`SimulatedAxis`] | in-memory |
//!
//! ```text
//! UNKNOWN ──home()──▶ HOMING ──poll──▶ REFERENCED ◀──poll── MOVING
//!                                          └──move_to()──────▲
//! any ──alarm──▶ FAULT ──home()──▶ HOMING
//! ```

use std::sync::Arc;

use fieldos_types::{AxisMotion, FieldError};
use parking_lot::Mutex;

pub mod simulation;
pub mod state;
pub mod stepper;
pub mod tornado;

pub use simulation::SimulatedAxis;
pub use state::AxisState;
pub use stepper::{EndSwitch, StepperAxis, StepperConfig};
pub use tornado::{TornadoAxis, TornadoConfig};

/// A bounded linear tool axis.
pub trait Axis: Send {
    fn name(&self) -> &str;

    /// Start a reference run.  Completes on a later [`poll`][Self::poll].
    fn home(&mut self) -> Result<(), FieldError>;

    /// Start travelling to `position` (metres).  Completes on a later poll.
    ///
    /// # Errors
    ///
    /// [`FieldError::AxisFault`], [`FieldError::NotHomed`] or
    /// [`FieldError::OutOfRange`], checked in that order.
    fn move_to(&mut self, position: f64) -> Result<(), FieldError>;

    /// Halt immediately.  Valid in every state.
    fn stop(&mut self) -> Result<(), FieldError>;

    fn is_referenced(&self) -> bool;

    fn current_position(&self) -> f64;

    fn state(&self) -> AxisMotion;

    /// Travel bounds `(min, max)` in metres.
    fn bounds(&self) -> (f64, f64);

    /// Status poll: observe drive reports and advance the state machine.
    fn poll(&mut self) -> Result<(), FieldError>;
}

pub type SharedAxis = Arc<Mutex<dyn Axis>>;

/// Wrap an axis for sharing between the coordinator and its callers.
pub fn shared<A: Axis + 'static>(axis: A) -> SharedAxis {
    Arc::new(Mutex::new(axis))
}
