//! Work lights.
//!
//! Switched lights (`flashlight`, `flashlight_v2`) only know on and off, so a
//! requested intensity is rounded at [`BINARY_THRESHOLD`].  The PWM light
//! dims continuously and scales its duty cycle so the lamp never sees more
//! than its rated voltage.

use std::sync::Arc;

use fieldos_bus::PinPort;
use fieldos_types::FieldError;
use parking_lot::Mutex;
use tracing::{debug, info};

pub const BINARY_THRESHOLD: f64 = 0.5;

pub trait Flashlight: Send {
    fn name(&self) -> &str;

    /// Set the light level in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// [`FieldError::InvalidCommand`] outside `[0, 1]` or for NaN.
    fn set_intensity(&mut self, intensity: f64) -> Result<(), FieldError>;

    /// Effective level after rounding.
    fn intensity(&self) -> f64;

    fn poll(&mut self) -> Result<(), FieldError> {
        Ok(())
    }
}

pub type SharedFlashlight = Arc<Mutex<dyn Flashlight>>;

pub fn shared_flashlight<F: Flashlight + 'static>(flashlight: F) -> SharedFlashlight {
    Arc::new(Mutex::new(flashlight))
}

pub fn check_intensity(name: &str, intensity: f64) -> Result<(), FieldError> {
    if (0.0..=1.0).contains(&intensity) {
        Ok(())
    } else {
        Err(FieldError::invalid_command(
            name,
            format!("intensity must be within [0, 1], got {intensity}"),
        ))
    }
}

pub fn binary_level(intensity: f64) -> bool {
    intensity >= BINARY_THRESHOLD
}

/// Duty cycle that applies `intensity × rated_voltage` from `supply_voltage`.
pub fn pwm_duty(intensity: f64, rated_voltage: f64, supply_voltage: f64) -> f64 {
    (intensity * rated_voltage / supply_voltage).clamp(0.0, 1.0)
}

/// One or more output pins switched together.
pub struct SwitchedFlashlight {
    name: String,
    port: PinPort,
    pins: Vec<u8>,
    on: bool,
}

impl SwitchedFlashlight {
    /// Switch every pin off and take ownership of them.
    pub fn connect(name: impl Into<String>, port: PinPort, pins: Vec<u8>) -> Result<Self, FieldError> {
        let name = name.into();
        for &pin in &pins {
            port.output(pin, false)?;
        }
        info!(flashlight = %name, bank = %port.bank(), ?pins, "switched flashlight ready");
        Ok(Self {
            name,
            port,
            pins,
            on: false,
        })
    }
}

impl Flashlight for SwitchedFlashlight {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_intensity(&mut self, intensity: f64) -> Result<(), FieldError> {
        check_intensity(&self.name, intensity)?;
        let on = binary_level(intensity);
        for &pin in &self.pins {
            self.port.output(pin, on)?;
        }
        self.on = on;
        Ok(())
    }

    fn intensity(&self) -> f64 {
        if self.on { 1.0 } else { 0.0 }
    }
}

pub struct PwmFlashlight {
    name: String,
    port: PinPort,
    pin: u8,
    rated_voltage: f64,
    supply_voltage: f64,
    intensity: f64,
}

impl PwmFlashlight {
    pub fn connect(
        name: impl Into<String>,
        port: PinPort,
        pin: u8,
        rated_voltage: f64,
        supply_voltage: f64,
    ) -> Result<Self, FieldError> {
        let name = name.into();
        port.pwm(pin, 0.0)?;
        info!(flashlight = %name, bank = %port.bank(), pin, rated_voltage, "pwm flashlight ready");
        Ok(Self {
            name,
            port,
            pin,
            rated_voltage,
            supply_voltage,
            intensity: 0.0,
        })
    }
}

impl Flashlight for PwmFlashlight {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_intensity(&mut self, intensity: f64) -> Result<(), FieldError> {
        check_intensity(&self.name, intensity)?;
        let duty = pwm_duty(intensity, self.rated_voltage, self.supply_voltage);
        debug!(flashlight = %self.name, intensity, duty, "set intensity");
        self.port.pwm(self.pin, duty)?;
        self.intensity = intensity;
        Ok(())
    }

    fn intensity(&self) -> f64 {
        self.intensity
    }
}

pub struct SimulatedFlashlight {
    name: String,
    dimmable: bool,
    intensity: f64,
}

impl SimulatedFlashlight {
    /// `dimmable` selects PWM behaviour; otherwise levels are rounded like a
    /// switched light.
    pub fn new(name: impl Into<String>, dimmable: bool) -> Self {
        Self {
            name: name.into(),
            dimmable,
            intensity: 0.0,
        }
    }
}

impl Flashlight for SimulatedFlashlight {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_intensity(&mut self, intensity: f64) -> Result<(), FieldError> {
        check_intensity(&self.name, intensity)?;
        self.intensity = match (self.dimmable, binary_level(intensity)) {
            (true, _) => intensity,
            (false, true) => 1.0,
            (false, false) => 0.0,
        };
        Ok(())
    }

    fn intensity(&self) -> f64 {
        self.intensity
    }
}

#[cfg(test)]
mod tests {
    use fieldos_bus::{Expander, MockTransport, SerialBus};

    use super::*;

    fn expander() -> (PinPort, MockTransport) {
        let mock = MockTransport::new();
        let bus = SerialBus::new("serial", Box::new(mock.clone()));
        let port = Expander::connect(&bus, 25, 14).unwrap().port();
        mock.take_written_lines();
        (port, mock)
    }

    #[test]
    fn rounding_threshold() {
        assert!(!binary_level(0.0));
        assert!(!binary_level(0.49));
        assert!(binary_level(0.5));
        assert!(binary_level(1.0));
    }

    #[test]
    fn duty_is_scaled_to_rated_voltage() {
        assert!((pwm_duty(1.0, 12.0, 24.0) - 0.5).abs() < 1e-12);
        assert!((pwm_duty(0.5, 23.0, 24.0) - 23.0 / 48.0).abs() < 1e-12);
        assert_eq!(pwm_duty(1.0, 48.0, 24.0), 1.0);
    }

    #[test]
    fn out_of_range_intensity_is_rejected() {
        let mut light = SimulatedFlashlight::new("flashlight", false);
        for bad in [-0.1, 1.5, f64::NAN] {
            assert!(matches!(
                light.set_intensity(bad),
                Err(FieldError::InvalidCommand { .. })
            ));
        }
        assert_eq!(light.intensity(), 0.0);
    }

    #[test]
    fn dual_channel_switches_both_pins() {
        let (port, mock) = expander();
        let mut light = SwitchedFlashlight::connect("flashlight", port, vec![3, 4]).unwrap();
        assert_eq!(mock.take_written_lines(), vec!["p0.out 3 0", "p0.out 4 0"]);

        light.set_intensity(0.7).unwrap();
        assert_eq!(mock.take_written_lines(), vec!["p0.out 3 1", "p0.out 4 1"]);
        assert_eq!(light.intensity(), 1.0);

        light.set_intensity(0.2).unwrap();
        assert_eq!(light.intensity(), 0.0);
    }

    #[test]
    fn pwm_light_writes_scaled_duty() {
        let (port, mock) = expander();
        let mut light = PwmFlashlight::connect("flashlight", port, 2, 12.0, 24.0).unwrap();
        mock.take_written_lines();
        light.set_intensity(1.0).unwrap();
        assert_eq!(mock.take_written_lines(), vec!["p0.pwm 2 0.500"]);
        assert_eq!(light.intensity(), 1.0);
    }

    #[test]
    fn simulation_matches_switched_rounding() {
        let (port, _mock) = expander();
        let mut hardware = SwitchedFlashlight::connect("flashlight", port, vec![2]).unwrap();
        let mut sim = SimulatedFlashlight::new("flashlight", false);
        for level in [0.3, 0.5, 0.9, 0.0] {
            hardware.set_intensity(level).unwrap();
            sim.set_intensity(level).unwrap();
            assert_eq!(hardware.intensity(), sim.intensity());
        }
    }
}
