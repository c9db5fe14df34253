//! Builds the module graph of a [`RobotProfile`].
//!
//! Order is fixed: serial link → expander → CAN → stop sources (estop,
//! bumper) → wheels → axes → flashlight → bms → battery control.  The safety
//! coordinator is wired on top by [`Robot`][crate::Robot].  A module that
//! cannot initialise its bus fails the whole assembly with
//! [`FieldError::BusInit`]; nothing is partially assembled.

use fieldos_bus::{
    BusError, CanAdapter, CanBus, Command, Expander, MockCanAdapter, MockTransport, PinPort,
    SerialBus, SerialTransport, Transport,
};
use fieldos_hal::{
    BmsLink, DriveConfig, EndSwitch, HardwareBatteryControl, HardwareBms, HardwareBumper,
    HardwareEstop, OdriveNode, OdriveWheels, PwmFlashlight, SharedAxis, SharedBatteryControl,
    SharedBms, SharedBumper, SharedEStop, SharedFlashlight, SharedWheels, SimulatedAxis,
    SimulatedBatteryControl, SimulatedBms, SimulatedBumper, SimulatedEstop, SimulatedFlashlight,
    SimulatedWheels, StepperAxis, StepperConfig, SwitchedFlashlight, TornadoAxis, TornadoConfig,
    shared, shared_battery_control, shared_bms, shared_bumper, shared_estop, shared_flashlight,
    shared_wheels,
};
use fieldos_profile::{AxisConfig, FlashlightConfig, RobotProfile};
use fieldos_types::FieldError;
use tracing::info;

use crate::config::RuntimeConfig;

/// Opens the physical links for the hardware backend.
pub trait Links {
    fn serial(&mut self, name: &str) -> Result<Box<dyn Transport>, BusError>;
    fn can(&mut self, name: &str) -> Result<Box<dyn CanAdapter>, BusError>;
}

/// Serial device and SocketCAN interface of the host.
pub struct SystemLinks {
    serial_port: String,
    serial_baud: u32,
    can_interface: String,
}

impl SystemLinks {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            serial_port: config.serial_port.clone(),
            serial_baud: config.serial_baud,
            can_interface: config.can_interface.clone(),
        }
    }
}

impl Links for SystemLinks {
    fn serial(&mut self, name: &str) -> Result<Box<dyn Transport>, BusError> {
        info!(bus = name, device = %self.serial_port, baud = self.serial_baud, "opening serial link");
        let transport = SerialTransport::open(&self.serial_port, self.serial_baud)?;
        Ok(Box::new(transport))
    }

    #[cfg(target_os = "linux")]
    fn can(&mut self, name: &str) -> Result<Box<dyn CanAdapter>, BusError> {
        info!(bus = name, interface = %self.can_interface, "opening CAN interface");
        let adapter = fieldos_bus::SocketCanAdapter::open(&self.can_interface)?;
        Ok(Box::new(adapter))
    }

    #[cfg(not(target_os = "linux"))]
    fn can(&mut self, name: &str) -> Result<Box<dyn CanAdapter>, BusError> {
        Err(BusError::Protocol(format!(
            "{name}: SocketCAN interface '{}' needs Linux",
            self.can_interface
        )))
    }
}

/// In-memory links; the handles stay with the caller for inspection.
#[derive(Clone, Default)]
pub struct MockLinks {
    pub serial: MockTransport,
    pub can: MockCanAdapter,
}

impl Links for MockLinks {
    fn serial(&mut self, _name: &str) -> Result<Box<dyn Transport>, BusError> {
        Ok(Box::new(self.serial.clone()))
    }

    fn can(&mut self, _name: &str) -> Result<Box<dyn CanAdapter>, BusError> {
        Ok(Box::new(self.can.clone()))
    }
}

pub enum Backend {
    Hardware(Box<dyn Links>),
    Simulation,
}

/// Every module of an assembled robot.
pub struct Modules {
    pub serial: Option<SerialBus>,
    pub can: Option<CanBus>,
    pub estop: SharedEStop,
    pub bumper: Option<SharedBumper>,
    pub wheels: Option<SharedWheels>,
    /// `y` then `z`.
    pub axes: Vec<SharedAxis>,
    pub flashlight: Option<SharedFlashlight>,
    pub bms: Option<SharedBms>,
    pub battery_control: Option<SharedBatteryControl>,
}

pub fn assemble_modules(profile: &RobotProfile, backend: Backend) -> Result<Modules, FieldError> {
    let modules = match backend {
        Backend::Simulation => simulated(profile),
        Backend::Hardware(links) => hardware(profile, links)?,
    };
    info!(
        profile = %profile.name,
        axes = modules.axes.len(),
        wheels = modules.wheels.is_some(),
        flashlight = modules.flashlight.is_some(),
        "modules assembled"
    );
    Ok(modules)
}

fn simulated(profile: &RobotProfile) -> Modules {
    let keys = |pins: &std::collections::BTreeMap<String, u8>| -> Vec<String> {
        pins.keys().cloned().collect()
    };
    let estop_keys = keys(&profile.estop.pins);
    let estop = shared_estop(SimulatedEstop::new(
        profile.estop.name.as_str(),
        estop_keys.iter().map(String::as_str),
    ));
    let bumper = profile.bumper.as_ref().map(|b| {
        let bumper_keys = keys(&b.pins);
        shared_bumper(SimulatedBumper::new(
            b.name.as_str(),
            bumper_keys.iter().map(String::as_str),
        ))
    });
    let wheels = profile
        .wheels
        .name()
        .map(|name| shared_wheels(SimulatedWheels::new(name)));
    let axes = profile
        .axes()
        .filter_map(|axis| Some((axis.name()?, axis.bounds()?)))
        .map(|(name, (min, max))| shared(SimulatedAxis::new(name, min, max)))
        .collect();
    let flashlight = profile.flashlight.name().map(|name| {
        let dimmable = matches!(profile.flashlight, FlashlightConfig::FlashlightPwm { .. });
        shared_flashlight(SimulatedFlashlight::new(name, dimmable))
    });
    Modules {
        serial: None,
        can: None,
        estop,
        bumper,
        wheels,
        axes,
        flashlight,
        bms: profile.bms.as_ref().map(|b| shared_bms(SimulatedBms::new(b.name.as_str()))),
        battery_control: profile
            .battery_control
            .as_ref()
            .map(|b| shared_battery_control(SimulatedBatteryControl::new(b.name.as_str()))),
    }
}

/// Runtime bus failures during setup are startup failures.
fn init_error(err: FieldError) -> FieldError {
    match err {
        FieldError::Bus { bus, details } => FieldError::BusInit { bus, details },
        other => other,
    }
}

/// The serial link and expander, resolving pin ports per bank.
struct Pins<'a> {
    profile: &'a RobotProfile,
    serial: Option<SerialBus>,
    expander: Option<Expander>,
}

impl Pins<'_> {
    fn port(&self, module: &str, on_expander: bool) -> Result<PinPort, FieldError> {
        let port = if on_expander {
            self.expander.as_ref().map(Expander::port)
        } else {
            self.serial.as_ref().map(SerialBus::core_port)
        };
        port.ok_or_else(|| FieldError::InvalidProfile {
            profile: self.profile.name.clone(),
            details: format!(
                "{module} needs the {} but it is not configured",
                if on_expander { "expander" } else { "serial link" }
            ),
        })
    }
}

fn hardware(profile: &RobotProfile, mut links: Box<dyn Links>) -> Result<Modules, FieldError> {
    let serial = match &profile.serial {
        Some(config) => {
            let transport = links.serial(&config.name).map_err(|e| FieldError::BusInit {
                bus: config.name.clone(),
                details: e.to_string(),
            })?;
            let bus = SerialBus::new(&config.name, transport);
            bus.send(&Command::SerialSetup {
                rx: config.rx_pin,
                tx: config.tx_pin,
                baud: config.baud,
                num: config.num,
            })
            .map_err(init_error)?;
            Some(bus)
        }
        None => None,
    };

    let expander = match (&profile.expander, &serial) {
        (Some(config), Some(bus)) => {
            Some(Expander::connect(bus, config.boot, config.enable).map_err(init_error)?)
        }
        (Some(config), None) => {
            return Err(FieldError::InvalidProfile {
                profile: profile.name.clone(),
                details: format!("{} needs the serial link but it is not configured", config.name),
            });
        }
        (None, _) => None,
    };

    let can = match &profile.can {
        Some(config) => {
            let adapter = links.can(&config.name).map_err(|e| FieldError::BusInit {
                bus: config.name.clone(),
                details: e.to_string(),
            })?;
            Some(CanBus::new(&config.name, adapter))
        }
        None => None,
    };

    let pins = Pins {
        profile,
        serial: serial.clone(),
        expander,
    };

    let estop_config = &profile.estop;
    let estop = HardwareEstop::connect(
        estop_config.name.as_str(),
        pins.port(&estop_config.name, estop_config.on_expander)?,
        &estop_config.pins,
    )
    .map_err(init_error)?;

    let bumper = match &profile.bumper {
        Some(config) => Some(shared_bumper(
            HardwareBumper::connect(
                config.name.as_str(),
                pins.port(&config.name, config.on_expander)?,
                &config.pins,
            )
            .map_err(init_error)?,
        )),
        None => None,
    };

    let wheels = match profile.wheels.name() {
        Some(name) => {
            let bus = require_can(profile, can.as_ref(), name)?;
            let (left_nodes, right_nodes) = profile.wheels.nodes();
            let (is_left_reversed, is_right_reversed) = profile.wheels.reversed();
            let config = DriveConfig {
                name: name.to_string(),
                left_nodes,
                right_nodes,
                is_left_reversed,
                is_right_reversed,
                m_per_turn: profile.params.m_per_motor_turn(),
                wheel_distance: profile.params.wheel_distance,
            };
            Some(shared_wheels(OdriveWheels::connect(config, bus).map_err(init_error)?))
        }
        None => None,
    };

    let mut axes = Vec::new();
    for config in profile.axes() {
        axes.push(hardware_axis(profile, config, &pins, can.as_ref())?);
    }

    let flashlight = hardware_flashlight(profile, &pins)?;

    let bms = match &profile.bms {
        Some(config) => {
            let link = BmsLink {
                rx_pin: config.rx_pin,
                tx_pin: config.tx_pin,
                baud: config.baud,
                num: config.num,
            };
            let port = pins.port(&config.name, config.on_expander)?;
            Some(shared_bms(
                HardwareBms::connect(config.name.as_str(), port, link).map_err(init_error)?,
            ))
        }
        None => None,
    };

    let battery_control = match &profile.battery_control {
        Some(config) => {
            let port = pins.port(&config.name, config.on_expander)?;
            Some(shared_battery_control(
                HardwareBatteryControl::connect(
                    config.name.as_str(),
                    port,
                    config.reset_pin,
                    config.status_pin,
                )
                .map_err(init_error)?,
            ))
        }
        None => None,
    };

    Ok(Modules {
        serial,
        can,
        estop: shared_estop(estop),
        bumper,
        wheels,
        axes,
        flashlight,
        bms,
        battery_control,
    })
}

fn require_can<'a>(
    profile: &RobotProfile,
    can: Option<&'a CanBus>,
    module: &str,
) -> Result<&'a CanBus, FieldError> {
    can.ok_or_else(|| FieldError::InvalidProfile {
        profile: profile.name.clone(),
        details: format!("{module} needs the CAN bus but it is not configured"),
    })
}

fn stepper_axis(
    config: StepperConfig,
    pins: &Pins<'_>,
    motor_on_expander: bool,
    end_stops_on_expander: bool,
) -> Result<SharedAxis, FieldError> {
    let motor = pins.port(&config.name, motor_on_expander)?;
    let switches = pins.port(&config.name, end_stops_on_expander)?;
    let axis = StepperAxis::connect(config, motor, switches).map_err(init_error)?;
    Ok(shared(axis))
}

fn hardware_axis(
    profile: &RobotProfile,
    config: &AxisConfig,
    pins: &Pins<'_>,
    can: Option<&CanBus>,
) -> Result<SharedAxis, FieldError> {
    let (min_position, max_position) = config.bounds().unwrap_or_default();
    let steps_per_m = config.steps_per_m(&profile.params).unwrap_or_default();

    match config {
        AxisConfig::ChainAxis {
            name,
            step_pin,
            dir_pin,
            alarm_pin,
            ref_t_pin,
            motor_on_expander,
            end_stops_on_expander,
            max_speed,
            ..
        } => stepper_axis(
            StepperConfig {
                name: name.clone(),
                step_pin: *step_pin,
                dir_pin: *dir_pin,
                alarm_pin: *alarm_pin,
                ccw: false,
                speed: *max_speed,
                steps_per_m,
                min_position,
                max_position,
                end_switches: Vec::new(),
                reference_pins: vec![*ref_t_pin],
            },
            pins,
            *motor_on_expander,
            *end_stops_on_expander,
        ),
        AxisConfig::YAxis {
            name,
            step_pin,
            dir_pin,
            alarm_pin,
            end_l_pin,
            end_r_pin,
            motor_on_expander,
            end_stops_on_expander,
            max_speed,
            ..
        }
        | AxisConfig::YAxisTornado {
            name,
            step_pin,
            dir_pin,
            alarm_pin,
            end_l_pin,
            end_r_pin,
            motor_on_expander,
            end_stops_on_expander,
            max_speed,
            ..
        } => stepper_axis(
            StepperConfig {
                name: name.clone(),
                step_pin: *step_pin,
                dir_pin: *dir_pin,
                alarm_pin: *alarm_pin,
                ccw: false,
                speed: *max_speed,
                steps_per_m,
                min_position,
                max_position,
                end_switches: vec![
                    EndSwitch::new("end_l", *end_l_pin, false),
                    EndSwitch::new("end_r", *end_r_pin, false),
                ],
                reference_pins: Vec::new(),
            },
            pins,
            *motor_on_expander,
            *end_stops_on_expander,
        ),
        AxisConfig::ZAxisV2 {
            name,
            step_pin,
            dir_pin,
            alarm_pin,
            ref_t_pin,
            end_b_pin,
            motor_on_expander,
            end_stops_on_expander,
            end_b_inverted,
            ccw,
            max_speed,
            ..
        } => stepper_axis(
            StepperConfig {
                name: name.clone(),
                step_pin: *step_pin,
                dir_pin: *dir_pin,
                alarm_pin: *alarm_pin,
                ccw: *ccw,
                speed: *max_speed,
                steps_per_m,
                min_position,
                max_position,
                end_switches: vec![EndSwitch::new("end_b", *end_b_pin, *end_b_inverted)],
                reference_pins: vec![*ref_t_pin],
            },
            pins,
            *motor_on_expander,
            *end_stops_on_expander,
        ),
        AxisConfig::Tornado {
            name,
            z_can_address,
            turn_can_address,
            m_per_tick,
            end_top_pin,
            end_bottom_pin,
            ref_motor_pin,
            ref_gear_pin,
            ref_t_pin,
            ref_b_pin,
            end_stops_on_expander,
            is_z_reversed,
            speed_limit,
            current_limit,
            ..
        } => {
            let bus = require_can(profile, can, name)?;
            let tornado_config = TornadoConfig {
                name: name.clone(),
                z_node: *z_can_address,
                turn_node: *turn_can_address,
                m_per_turn: *m_per_tick,
                is_z_reversed: *is_z_reversed,
                speed_limit: *speed_limit,
                current_limit: *current_limit,
                min_position,
                max_position,
                end_switches: vec![
                    EndSwitch::new("end_top", *end_top_pin, false),
                    EndSwitch::new("end_bottom", *end_bottom_pin, false),
                ],
                reference_pins: vec![*ref_motor_pin, *ref_gear_pin, *ref_t_pin, *ref_b_pin],
            };
            let axis = TornadoAxis::connect(
                tornado_config,
                OdriveNode::new(bus.clone(), *z_can_address),
                OdriveNode::new(bus.clone(), *turn_can_address),
                pins.port(name, *end_stops_on_expander)?,
            )
            .map_err(init_error)?;
            Ok(shared(axis))
        }
        AxisConfig::None => Err(FieldError::InvalidProfile {
            profile: profile.name.clone(),
            details: "empty axis slot cannot be assembled".into(),
        }),
    }
}

fn hardware_flashlight(
    profile: &RobotProfile,
    pins: &Pins<'_>,
) -> Result<Option<SharedFlashlight>, FieldError> {
    let flashlight = match &profile.flashlight {
        FlashlightConfig::None => return Ok(None),
        FlashlightConfig::Flashlight {
            name,
            pin,
            on_expander,
        } => shared_flashlight(
            SwitchedFlashlight::connect(name.as_str(), pins.port(name, *on_expander)?, vec![*pin])
                .map_err(init_error)?,
        ),
        FlashlightConfig::FlashlightV2 {
            name,
            front_pin,
            back_pin,
            on_expander,
        } => shared_flashlight(
            SwitchedFlashlight::connect(
                name.as_str(),
                pins.port(name, *on_expander)?,
                vec![*front_pin, *back_pin],
            )
            .map_err(init_error)?,
        ),
        FlashlightConfig::FlashlightPwm {
            name,
            pin,
            on_expander,
            rated_voltage,
            supply_voltage,
        } => shared_flashlight(
            PwmFlashlight::connect(
                name.as_str(),
                pins.port(name, *on_expander)?,
                *pin,
                *rated_voltage,
                *supply_voltage,
            )
            .map_err(init_error)?,
        ),
    };
    Ok(Some(flashlight))
}

#[cfg(test)]
mod tests {
    use fieldos_hal::Axis;
    use fieldos_types::AxisMotion;

    use super::*;

    struct FailingSerial;

    impl Links for FailingSerial {
        fn serial(&mut self, name: &str) -> Result<Box<dyn Transport>, BusError> {
            Err(BusError::Protocol(format!("{name}: no such device")))
        }

        fn can(&mut self, _name: &str) -> Result<Box<dyn CanAdapter>, BusError> {
            Ok(Box::new(MockCanAdapter::new()))
        }
    }

    #[test]
    fn simulation_assembles_every_slot() {
        let profile = fieldos_profile::resolve("u4").unwrap();
        let modules = assemble_modules(&profile, Backend::Simulation).unwrap();
        assert_eq!(modules.axes.len(), 2);
        assert!(modules.wheels.is_some());
        assert!(modules.bumper.is_some());
        assert!(modules.flashlight.is_some());
        assert!(modules.bms.is_some());
        assert!(modules.battery_control.is_some());
        assert!(modules.serial.is_none());
        assert_eq!(modules.axes[0].lock().bounds(), (-0.12, 0.12));
    }

    #[test]
    fn hardware_writes_setup_in_assembly_order() {
        let profile = fieldos_profile::resolve("u4").unwrap();
        let links = MockLinks::default();
        let modules = assemble_modules(&profile, Backend::Hardware(Box::new(links.clone()))).unwrap();
        assert!(modules.can.is_some());

        let lines = links.serial.written_lines();
        let position = |prefix: &str| {
            lines
                .iter()
                .position(|line| line.starts_with(prefix))
                .unwrap_or_else(|| panic!("no line starting with {prefix:?} in {lines:?}"))
        };
        assert_eq!(lines[0], "core.serial 26 27 115200 1");
        assert!(position("p0.setup") < position("core.watch 34"));
        assert!(position("core.watch 34") < position("p0.watch 22"));
        assert!(position("p0.watch 22") < position("core.stepper y_axis setup"));
        assert!(position("core.stepper y_axis setup") < position("p0.pwm 2"));
        assert!(position("p0.pwm 2") < position("p0.bms setup"));
        assert!(position("p0.bms setup") < position("p0.out 15 0"));

        assert!(!links.can.sent().is_empty());
        assert_eq!(modules.axes[1].lock().name(), "tornado");
        assert_eq!(modules.axes[1].lock().state(), AxisMotion::Unknown);
    }

    #[test]
    fn serial_failure_aborts_assembly() {
        let profile = fieldos_profile::resolve("u4").unwrap();
        let result = assemble_modules(&profile, Backend::Hardware(Box::new(FailingSerial)));
        match result {
            Err(err @ FieldError::BusInit { .. }) => assert!(err.is_fatal()),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("assembly should fail"),
        }
    }

    #[test]
    fn write_failure_during_setup_is_bus_init() {
        let profile = fieldos_profile::resolve("ff3").unwrap();
        let links = MockLinks::default();
        links.serial.set_fail_writes(true);
        assert!(matches!(
            assemble_modules(&profile, Backend::Hardware(Box::new(links))),
            Err(FieldError::BusInit { .. })
        ));
    }
}
