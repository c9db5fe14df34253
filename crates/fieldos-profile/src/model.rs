//! Typed profile document.
//!
//! Every module slot that selects between hardware variants is an internally
//! tagged enum on `version`; a robot without the module says
//! `version = "none"` explicitly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default stepper speed in steps per second.
pub const DEFAULT_STEPPER_SPEED: u32 = 40_000;

/// Microsteps per revolution of the chain axis stepper.
pub const CHAIN_AXIS_STEPS_PER_REV: f64 = 1600.0;

/// A fully parsed robot variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotProfile {
    /// Registry name (`u4`, `ff3`, …); filled in by the resolver.
    #[serde(skip)]
    pub name: String,

    pub params: Params,

    #[serde(default)]
    pub robot_brain: Option<RobotBrainConfig>,
    #[serde(default)]
    pub bluetooth: Option<BluetoothConfig>,

    #[serde(default)]
    pub serial: Option<SerialConfig>,
    #[serde(default)]
    pub expander: Option<ExpanderConfig>,
    #[serde(default)]
    pub can: Option<CanConfig>,

    pub wheels: WheelsConfig,
    pub y_axis: AxisConfig,
    pub z_axis: AxisConfig,
    pub flashlight: FlashlightConfig,
    pub estop: EstopConfig,

    #[serde(default)]
    pub bumper: Option<BumperConfig>,
    #[serde(default)]
    pub bms: Option<BmsConfig>,
    #[serde(default)]
    pub battery_control: Option<BatteryControlConfig>,
}

impl RobotProfile {
    /// The configured tool axes in assembly order (`y` then `z`), skipping
    /// empty slots.
    pub fn axes(&self) -> impl Iterator<Item = &AxisConfig> {
        [&self.y_axis, &self.z_axis]
            .into_iter()
            .filter(|axis| !matches!(axis, AxisConfig::None))
    }
}

/// Mechanical constants of the chassis and tool head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub motor_gear_ratio: f64,
    pub tooth_count: u32,
    /// Chain pitch in metres.
    pub pitch: f64,
    /// Track width in metres.
    pub wheel_distance: f64,
    #[serde(default)]
    pub work_x: Option<f64>,
    #[serde(default)]
    pub work_x_chop: Option<f64>,
    #[serde(default)]
    pub work_x_drill: Option<f64>,
    #[serde(default)]
    pub drill_radius: Option<f64>,
    #[serde(default)]
    pub chop_radius: Option<f64>,
}

impl Params {
    /// Ground distance per wheel motor revolution.
    pub fn m_per_motor_turn(&self) -> f64 {
        f64::from(self.tooth_count) * self.pitch / self.motor_gear_ratio
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotBrainConfig {
    #[serde(default)]
    pub flash_params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BluetoothConfig {
    pub name: String,
}

/// UART between the core controller and the expander.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    pub name: String,
    pub rx_pin: u8,
    pub tx_pin: u8,
    pub baud: u32,
    pub num: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpanderConfig {
    pub name: String,
    pub boot: u8,
    pub enable: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanConfig {
    pub name: String,
    #[serde(default)]
    pub on_expander: bool,
    pub rx_pin: u8,
    pub tx_pin: u8,
    pub baud: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version", rename_all = "snake_case")]
pub enum WheelsConfig {
    None,
    /// One motor controller per side.
    Wheels {
        name: String,
        left_can_address: u16,
        right_can_address: u16,
        #[serde(default)]
        is_left_reversed: bool,
        #[serde(default)]
        is_right_reversed: bool,
    },
    /// Two motor controllers per side driven in lockstep.
    DoubleWheels {
        name: String,
        left_back_can_address: u16,
        left_front_can_address: u16,
        right_back_can_address: u16,
        right_front_can_address: u16,
        #[serde(default)]
        is_left_reversed: bool,
        #[serde(default)]
        is_right_reversed: bool,
    },
}

impl WheelsConfig {
    pub fn name(&self) -> Option<&str> {
        match self {
            WheelsConfig::None => None,
            WheelsConfig::Wheels { name, .. } | WheelsConfig::DoubleWheels { name, .. } => {
                Some(name)
            }
        }
    }

    /// Left and right motor node addresses.
    pub fn nodes(&self) -> (Vec<u16>, Vec<u16>) {
        match self {
            WheelsConfig::None => (Vec::new(), Vec::new()),
            WheelsConfig::Wheels {
                left_can_address,
                right_can_address,
                ..
            } => (vec![*left_can_address], vec![*right_can_address]),
            WheelsConfig::DoubleWheels {
                left_back_can_address,
                left_front_can_address,
                right_back_can_address,
                right_front_can_address,
                ..
            } => (
                vec![*left_back_can_address, *left_front_can_address],
                vec![*right_back_can_address, *right_front_can_address],
            ),
        }
    }

    pub fn reversed(&self) -> (bool, bool) {
        match self {
            WheelsConfig::None => (false, false),
            WheelsConfig::Wheels {
                is_left_reversed,
                is_right_reversed,
                ..
            }
            | WheelsConfig::DoubleWheels {
                is_left_reversed,
                is_right_reversed,
                ..
            } => (*is_left_reversed, *is_right_reversed),
        }
    }
}

fn default_stepper_speed() -> u32 {
    DEFAULT_STEPPER_SPEED
}
fn default_chain_min() -> f64 {
    -0.10
}
fn default_chain_max() -> f64 {
    0.10
}
fn default_y_min() -> f64 {
    -0.12
}
fn default_y_max() -> f64 {
    0.12
}
fn default_y_steps_per_m() -> f64 {
    666_670.0
}
fn default_z_min() -> f64 {
    -0.197
}
fn default_z_max() -> f64 {
    0.0
}
fn default_z_steps_per_m() -> f64 {
    400_000.0
}

/// Tool axis variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version", rename_all = "snake_case")]
pub enum AxisConfig {
    None,
    /// Chain-driven lateral axis with a single reference switch.
    ChainAxis {
        name: String,
        step_pin: u8,
        dir_pin: u8,
        alarm_pin: u8,
        ref_t_pin: u8,
        #[serde(default)]
        motor_on_expander: bool,
        #[serde(default)]
        end_stops_on_expander: bool,
        #[serde(default = "default_stepper_speed")]
        max_speed: u32,
        #[serde(default = "default_chain_min")]
        min_position: f64,
        #[serde(default = "default_chain_max")]
        max_position: f64,
        /// Derived from the chain geometry when absent.
        #[serde(default)]
        steps_per_m: Option<f64>,
    },
    /// Lead-screw lateral axis with left/right end switches.
    YAxis {
        name: String,
        step_pin: u8,
        dir_pin: u8,
        alarm_pin: u8,
        end_l_pin: u8,
        end_r_pin: u8,
        #[serde(default)]
        motor_on_expander: bool,
        #[serde(default)]
        end_stops_on_expander: bool,
        #[serde(default = "default_stepper_speed")]
        max_speed: u32,
        #[serde(default = "default_y_min")]
        min_position: f64,
        #[serde(default = "default_y_max")]
        max_position: f64,
        #[serde(default = "default_y_steps_per_m")]
        steps_per_m: f64,
    },
    /// Lead-screw lateral axis carrying a tornado tool.
    YAxisTornado {
        name: String,
        step_pin: u8,
        dir_pin: u8,
        alarm_pin: u8,
        end_l_pin: u8,
        end_r_pin: u8,
        #[serde(default)]
        motor_on_expander: bool,
        #[serde(default)]
        end_stops_on_expander: bool,
        max_speed: u32,
        min_position: f64,
        max_position: f64,
        steps_per_m: f64,
        #[serde(default)]
        axis_offset: f64,
    },
    /// Vertical lead-screw axis, second revision.
    ZAxisV2 {
        name: String,
        step_pin: u8,
        dir_pin: u8,
        alarm_pin: u8,
        ref_t_pin: u8,
        end_b_pin: u8,
        #[serde(default)]
        motor_on_expander: bool,
        #[serde(default)]
        end_stops_on_expander: bool,
        #[serde(default)]
        ref_t_inverted: bool,
        #[serde(default)]
        end_b_inverted: bool,
        #[serde(default)]
        ccw: bool,
        #[serde(default = "default_stepper_speed")]
        max_speed: u32,
        #[serde(default = "default_z_min")]
        min_position: f64,
        #[serde(default = "default_z_max")]
        max_position: f64,
        #[serde(default = "default_z_steps_per_m")]
        steps_per_m: f64,
    },
    /// Rotary-linear tool on two CAN motor controllers.
    Tornado {
        name: String,
        min_position: f64,
        #[serde(default = "default_z_max")]
        max_position: f64,
        z_can_address: u16,
        turn_can_address: u16,
        /// Vertical travel per motor turn.
        m_per_tick: f64,
        end_top_pin: u8,
        end_bottom_pin: u8,
        ref_motor_pin: u8,
        ref_gear_pin: u8,
        ref_t_pin: u8,
        ref_b_pin: u8,
        #[serde(default)]
        end_stops_on_expander: bool,
        #[serde(default)]
        is_z_reversed: bool,
        #[serde(default)]
        is_turn_reversed: bool,
        speed_limit: f64,
        current_limit: f64,
    },
}

impl AxisConfig {
    pub fn name(&self) -> Option<&str> {
        match self {
            AxisConfig::None => None,
            AxisConfig::ChainAxis { name, .. }
            | AxisConfig::YAxis { name, .. }
            | AxisConfig::YAxisTornado { name, .. }
            | AxisConfig::ZAxisV2 { name, .. }
            | AxisConfig::Tornado { name, .. } => Some(name),
        }
    }

    /// Travel bounds `(min, max)` in metres.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self {
            AxisConfig::None => None,
            AxisConfig::ChainAxis {
                min_position,
                max_position,
                ..
            }
            | AxisConfig::YAxis {
                min_position,
                max_position,
                ..
            }
            | AxisConfig::YAxisTornado {
                min_position,
                max_position,
                ..
            }
            | AxisConfig::ZAxisV2 {
                min_position,
                max_position,
                ..
            }
            | AxisConfig::Tornado {
                min_position,
                max_position,
                ..
            } => Some((*min_position, *max_position)),
        }
    }

    /// Motor steps per metre for stepper variants; the chain axis derives it
    /// from `params` unless configured.
    pub fn steps_per_m(&self, params: &Params) -> Option<f64> {
        match self {
            AxisConfig::ChainAxis { steps_per_m, .. } => Some(steps_per_m.unwrap_or_else(|| {
                CHAIN_AXIS_STEPS_PER_REV * params.motor_gear_ratio
                    / (f64::from(params.tooth_count) * params.pitch)
            })),
            AxisConfig::YAxis { steps_per_m, .. }
            | AxisConfig::YAxisTornado { steps_per_m, .. }
            | AxisConfig::ZAxisV2 { steps_per_m, .. } => Some(*steps_per_m),
            AxisConfig::None | AxisConfig::Tornado { .. } => None,
        }
    }

    /// Variant tag as written in the profile.
    pub fn version(&self) -> &'static str {
        match self {
            AxisConfig::None => "none",
            AxisConfig::ChainAxis { .. } => "chain_axis",
            AxisConfig::YAxis { .. } => "y_axis",
            AxisConfig::YAxisTornado { .. } => "y_axis_tornado",
            AxisConfig::ZAxisV2 { .. } => "z_axis_v2",
            AxisConfig::Tornado { .. } => "tornado",
        }
    }
}

fn default_supply_voltage() -> f64 {
    24.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version", rename_all = "snake_case")]
pub enum FlashlightConfig {
    None,
    /// Single on/off channel.
    Flashlight {
        name: String,
        pin: u8,
        #[serde(default)]
        on_expander: bool,
    },
    /// Front and back channels switched together.
    FlashlightV2 {
        name: String,
        front_pin: u8,
        back_pin: u8,
        #[serde(default)]
        on_expander: bool,
    },
    /// Dimmable channel; duty is scaled so the lamp never sees more than its
    /// rated voltage.
    FlashlightPwm {
        name: String,
        pin: u8,
        #[serde(default)]
        on_expander: bool,
        rated_voltage: f64,
        #[serde(default = "default_supply_voltage")]
        supply_voltage: f64,
    },
}

impl FlashlightConfig {
    pub fn name(&self) -> Option<&str> {
        match self {
            FlashlightConfig::None => None,
            FlashlightConfig::Flashlight { name, .. }
            | FlashlightConfig::FlashlightV2 { name, .. }
            | FlashlightConfig::FlashlightPwm { name, .. } => Some(name),
        }
    }
}

/// Emergency stop buttons; inputs are active-low.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstopConfig {
    pub name: String,
    #[serde(default)]
    pub on_expander: bool,
    /// Button label → input pin.
    pub pins: BTreeMap<String, u8>,
}

/// Bumper strips; an input reads high while pressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BumperConfig {
    pub name: String,
    #[serde(default)]
    pub on_expander: bool,
    pub pins: BTreeMap<String, u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BmsConfig {
    pub name: String,
    #[serde(default)]
    pub on_expander: bool,
    pub rx_pin: u8,
    pub tx_pin: u8,
    pub baud: u32,
    pub num: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryControlConfig {
    pub name: String,
    #[serde(default)]
    pub on_expander: bool,
    pub reset_pin: u8,
    pub status_pin: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Params {
        Params {
            motor_gear_ratio: 12.52,
            tooth_count: 17,
            pitch: 0.041,
            wheel_distance: 0.47,
            work_x: None,
            work_x_chop: None,
            work_x_drill: None,
            drill_radius: None,
            chop_radius: None,
        }
    }

    #[test]
    fn m_per_motor_turn_follows_chain_geometry() {
        let expected = 17.0 * 0.041 / 12.52;
        assert!((params().m_per_motor_turn() - expected).abs() < 1e-12);
    }

    #[test]
    fn axis_variant_parses_with_defaults() {
        let axis: AxisConfig = toml::from_str(
            r#"
            version = "z_axis_v2"
            name = "z_axis"
            step_pin = 5
            dir_pin = 4
            alarm_pin = 33
            ref_t_pin = 25
            end_b_pin = 22
            "#,
        )
        .unwrap();
        assert_eq!(axis.version(), "z_axis_v2");
        assert_eq!(axis.bounds(), Some((-0.197, 0.0)));
        assert_eq!(axis.steps_per_m(&params()), Some(400_000.0));
    }

    #[test]
    fn chain_axis_derives_steps_per_m() {
        let axis: AxisConfig = toml::from_str(
            r#"
            version = "chain_axis"
            name = "chain_axis"
            step_pin = 5
            dir_pin = 4
            alarm_pin = 13
            ref_t_pin = 21
            "#,
        )
        .unwrap();
        let expected = 1600.0 * 12.52 / (17.0 * 0.041);
        let steps = axis.steps_per_m(&params()).unwrap();
        assert!((steps - expected).abs() < 1e-6);
    }

    #[test]
    fn none_slot_is_explicit() {
        let axis: AxisConfig = toml::from_str(r#"version = "none""#).unwrap();
        assert_eq!(axis, AxisConfig::None);
        assert!(axis.name().is_none());
        assert!(toml::from_str::<AxisConfig>("").is_err());
    }

    #[test]
    fn double_wheels_lists_nodes_per_side() {
        let wheels: WheelsConfig = toml::from_str(
            r#"
            version = "double_wheels"
            name = "wheels"
            left_back_can_address = 0
            left_front_can_address = 256
            right_back_can_address = 512
            right_front_can_address = 768
            is_right_reversed = true
            "#,
        )
        .unwrap();
        assert_eq!(wheels.nodes(), (vec![0x000, 0x100], vec![0x200, 0x300]));
        assert_eq!(wheels.reversed(), (false, true));
    }
}
