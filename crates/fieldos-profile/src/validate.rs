//! Resolve-time checks: value ranges, slot dependencies and bus claims.
//!
//! Each module claims the resources it occupies on a physical bus:
//!
//! | Resource | Claimed by |
//! |---|---|
//! | `core` pin | serial link, expander boot/enable, modules with `on_expander = false` |
//! | `p0` pin | modules with `on_expander = true` |
//! | CAN node range | wheel motors and tornado motors (`base..base + 0x20`) |
//!
//! Two claims on the same pin, or two overlapping CAN ranges, make the profile
//! invalid.

use std::collections::BTreeMap;
use std::fmt;

use fieldos_bus::Bank;
use fieldos_bus::can::{MAX_STANDARD_ID, NODE_ID_SPAN};

use crate::model::{AxisConfig, FlashlightConfig, RobotProfile, WheelsConfig};

/// Highest GPIO number of either controller.
pub const MAX_PIN: u8 = 39;

/// One physical resource claimed by a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Resource {
    Pin(Bank, u8),
    /// CAN node occupying `base..base + NODE_ID_SPAN`.
    CanNode(u16),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Pin(bank, pin) => write!(f, "{bank} pin {pin}"),
            Resource::CanNode(base) => write!(f, "CAN node 0x{base:03X}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub module: String,
    pub resource: Resource,
}

#[derive(Default)]
struct Claims {
    claims: Vec<Claim>,
}

impl Claims {
    fn pin(&mut self, module: &str, bank: Bank, pin: u8) {
        self.claims.push(Claim {
            module: module.to_string(),
            resource: Resource::Pin(bank, pin),
        });
    }

    fn pins(&mut self, module: &str, bank: Bank, pins: &[u8]) {
        for &pin in pins {
            self.pin(module, bank, pin);
        }
    }

    fn can(&mut self, module: &str, base: u16) {
        self.claims.push(Claim {
            module: module.to_string(),
            resource: Resource::CanNode(base),
        });
    }
}

/// Every bus resource the profile claims, in slot order.
pub fn claims(profile: &RobotProfile) -> Vec<Claim> {
    let mut c = Claims::default();

    if let Some(serial) = &profile.serial {
        c.pins(&serial.name, Bank::Core, &[serial.rx_pin, serial.tx_pin]);
    }
    if let Some(expander) = &profile.expander {
        c.pins(&expander.name, Bank::Core, &[expander.boot, expander.enable]);
    }
    if let Some(can) = &profile.can {
        c.pins(&can.name, Bank::on_expander(can.on_expander), &[can.rx_pin, can.tx_pin]);
    }

    let estop = &profile.estop;
    let bank = Bank::on_expander(estop.on_expander);
    for pin in estop.pins.values() {
        c.pin(&estop.name, bank, *pin);
    }
    if let Some(bumper) = &profile.bumper {
        let bank = Bank::on_expander(bumper.on_expander);
        for pin in bumper.pins.values() {
            c.pin(&bumper.name, bank, *pin);
        }
    }

    if let Some(name) = profile.wheels.name() {
        let (left, right) = profile.wheels.nodes();
        for node in left.into_iter().chain(right) {
            c.can(name, node);
        }
    }

    for axis in profile.axes() {
        axis_claims(&mut c, axis);
    }

    match &profile.flashlight {
        FlashlightConfig::None => {}
        FlashlightConfig::Flashlight {
            name,
            pin,
            on_expander,
        }
        | FlashlightConfig::FlashlightPwm {
            name,
            pin,
            on_expander,
            ..
        } => c.pin(name, Bank::on_expander(*on_expander), *pin),
        FlashlightConfig::FlashlightV2 {
            name,
            front_pin,
            back_pin,
            on_expander,
        } => c.pins(name, Bank::on_expander(*on_expander), &[*front_pin, *back_pin]),
    }

    if let Some(bms) = &profile.bms {
        c.pins(&bms.name, Bank::on_expander(bms.on_expander), &[bms.rx_pin, bms.tx_pin]);
    }
    if let Some(control) = &profile.battery_control {
        c.pins(
            &control.name,
            Bank::on_expander(control.on_expander),
            &[control.reset_pin, control.status_pin],
        );
    }

    c.claims
}

fn axis_claims(c: &mut Claims, axis: &AxisConfig) {
    match axis {
        AxisConfig::None => {}
        AxisConfig::ChainAxis {
            name,
            step_pin,
            dir_pin,
            alarm_pin,
            ref_t_pin,
            motor_on_expander,
            end_stops_on_expander,
            ..
        } => {
            c.pins(name, Bank::on_expander(*motor_on_expander), &[*step_pin, *dir_pin, *alarm_pin]);
            c.pin(name, Bank::on_expander(*end_stops_on_expander), *ref_t_pin);
        }
        AxisConfig::YAxis {
            name,
            step_pin,
            dir_pin,
            alarm_pin,
            end_l_pin,
            end_r_pin,
            motor_on_expander,
            end_stops_on_expander,
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
            ..
        } => {
            c.pins(name, Bank::on_expander(*motor_on_expander), &[*step_pin, *dir_pin, *alarm_pin]);
            c.pins(name, Bank::on_expander(*end_stops_on_expander), &[*end_l_pin, *end_r_pin]);
        }
        AxisConfig::ZAxisV2 {
            name,
            step_pin,
            dir_pin,
            alarm_pin,
            ref_t_pin,
            end_b_pin,
            motor_on_expander,
            end_stops_on_expander,
            ..
        } => {
            c.pins(name, Bank::on_expander(*motor_on_expander), &[*step_pin, *dir_pin, *alarm_pin]);
            c.pins(name, Bank::on_expander(*end_stops_on_expander), &[*ref_t_pin, *end_b_pin]);
        }
        AxisConfig::Tornado {
            name,
            z_can_address,
            turn_can_address,
            end_top_pin,
            end_bottom_pin,
            ref_motor_pin,
            ref_gear_pin,
            ref_t_pin,
            ref_b_pin,
            end_stops_on_expander,
            ..
        } => {
            c.can(name, *z_can_address);
            c.can(name, *turn_can_address);
            c.pins(
                name,
                Bank::on_expander(*end_stops_on_expander),
                &[*end_top_pin, *end_bottom_pin, *ref_motor_pin, *ref_gear_pin, *ref_t_pin, *ref_b_pin],
            );
        }
    }
}

/// Collect every problem with `profile`; an empty list means valid.
pub fn problems(profile: &RobotProfile) -> Vec<String> {
    let mut problems = Vec::new();
    let claims = claims(profile);

    check_ranges(profile, &claims, &mut problems);
    check_dependencies(profile, &claims, &mut problems);
    check_names(profile, &mut problems);
    check_collisions(&claims, &mut problems);

    problems
}

fn check_ranges(profile: &RobotProfile, claims: &[Claim], problems: &mut Vec<String>) {
    for claim in claims {
        match claim.resource {
            Resource::Pin(bank, pin) if pin > MAX_PIN => problems.push(format!(
                "{}: {bank} pin {pin} exceeds {MAX_PIN}",
                claim.module
            )),
            Resource::CanNode(base) if base > MAX_STANDARD_ID - (NODE_ID_SPAN - 1) => {
                problems.push(format!(
                    "{}: CAN address 0x{base:X} leaves no room for commands below 0x{MAX_STANDARD_ID:X}",
                    claim.module
                ))
            }
            _ => {}
        }
    }

    let params = &profile.params;
    for (label, value) in [
        ("motor_gear_ratio", params.motor_gear_ratio),
        ("tooth_count", f64::from(params.tooth_count)),
        ("pitch", params.pitch),
        ("wheel_distance", params.wheel_distance),
    ] {
        if !(value.is_finite() && value > 0.0) {
            problems.push(format!("params.{label} must be positive, got {value}"));
        }
    }

    for axis in profile.axes() {
        let name = axis.name().unwrap_or_default();
        if let Some((min, max)) = axis.bounds() {
            if !(min.is_finite() && max.is_finite() && min < max) {
                problems.push(format!("{name}: min_position {min} must be below max_position {max}"));
            }
        }
        if let Some(scale) = axis.steps_per_m(params) {
            if !(scale.is_finite() && scale > 0.0) {
                problems.push(format!("{name}: steps_per_m must be positive, got {scale}"));
            }
        }
        match axis {
            AxisConfig::ChainAxis { max_speed, .. }
            | AxisConfig::YAxis { max_speed, .. }
            | AxisConfig::YAxisTornado { max_speed, .. }
            | AxisConfig::ZAxisV2 { max_speed, .. }
                if *max_speed == 0 =>
            {
                problems.push(format!("{name}: max_speed must be positive"));
            }
            AxisConfig::Tornado {
                m_per_tick,
                speed_limit,
                current_limit,
                ..
            } => {
                for (label, value) in [
                    ("m_per_tick", *m_per_tick),
                    ("speed_limit", *speed_limit),
                    ("current_limit", *current_limit),
                ] {
                    if !(value.is_finite() && value > 0.0) {
                        problems.push(format!("{name}: {label} must be positive, got {value}"));
                    }
                }
            }
            _ => {}
        }
    }

    if let FlashlightConfig::FlashlightPwm {
        name,
        rated_voltage,
        supply_voltage,
        ..
    } = &profile.flashlight
    {
        if !(rated_voltage.is_finite() && *rated_voltage > 0.0) {
            problems.push(format!("{name}: rated_voltage must be positive"));
        }
        if !(supply_voltage.is_finite() && *supply_voltage > 0.0) {
            problems.push(format!("{name}: supply_voltage must be positive"));
        }
    }

    if profile.estop.pins.is_empty() {
        problems.push(format!("{}: at least one stop button is required", profile.estop.name));
    }
}

fn check_dependencies(profile: &RobotProfile, claims: &[Claim], problems: &mut Vec<String>) {
    for claim in claims {
        let missing = match claim.resource {
            Resource::Pin(Bank::Core, _) if profile.serial.is_none() => "serial link",
            Resource::Pin(Bank::Expander, _) if profile.expander.is_none() => "expander",
            Resource::CanNode(_) if profile.can.is_none() => "CAN bus",
            _ => continue,
        };
        problems.push(format!("{}: {} claimed but no {missing} is configured", claim.module, claim.resource));
    }
}

fn check_names(profile: &RobotProfile, problems: &mut Vec<String>) {
    let mut names: Vec<&str> = Vec::new();
    names.extend(profile.wheels.name());
    names.extend(profile.axes().filter_map(AxisConfig::name));
    names.extend(profile.flashlight.name());
    names.push(&profile.estop.name);
    names.extend(profile.bumper.as_ref().map(|b| b.name.as_str()));
    names.extend(profile.bms.as_ref().map(|b| b.name.as_str()));
    names.extend(profile.battery_control.as_ref().map(|b| b.name.as_str()));

    let mut seen = BTreeMap::new();
    for name in names {
        if name.is_empty() || name.contains(char::is_whitespace) {
            problems.push(format!("module name '{name}' must be a non-empty single word"));
        }
        if seen.insert(name, ()).is_some() {
            problems.push(format!("module name '{name}' is used twice"));
        }
    }

    if matches!(profile.wheels, WheelsConfig::None) && profile.axes().next().is_none() {
        problems.push("profile has neither wheels nor axes".to_string());
    }
}

fn check_collisions(claims: &[Claim], problems: &mut Vec<String>) {
    let mut pins: BTreeMap<(Bank, u8), &str> = BTreeMap::new();
    let mut nodes: Vec<(u16, &str)> = Vec::new();

    for claim in claims {
        match claim.resource {
            Resource::Pin(bank, pin) => {
                if let Some(owner) = pins.insert((bank, pin), &claim.module) {
                    problems.push(format!(
                        "{bank} pin {pin} claimed by both '{owner}' and '{}'",
                        claim.module
                    ));
                }
            }
            Resource::CanNode(base) => {
                for &(other, owner) in &nodes {
                    if base.abs_diff(other) < NODE_ID_SPAN {
                        problems.push(format!(
                            "CAN node 0x{base:03X} of '{}' overlaps node 0x{other:03X} of '{owner}'",
                            claim.module
                        ));
                    }
                }
                nodes.push((base, &claim.module));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;

    #[test]
    fn u4_claims_cover_every_module() {
        let profile = registry::resolve("u4").unwrap();
        let claims = claims(&profile);
        let owners: Vec<&str> = claims.iter().map(|c| c.module.as_str()).collect();
        for module in ["serial", "p0", "can", "estop", "bumper", "wheels", "y_axis", "tornado", "flashlight", "bms", "battery_control"] {
            assert!(owners.contains(&module), "{module} claims nothing");
        }
        assert!(claims.contains(&Claim {
            module: "tornado".into(),
            resource: Resource::CanNode(0x400)
        }));
    }

    #[test]
    fn same_pin_on_other_bank_is_not_a_collision() {
        let profile = registry::resolve("u2").unwrap();
        // z_axis step pin 5 sits on p0 while the chain axis step pin 5 is on core.
        assert!(problems(&profile).is_empty());
    }

    #[test]
    fn overlapping_can_ranges_collide() {
        let mut problems = Vec::new();
        let claims = [
            Claim {
                module: "wheels".into(),
                resource: Resource::CanNode(0x100),
            },
            Claim {
                module: "tornado".into(),
                resource: Resource::CanNode(0x110),
            },
        ];
        check_collisions(&claims, &mut problems);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("0x110"));
    }

    #[test]
    fn resource_display() {
        assert_eq!(Resource::Pin(Bank::Expander, 13).to_string(), "p0 pin 13");
        assert_eq!(Resource::CanNode(0x400).to_string(), "CAN node 0x400");
    }
}
