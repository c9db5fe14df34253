//! Line protocol spoken with the core and expander controllers.
//!
//! Every message is one ASCII line prefixed with the pin bank it addresses
//! (`core` or `p0`).  Commands flow host → controller, reports flow
//! controller → host:
//!
//! ```text
//! core.out 12 1                  p0.in 22 0
//! p0.pwm 2 0.750                 core.stepper y_axis 33334 idle
//! core.stepper y_axis move 33334 80000
//! p0.bms 87.5 25.1 0             core.softstop 1
//! ```

use std::fmt;

use crate::BusError;

/// GPIO namespace a pin number belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bank {
    /// Pins of the core controller.
    Core,
    /// Pins of the expander controller behind the serial link.
    Expander,
}

impl Bank {
    pub fn prefix(self) -> &'static str {
        match self {
            Bank::Core => "core",
            Bank::Expander => "p0",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "core" => Some(Bank::Core),
            "p0" => Some(Bank::Expander),
            _ => None,
        }
    }

    /// Select the bank from a profile's `on_expander` flag.
    pub fn on_expander(flag: bool) -> Self {
        if flag { Bank::Expander } else { Bank::Core }
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Drive status reported for a stepper axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepperStatus {
    Idle,
    Moving,
    Homing,
    Alarm,
}

impl StepperStatus {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "idle" => Some(StepperStatus::Idle),
            "moving" => Some(StepperStatus::Moving),
            "homing" => Some(StepperStatus::Homing),
            "alarm" => Some(StepperStatus::Alarm),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepperStatus::Idle => "idle",
            StepperStatus::Moving => "moving",
            StepperStatus::Homing => "homing",
            StepperStatus::Alarm => "alarm",
        }
    }
}

/// Host → controller message.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SerialSetup { rx: u8, tx: u8, baud: u32, num: u8 },
    ExpanderSetup { boot: u8, enable: u8 },
    Output { bank: Bank, pin: u8, level: bool },
    Pwm { bank: Bank, pin: u8, duty: f64 },
    Watch { bank: Bank, pin: u8 },
    StepperSetup {
        bank: Bank,
        name: String,
        step: u8,
        dir: u8,
        alarm: u8,
        ccw: bool,
    },
    StepperHome { bank: Bank, name: String, speed: u32 },
    StepperMove {
        bank: Bank,
        name: String,
        steps: i64,
        speed: u32,
    },
    StepperStop { bank: Bank, name: String },
    BmsSetup {
        bank: Bank,
        rx: u8,
        tx: u8,
        baud: u32,
        num: u8,
    },
    SoftStop { active: bool },
}

impl Command {
    /// Render the command as a protocol line (without the newline).
    pub fn to_line(&self) -> String {
        match self {
            Command::SerialSetup { rx, tx, baud, num } => {
                format!("core.serial {rx} {tx} {baud} {num}")
            }
            Command::ExpanderSetup { boot, enable } => format!("p0.setup {boot} {enable}"),
            Command::Output { bank, pin, level } => format!("{bank}.out {pin} {}", u8::from(*level)),
            Command::Pwm { bank, pin, duty } => format!("{bank}.pwm {pin} {duty:.3}"),
            Command::Watch { bank, pin } => format!("{bank}.watch {pin}"),
            Command::StepperSetup {
                bank,
                name,
                step,
                dir,
                alarm,
                ccw,
            } => format!(
                "{bank}.stepper {name} setup {step} {dir} {alarm} {}",
                u8::from(*ccw)
            ),
            Command::StepperHome { bank, name, speed } => {
                format!("{bank}.stepper {name} home {speed}")
            }
            Command::StepperMove {
                bank,
                name,
                steps,
                speed,
            } => format!("{bank}.stepper {name} move {steps} {speed}"),
            Command::StepperStop { bank, name } => format!("{bank}.stepper {name} stop"),
            Command::BmsSetup {
                bank,
                rx,
                tx,
                baud,
                num,
            } => format!("{bank}.bms setup {rx} {tx} {baud} {num}"),
            Command::SoftStop { active } => format!("core.softstop {}", u8::from(*active)),
        }
    }
}

/// Controller → host message.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Input { bank: Bank, pin: u8, level: bool },
    Stepper {
        bank: Bank,
        name: String,
        steps: i64,
        status: StepperStatus,
    },
    Battery {
        bank: Bank,
        percent: f32,
        voltage: f32,
        charging: bool,
    },
}

impl Report {
    /// Parse one received line.
    pub fn parse(line: &str) -> Result<Self, BusError> {
        let malformed = || BusError::Protocol(format!("malformed report '{line}'"));
        let mut tokens = line.split_whitespace();
        let head = tokens.next().ok_or_else(malformed)?;
        let (prefix, kind) = head.split_once('.').ok_or_else(malformed)?;
        let bank = Bank::from_prefix(prefix).ok_or_else(malformed)?;
        let args: Vec<&str> = tokens.collect();

        match (kind, args.as_slice()) {
            ("in", [pin, level]) => Ok(Report::Input {
                bank,
                pin: pin.parse().map_err(|_| malformed())?,
                level: parse_flag(level).ok_or_else(malformed)?,
            }),
            ("stepper", [name, steps, status]) => Ok(Report::Stepper {
                bank,
                name: (*name).to_string(),
                steps: steps.parse().map_err(|_| malformed())?,
                status: StepperStatus::parse(status).ok_or_else(malformed)?,
            }),
            ("bms", [percent, voltage, charging]) => Ok(Report::Battery {
                bank,
                percent: percent.parse().map_err(|_| malformed())?,
                voltage: voltage.parse().map_err(|_| malformed())?,
                charging: parse_flag(charging).ok_or_else(malformed)?,
            }),
            _ => Err(malformed()),
        }
    }
}

fn parse_flag(token: &str) -> Option<bool> {
    match token {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}
