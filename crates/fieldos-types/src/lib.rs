use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Aggregate state of the safety interlock.
///
/// `HardStopped` always wins over `SoftStopped` when both kinds of stop
/// source are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyState {
    /// No stop source active; motion commands pass through.
    Armed,
    /// Only software stop sources are active; resettable by command.
    SoftStopped,
    /// A physical stop source (button, bumper) is active.
    HardStopped,
}

impl SafetyState {
    /// Derive the state from the two kinds of stop source.
    pub fn from_sources(hard_active: bool, soft_active: bool) -> Self {
        if hard_active {
            SafetyState::HardStopped
        } else if soft_active {
            SafetyState::SoftStopped
        } else {
            SafetyState::Armed
        }
    }

    pub fn is_armed(self) -> bool {
        self == SafetyState::Armed
    }
}

impl fmt::Display for SafetyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyState::Armed => write!(f, "armed"),
            SafetyState::SoftStopped => write!(f, "soft-stopped"),
            SafetyState::HardStopped => write!(f, "hard-stopped"),
        }
    }
}

/// Motion state of a single tool axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisMotion {
    /// Absolute position not established.
    Unknown,
    /// Reference run in progress.
    Homing,
    /// Homed and idle.
    Referenced,
    /// Homed and travelling towards a target.
    Moving,
    /// Alarm reported by the drive; only a new reference run leaves this state.
    Fault,
}

impl fmt::Display for AxisMotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AxisMotion::Unknown => "unknown",
            AxisMotion::Homing => "homing",
            AxisMotion::Referenced => "referenced",
            AxisMotion::Moving => "moving",
            AxisMotion::Fault => "fault",
        };
        f.write_str(label)
    }
}

/// Whether a stop source is tied to a physical condition or to software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    Hard,
    Soft,
}

/// Battery snapshot reported by a battery management system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    pub percent: f32,
    pub voltage: f32,
    pub is_charging: bool,
}

/// Unified event wrapper for the robot's notification bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "fieldos-kernel::safety"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A stop source became active and every actuator has been told to stop.
    EstopTriggered {
        state: SafetyState,
        sources: BTreeMap<String, bool>,
    },
    /// All stop sources cleared; the interlock is armed again.
    EstopReleased,
    /// A module or bus reported a problem that did not crash the process.
    ModuleFault { module: String, message: String },
    Telemetry(TelemetryData),
}

/// Periodic status snapshot published by the status poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryData {
    pub safety: SafetyState,
    pub linear_velocity: f64,
    pub angular_velocity: f64,
    pub axes: BTreeMap<String, f64>,
    pub battery: Option<BatteryState>,
    /// Bus links past their watchdog deadline, sorted by name.
    #[serde(default)]
    pub silent_links: Vec<String>,
}

/// Error taxonomy shared by every FieldOS crate.
///
/// Startup errors ([`FieldError::is_fatal`]) stop the robot from being
/// assembled; everything else is returned per command and left to the caller.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldError {
    #[error("Unknown robot profile '{0}'")]
    UnknownProfile(String),

    #[error("Invalid profile '{profile}': {details}")]
    InvalidProfile { profile: String, details: String },

    #[error("Bus '{bus}' failed to initialise: {details}")]
    BusInit { bus: String, details: String },

    #[error("Bus '{bus}' error: {details}")]
    Bus { bus: String, details: String },

    #[error("Axis '{axis}' is not homed")]
    NotHomed { axis: String },

    #[error("Axis '{axis}' is in fault")]
    AxisFault { axis: String },

    #[error("Axis '{axis}' target {target} outside [{min}, {max}]")]
    OutOfRange {
        axis: String,
        target: f64,
        min: f64,
        max: f64,
    },

    #[error("Safety interlock: robot is {state}")]
    SafetyInterlock { state: SafetyState },

    #[error("Invalid command for '{component}': {details}")]
    InvalidCommand { component: String, details: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FieldError {
    /// `true` for misconfiguration detected at startup; the robot must not run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FieldError::UnknownProfile(_)
                | FieldError::InvalidProfile { .. }
                | FieldError::BusInit { .. }
                | FieldError::Config(_)
        )
    }

    pub fn invalid_command(component: &str, details: impl Into<String>) -> Self {
        FieldError::InvalidCommand {
            component: component.to_string(),
            details: details.into(),
        }
    }
}

/// Reject non-finite command values before they reach a bus.
pub fn ensure_finite(component: &str, label: &str, value: f64) -> Result<(), FieldError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(FieldError::invalid_command(
            component,
            format!("{label} must be finite, got {value}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_source_takes_precedence() {
        assert_eq!(SafetyState::from_sources(true, true), SafetyState::HardStopped);
        assert_eq!(SafetyState::from_sources(true, false), SafetyState::HardStopped);
        assert_eq!(SafetyState::from_sources(false, true), SafetyState::SoftStopped);
        assert_eq!(SafetyState::from_sources(false, false), SafetyState::Armed);
    }

    #[test]
    fn event_roundtrip() {
        let mut sources = BTreeMap::new();
        sources.insert("estop_1".to_string(), true);
        sources.insert("soft".to_string(), false);
        let event = Event::new(
            "fieldos-kernel::safety",
            EventPayload::EstopTriggered {
                state: SafetyState::HardStopped,
                sources,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        match back.payload {
            EventPayload::EstopTriggered { state, sources } => {
                assert_eq!(state, SafetyState::HardStopped);
                assert_eq!(sources.get("estop_1"), Some(&true));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn fatal_classification() {
        assert!(FieldError::UnknownProfile("x9".into()).is_fatal());
        assert!(
            FieldError::BusInit {
                bus: "serial".into(),
                details: "no device".into()
            }
            .is_fatal()
        );
        assert!(!FieldError::NotHomed { axis: "y_axis".into() }.is_fatal());
        assert!(
            !FieldError::SafetyInterlock {
                state: SafetyState::SoftStopped
            }
            .is_fatal()
        );
    }

    #[test]
    fn field_error_display() {
        let err = FieldError::OutOfRange {
            axis: "y_axis".into(),
            target: 0.2,
            min: -0.12,
            max: 0.12,
        };
        let text = err.to_string();
        assert!(text.contains("y_axis"));
        assert!(text.contains("0.2"));

        let err = FieldError::SafetyInterlock {
            state: SafetyState::HardStopped,
        };
        assert!(err.to_string().contains("hard-stopped"));
    }

    #[test]
    fn ensure_finite_rejects_nan() {
        assert!(ensure_finite("wheels", "linear", 0.3).is_ok());
        assert!(matches!(
            ensure_finite("wheels", "linear", f64::NAN),
            Err(FieldError::InvalidCommand { .. })
        ));
    }
}
