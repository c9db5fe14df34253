//! Runtime configuration, read from `~/.fieldos/config.toml` by the CLI.

use std::path::PathBuf;
use std::time::Duration;

use fieldos_kernel::SpeedCaps;
use fieldos_types::FieldError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Registry profile to assemble (`u1`…`u4`, `ff3`).
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Profile document to load instead of the registry entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_path: Option<PathBuf>,

    /// Assemble every module with its simulation backend.
    #[serde(default)]
    pub simulation: bool,

    #[serde(default = "default_serial_port")]
    pub serial_port: String,

    #[serde(default = "default_serial_baud")]
    pub serial_baud: u32,

    #[serde(default = "default_can_interface")]
    pub can_interface: String,

    /// Period of the safety poll; bounds stop latency.
    #[serde(default = "default_safety_period_ms")]
    pub safety_period_ms: u64,

    #[serde(default = "default_status_period_ms")]
    pub status_period_ms: u64,

    /// A bus that delivers nothing for this long is reported silent.
    #[serde(default = "default_link_timeout_ms")]
    pub link_timeout_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_linear_speed: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_angular_speed: Option<f64>,
}

fn default_profile() -> String {
    "u4".to_string()
}
fn default_serial_port() -> String {
    "/dev/ttyTHS0".to_string()
}
fn default_serial_baud() -> u32 {
    115_200
}
fn default_can_interface() -> String {
    "can0".to_string()
}
fn default_safety_period_ms() -> u64 {
    20
}
fn default_status_period_ms() -> u64 {
    100
}
fn default_link_timeout_ms() -> u64 {
    2_000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            profile_path: None,
            simulation: false,
            serial_port: default_serial_port(),
            serial_baud: default_serial_baud(),
            can_interface: default_can_interface(),
            safety_period_ms: default_safety_period_ms(),
            status_period_ms: default_status_period_ms(),
            link_timeout_ms: default_link_timeout_ms(),
            max_linear_speed: None,
            max_angular_speed: None,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, FieldError> {
        let config: Self =
            toml::from_str(text).map_err(|e| FieldError::Config(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), FieldError> {
        if self.profile.trim().is_empty() && self.profile_path.is_none() {
            return Err(FieldError::Config("no profile selected".into()));
        }
        for (label, value) in [
            ("safety_period_ms", self.safety_period_ms),
            ("status_period_ms", self.status_period_ms),
            ("link_timeout_ms", self.link_timeout_ms),
        ] {
            if value == 0 {
                return Err(FieldError::Config(format!("{label} must be positive")));
            }
        }
        for (label, cap) in [
            ("max_linear_speed", self.max_linear_speed),
            ("max_angular_speed", self.max_angular_speed),
        ] {
            if let Some(cap) = cap.filter(|c| !c.is_finite() || *c <= 0.0) {
                return Err(FieldError::Config(format!("{label} must be positive, got {cap}")));
            }
        }
        Ok(())
    }

    /// Apply `FIELDOS_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `FIELDOS_PROFILE` | `profile` |
    /// | `FIELDOS_SIMULATION` | `simulation` (`1`/`true`/`0`/`false`) |
    /// | `FIELDOS_SERIAL_PORT` | `serial_port` |
    /// | `FIELDOS_CAN_INTERFACE` | `can_interface` |
    ///
    /// Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FIELDOS_PROFILE") {
            self.profile = v;
        }
        if let Some(v) = lookup("FIELDOS_SIMULATION")
            && let Some(flag) = parse_flag(&v)
        {
            self.simulation = flag;
        }
        if let Some(v) = lookup("FIELDOS_SERIAL_PORT") {
            self.serial_port = v;
        }
        if let Some(v) = lookup("FIELDOS_CAN_INTERFACE") {
            self.can_interface = v;
        }
    }

    pub fn safety_period(&self) -> Duration {
        Duration::from_millis(self.safety_period_ms)
    }

    pub fn status_period(&self) -> Duration {
        Duration::from_millis(self.status_period_ms)
    }

    pub fn link_timeout(&self) -> Duration {
        Duration::from_millis(self.link_timeout_ms)
    }

    pub fn speed_caps(&self) -> SpeedCaps {
        SpeedCaps {
            max_linear: self.max_linear_speed,
            max_angular: self.max_angular_speed,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.safety_period(), Duration::from_millis(20));
        assert_eq!(config.speed_caps(), SpeedCaps::default());
    }

    #[test]
    fn document_fields_override_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            profile = "ff3"
            simulation = true
            safety_period_ms = 10
            max_linear_speed = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(config.profile, "ff3");
        assert!(config.simulation);
        assert_eq!(config.safety_period_ms, 10);
        assert_eq!(config.speed_caps().max_linear, Some(0.8));
        assert_eq!(config.can_interface, "can0");
    }

    #[test]
    fn invalid_values_are_config_errors() {
        assert!(matches!(
            RuntimeConfig::from_toml_str("safety_period_ms = 0"),
            Err(FieldError::Config(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_toml_str("max_angular_speed = -1.0"),
            Err(FieldError::Config(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_toml_str("simulation = \"maybe\""),
            Err(FieldError::Config(_))
        ));
    }

    #[test]
    fn overrides_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("FIELDOS_PROFILE", "u2"),
            ("FIELDOS_SIMULATION", "true"),
            ("FIELDOS_SERIAL_PORT", "/dev/ttyUSB0"),
            ("FIELDOS_CAN_INTERFACE", "vcan0"),
        ]);
        let mut config = RuntimeConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.profile, "u2");
        assert!(config.simulation);
        assert_eq!(config.serial_port, "/dev/ttyUSB0");
        assert_eq!(config.can_interface, "vcan0");
    }

    #[test]
    fn unparseable_simulation_flag_is_ignored() {
        let mut config = RuntimeConfig::default();
        config.apply_overrides(|key| (key == "FIELDOS_SIMULATION").then(|| "perhaps".to_string()));
        assert!(!config.simulation);
    }
}
