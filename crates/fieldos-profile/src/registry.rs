//! Built-in robot variants.
//!
//! Profiles are embedded TOML documents.  Adding a variant that reuses known
//! module types means adding a file under `profiles/` and a line below.

use std::path::Path;

use fieldos_types::FieldError;
use tracing::{debug, info};

use crate::model::RobotProfile;
use crate::validate;

const PROFILES: &[(&str, &str)] = &[
    ("u1", include_str!("../profiles/u1.toml")),
    ("u2", include_str!("../profiles/u2.toml")),
    ("u3", include_str!("../profiles/u3.toml")),
    ("u4", include_str!("../profiles/u4.toml")),
    ("ff3", include_str!("../profiles/ff3.toml")),
];

/// Names of all built-in profiles.
pub fn names() -> impl Iterator<Item = &'static str> {
    PROFILES.iter().map(|(name, _)| *name)
}

/// Look up and validate a built-in profile.
pub fn resolve(name: &str) -> Result<RobotProfile, FieldError> {
    let (_, text) = PROFILES
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .ok_or_else(|| FieldError::UnknownProfile(name.to_string()))?;
    let profile = parse(name, text)?;
    info!(profile = name, "resolved robot profile");
    Ok(profile)
}

/// Parse and validate arbitrary profile text.
pub fn parse(name: &str, text: &str) -> Result<RobotProfile, FieldError> {
    let invalid = |details: String| FieldError::InvalidProfile {
        profile: name.to_string(),
        details,
    };

    let mut profile: RobotProfile = toml::from_str(text).map_err(|e| invalid(e.message().to_string()))?;
    profile.name = name.to_string();

    let problems = validate::problems(&profile);
    if !problems.is_empty() {
        return Err(invalid(problems.join("; ")));
    }
    debug!(
        profile = name,
        y_axis = profile.y_axis.version(),
        z_axis = profile.z_axis.version(),
        "profile validated"
    );
    Ok(profile)
}

/// Load an operator-supplied profile; the file stem becomes its name.
pub fn load_file(path: &Path) -> Result<RobotProfile, FieldError> {
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("custom")
        .to_string();
    let text = std::fs::read_to_string(path).map_err(|e| FieldError::InvalidProfile {
        profile: name.clone(),
        details: format!("failed to read {}: {e}", path.display()),
    })?;
    parse(&name, &text)
}
