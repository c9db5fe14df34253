//! Reads/writes `~/.fieldos/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use fieldos_runtime::RuntimeConfig;
use fieldos_types::FieldError;

/// `FIELDOS_CONFIG` if set, otherwise `~/.fieldos/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_with(|key| std::env::var(key).ok())
}

pub(crate) fn config_path_with(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = lookup("FIELDOS_CONFIG") {
        return PathBuf::from(path);
    }
    let home = lookup("HOME")
        .or_else(|| lookup("USERPROFILE"))
        .unwrap_or_else(|| ".".to_string());
    PathBuf::from(home).join(".fieldos").join("config.toml")
}

/// Load the config, falling back to defaults when the file does not exist,
/// then apply `FIELDOS_*` overrides.
pub fn load() -> Result<RuntimeConfig, FieldError> {
    let mut config = load_from(&config_path())?.unwrap_or_default();
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<RuntimeConfig>, FieldError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        FieldError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    RuntimeConfig::from_toml_str(&raw).map(Some)
}

/// Save the config, creating the parent directory if necessary.
pub fn save_to(config: &RuntimeConfig, path: &Path) -> Result<(), FieldError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| FieldError::Config(format!("failed to create config directory: {e}")))?;
        // Owner only (rwx------).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                FieldError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(config)
        .map_err(|e| FieldError::Config(format!("failed to serialize config: {e}")))?;
    let write_error =
        |e: std::io::Error| FieldError::Config(format!("failed to write {}: {e}", path.display()));
    // Owner read/write only (rw-------).
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_error)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_in(dir: &tempfile::TempDir) -> PathBuf {
        let home = dir.path().to_string_lossy().to_string();
        config_path_with(|key| (key == "HOME").then(|| home.clone()))
    }

    #[test]
    fn config_path_points_to_fieldos_dir() {
        let p = config_path_with(|key| (key == "HOME").then(|| "/home/operator".to_string()));
        assert_eq!(p, PathBuf::from("/home/operator/.fieldos/config.toml"));
    }

    #[test]
    fn explicit_config_path_wins() {
        let p = config_path_with(|key| match key {
            "FIELDOS_CONFIG" => Some("/etc/fieldos.toml".to_string()),
            "HOME" => Some("/home/operator".to_string()),
            _ => None,
        });
        assert_eq!(p, PathBuf::from("/etc/fieldos.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        assert!(load_from(&path_in(&dir)).expect("no error").is_none());
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = path_in(&dir);
        let config = RuntimeConfig {
            profile: "ff3".into(),
            simulation: true,
            max_linear_speed: Some(0.6),
            ..RuntimeConfig::default()
        };
        save_to(&config, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, config);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "safety_period_ms = \"fast\"").expect("write");
        assert!(matches!(load_from(&path), Err(FieldError::Config(_))));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = path_in(&dir);
        save_to(&RuntimeConfig::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }
}
