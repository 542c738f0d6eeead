use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::debug;
use serde::de::DeserializeOwned;

pub const PROGRAM_NAME: &str = "tsload";
pub const PROGRAM_LOG_LEVEL: &str = "TSLOAD_LOG_LEVEL";
/// Log to this file instead of stderr.
pub const PROGRAM_LOG_FILE: &str = "TSLOAD_LOG_FILE";
/// Overrides the config file location when `--config` is not given.
pub const CONFIG_ENV: &str = "TSLOAD_CONFIG";
pub const CONFIG_FILE_NAME: &str = "config.json";

pub fn xdg_or_home(xdg_var: &str, home_suffix: &str) -> PathBuf {
    if let Some(dir) = std::env::var_os(xdg_var)
        && !dir.is_empty()
    {
        PathBuf::from(dir)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(home_suffix)
    }
}

/// Directory holding the program's config file.
pub fn config_dir() -> PathBuf {
    xdg_or_home("XDG_CONFIG_HOME", ".config").join(PROGRAM_NAME)
}

/// Config file path: `$TSLOAD_CONFIG`, else `<config_dir>/config.json`.
pub fn default_config_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => config_dir().join(CONFIG_FILE_NAME),
    }
}

/// Read a JSON config file into `T`.
///
/// A missing file is not an error and yields `None`, so callers can fall back
/// to defaults. Malformed JSON is reported as `InvalidData`.
pub fn load_json_config<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("no config file at {}", path.display());
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let value = serde_json::from_str(&raw).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid config file {}: {e}", path.display()),
        )
    })?;

    debug!("loaded config from {}", path.display());
    Ok(Some(value))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
