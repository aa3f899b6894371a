//! Configuration file loading for Sight services
//!
//! Each service reads an optional TOML file, then applies environment
//! variable overrides on top. Resolution priority:
//! 1. Command-line argument (highest)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Resolve the config file path for a service.
///
/// Checks an explicit path first, then `$XDG_CONFIG_HOME/sight/<service>.toml`
/// (or the platform equivalent). Returns `None` when no file exists; services
/// fall back to compiled defaults.
pub fn config_file_path(service: &str, explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let candidate = dirs::config_dir().map(|d| d.join("sight").join(format!("{}.toml", service)))?;
    if candidate.exists() {
        Some(candidate)
    } else {
        None
    }
}

/// Read and parse a TOML config file
pub fn read_toml_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Write a config value to a TOML file atomically (temp file + rename)
pub fn write_toml_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;

    Ok(())
}

/// Read an environment variable, treating empty values as unset
pub fn env_override(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}
