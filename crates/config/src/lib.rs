//! Configuration directory helpers for tempmail
//!
//! Provides utilities for loading and saving JSON files in the shared
//! tempmail config directory (~/.config/tempmail/).
//!
//! The directory can be relocated with the `TEMPMAIL_CONFIG_DIR` environment
//! variable, which is how deployments point the relay at a mounted volume.
//!
//! Call [`init`] at application startup to bootstrap the config directory.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "TEMPMAIL_CONFIG_DIR";

/// Initialize the tempmail config directory.
///
/// Creates the directory if it doesn't exist and returns its path.
pub fn init() -> Result<PathBuf> {
    ensure_config_dir()
}

/// Get the tempmail config directory
pub fn config_dir() -> Option<PathBuf> {
    resolve_config_dir(std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from))
}

fn resolve_config_dir(override_dir: Option<PathBuf>) -> Option<PathBuf> {
    match override_dir {
        Some(dir) if !dir.as_os_str().is_empty() => Some(dir),
        _ => dirs::config_dir().map(|p| p.join("tempmail")),
    }
}

/// Get the path to a file within the config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Load and parse a JSON file from the config directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Check if a file exists in the config directory
pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.exists())
}

/// Ensure the config directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir)
}

/// Save a value as pretty JSON to an arbitrary path.
///
/// The file is replaced atomically: content goes to a sibling temp file
/// which is then renamed over the target, so readers never observe a
/// half-written document.
pub fn save_json_file<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let content = serde_json::to_string_pretty(value)?;
    let tmp = tmp_path(path);
    fs::write(&tmp, content)
        .with_context(|| format!("Failed to write file: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace file: {}", path.display()))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
