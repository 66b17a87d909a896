//! Configuration file discovery and loading
//!
//! Config file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`<config dir>/parrot/config.toml`)
//! 4. None: callers fall back to built-in defaults

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "PARROT_CONFIG";

/// Resolve which config file to read, if any
///
/// An explicitly requested file (CLI or environment) is returned even if it
/// does not exist, so that loading reports a clear error. The per-user
/// default is only returned when present.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user config file
    default_config_file().filter(|p| p.exists())
}

/// Platform default config file location
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("parrot").join("config.toml"))
}

/// Load and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            Error::NotFound(format!("Config file not found: {}", path.display()))
        }
        _ => Error::Io(e),
    })?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Load a TOML config if one resolves, otherwise return `T::default()`
pub fn load_or_default<T: DeserializeOwned + Default>(
    cli_arg: Option<&Path>,
    env_var_name: &str,
) -> Result<T> {
    match resolve_config_path(cli_arg, env_var_name) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading configuration file");
            load_toml(&path)
        }
        None => {
            tracing::debug!("No configuration file found, using built-in defaults");
            Ok(T::default())
        }
    }
}
