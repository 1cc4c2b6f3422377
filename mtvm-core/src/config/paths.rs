//! Platform default locations.
//!
//! - Settings: `{config}/mtvm/config.json`
//! - Plugin registry: `{config}/mtvm/plugins.json`
//! - Native plugins: `{config}/mtvm/plugins/`
//! - Installed versions: `{data}/mtvm/tools/`
//! - Active-version links: `{data}/mtvm/bin/`
//!
//! `{config}` and `{data}` come from the `dirs` crate, e.g. `~/.config` and
//! `~/.local/share` on Linux.

use std::path::PathBuf;

use anyhow::anyhow;

use super::settings::Configuration;
use crate::error::Result;

/// Subdirectory name under the platform config/data directories.
const APP_DIR: &str = "mtvm";

/// Returns `{config}/mtvm`.
pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or_else(|| anyhow!("could not determine the user configuration directory").into())
}

/// Returns `{data}/mtvm`.
pub fn data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or_else(|| anyhow!("could not determine the user data directory").into())
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

/// Path of the plugin registry file.
pub fn registry_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("plugins.json"))
}

/// The configuration used when `config.json` sets nothing.
pub fn default_configuration() -> Result<Configuration> {
    let data = data_dir()?;
    Ok(Configuration::new(
        data.join("tools"),
        config_dir()?.join("plugins"),
        data.join("bin"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lives_next_to_settings() {
        let (Ok(registry), Ok(settings)) = (registry_path(), settings_path()) else {
            // No home directory in this environment.
            return;
        };
        assert_eq!(registry.parent(), settings.parent());
        assert!(registry.ends_with("mtvm/plugins.json"));
    }

    #[test]
    fn test_defaults_are_distinct_directories() {
        let Ok(config) = default_configuration() else {
            return;
        };
        assert_ne!(config.install_dir, config.path_dir);
        assert!(config.plugin_dir.ends_with("plugins"));
    }
}
