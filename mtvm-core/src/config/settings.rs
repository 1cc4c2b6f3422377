//! Directory configuration for mtvm.
//!
//! [`Configuration`] is the explicit value threaded into every component.
//! [`Settings`] is its on-disk form (`config.json`), where every key is
//! optional and falls back to the platform defaults from [`super::paths`].

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::paths;
use crate::error::{Error, Result};
use crate::fs::FileSystem;

// =============================================================================
// Configuration
// =============================================================================

/// The directories mtvm works in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    /// Root of installed tool versions: `install_dir/<tool>/<version>`.
    pub install_dir: PathBuf,
    /// Where native plugin modules live.
    pub plugin_dir: PathBuf,
    /// Directory holding the stable links to active versions.
    pub path_dir: PathBuf,
}

impl Configuration {
    pub fn new(
        install_dir: impl Into<PathBuf>,
        plugin_dir: impl Into<PathBuf>,
        path_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            install_dir: install_dir.into(),
            plugin_dir: plugin_dir.into(),
            path_dir: path_dir.into(),
        }
    }

    /// `install_dir/<tool>`
    pub fn tool_dir(&self, tool: &str) -> PathBuf {
        self.install_dir.join(tool)
    }

    /// `install_dir/<tool>/<version>`
    pub fn version_dir(&self, tool: &str, version: &str) -> PathBuf {
        self.tool_dir(tool).join(version)
    }
}

// =============================================================================
// Settings file
// =============================================================================

/// Contents of `config.json`. Missing keys use platform defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_dir: Option<PathBuf>,
}

impl Settings {
    /// Loads settings from `path`.
    ///
    /// A missing file yields default settings; a malformed file is an error.
    pub fn load_from(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        let data = match fs.read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::io(path, e)),
        };

        serde_json::from_slice(&data).map_err(|source| Error::Json {
            context: path.display().to_string(),
            source,
        })
    }

    /// Fills unset keys from `defaults`.
    pub fn resolve(self, defaults: Configuration) -> Configuration {
        Configuration {
            install_dir: self.install_dir.unwrap_or(defaults.install_dir),
            plugin_dir: self.plugin_dir.unwrap_or(defaults.plugin_dir),
            path_dir: self.path_dir.unwrap_or(defaults.path_dir),
        }
    }
}

/// Loads `config.json` from the platform config directory and applies defaults.
pub fn load_configuration(fs: &dyn FileSystem) -> Result<Configuration> {
    let settings = Settings::load_from(fs, &paths::settings_path()?)?;
    Ok(settings.resolve(paths::default_configuration()?))
}

// =============================================================================
// Tests
// =============================================================================
