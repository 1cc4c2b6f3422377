//! Plugins compiled into the binary.

use std::path::PathBuf;
use std::sync::Arc;

use super::capability::{CapabilityProvider, Plugin};
use super::golang::GoPlugin;
use crate::download::Downloader;
use crate::error::Result;
use crate::fs::FileSystem;

/// Names served by [`BuiltinPlugins`].
pub const BUILTIN_PLUGINS: &[&str] = &["go"];

/// The statically linked plugin table.
pub struct BuiltinPlugins {
    fs: Arc<dyn FileSystem>,
    downloader: Downloader,
    staging_dir: PathBuf,
}

impl BuiltinPlugins {
    /// `staging_dir` holds downloaded archives until they are installed.
    pub fn new(fs: Arc<dyn FileSystem>, downloader: Downloader, staging_dir: PathBuf) -> Self {
        Self {
            fs,
            downloader,
            staging_dir,
        }
    }
}

impl CapabilityProvider for BuiltinPlugins {
    fn label(&self) -> &'static str {
        "built-in"
    }

    fn provide(&self, name: &str) -> Result<Option<Arc<dyn Plugin>>> {
        let plugin: Arc<dyn Plugin> = match name {
            "go" => Arc::new(GoPlugin::new(
                Arc::clone(&self.fs),
                self.downloader.clone(),
                self.staging_dir.clone(),
            )),
            _ => return Ok(None),
        };
        Ok(Some(plugin))
    }
}
