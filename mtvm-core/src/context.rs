//! The shared handles every command runs with.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Configuration;
use crate::download::Downloader;
use crate::fs::FileSystem;
use crate::plugins::{BuiltinPlugins, NativePlugins, Platform, PluginRegistry, PluginResolver};

/// Configuration plus the filesystem, downloader and registry built on it.
/// Cheap to clone.
#[derive(Clone)]
pub struct Context {
    pub config: Configuration,
    pub fs: Arc<dyn FileSystem>,
    pub downloader: Downloader,
    pub registry: PluginRegistry,
    /// Platform plugin builds are selected for.
    pub platform: Platform,
}

impl Context {
    pub fn new(config: Configuration, fs: Arc<dyn FileSystem>, registry_path: PathBuf) -> Self {
        Self {
            downloader: Downloader::new(Arc::clone(&fs)),
            registry: PluginRegistry::new(Arc::clone(&fs), registry_path),
            platform: Platform::current(),
            config,
            fs,
        }
    }

    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = downloader;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Where built-in plugins stage archives between download and install.
    pub fn staging_dir(&self) -> PathBuf {
        self.config.install_dir.join(".downloads")
    }

    /// Built-in plugins first, then native modules from `plugin_dir`.
    pub fn resolver(&self) -> PluginResolver {
        PluginResolver::new()
            .with_provider(BuiltinPlugins::new(
                Arc::clone(&self.fs),
                self.downloader.clone(),
                self.staging_dir(),
            ))
            .with_provider(NativePlugins::new(
                Arc::clone(&self.fs),
                self.config.plugin_dir.clone(),
            ))
    }
}
