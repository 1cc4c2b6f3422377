//! Dynamically loaded plugins.
//!
//! A native plugin is a shared library named `<plugin><DLL_SUFFIX>` in the
//! plugin directory (`go.so`, `zig.dylib`, `node.dll`, ...). It must export
//! `mtvm_plugin_create`, which is easiest to produce with [`declare_plugin!`].
//!
//! Plugins are Rust trait objects crossing a library boundary, so a module
//! must be built with the same compiler and `mtvm-core` version as the host.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use libloading::{Library, Symbol};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::capability::{CapabilityProvider, Plugin};
use crate::download::{Finished, ProgressSender};
use crate::error::{Error, Missing, Result};
use crate::fs::FileSystem;

/// Platform shared-library suffix, including the dot.
pub const LIBRARY_EXTENSION: &str = std::env::consts::DLL_SUFFIX;

/// Name of the constructor every native plugin exports.
pub const CREATE_SYMBOL: &[u8] = b"mtvm_plugin_create\0";

/// Signature of [`CREATE_SYMBOL`]. The returned pointer owns a boxed plugin.
pub type CreatePlugin = unsafe extern "C" fn() -> *mut Box<dyn Plugin>;

/// `plugin_dir/<name><LIBRARY_EXTENSION>`
pub fn plugin_path(plugin_dir: &Path, name: &str) -> PathBuf {
    plugin_dir.join(format!("{}{}", name, LIBRARY_EXTENSION))
}

/// Exports a plugin constructor from a `cdylib` crate.
///
/// ```ignore
/// mtvm_core::declare_plugin!(ZigPlugin, ZigPlugin::default);
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($plugin_type:ty, $constructor:path) => {
        #[no_mangle]
        pub extern "C" fn mtvm_plugin_create() -> *mut Box<dyn $crate::plugins::Plugin> {
            let plugin: $plugin_type = $constructor();
            let boxed: Box<dyn $crate::plugins::Plugin> = Box::new(plugin);
            Box::into_raw(Box::new(boxed))
        }
    };
}

// ============================================================================
// Provider
// ============================================================================

/// Loads plugins from shared libraries in `plugin_dir`.
pub struct NativePlugins {
    fs: Arc<dyn FileSystem>,
    plugin_dir: PathBuf,
}

impl NativePlugins {
    pub fn new(fs: Arc<dyn FileSystem>, plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            plugin_dir: plugin_dir.into(),
        }
    }
}

impl CapabilityProvider for NativePlugins {
    fn label(&self) -> &'static str {
        "native"
    }

    fn provide(&self, name: &str) -> Result<Option<Arc<dyn Plugin>>> {
        let path = plugin_path(&self.plugin_dir, name);
        if !self.fs.exists(&path).map_err(|e| Error::io(&path, e))? {
            debug!("No native plugin at {}", path.display());
            return Ok(None);
        }

        // SAFETY: the module is trusted to export `CREATE_SYMBOL` with the
        // `CreatePlugin` signature, which `declare_plugin!` guarantees.
        let plugin = unsafe { NativePlugin::load(&path)? };
        Ok(Some(Arc::new(plugin)))
    }
}

// ============================================================================
// Loaded plugin
// ============================================================================

/// A plugin together with the library that contains its code.
pub struct NativePlugin {
    // Declared before `_library` so it is dropped first.
    plugin: Box<dyn Plugin>,
    _library: Library,
}

impl NativePlugin {
    /// Loads the library at `path` and instantiates its plugin.
    ///
    /// # Safety
    ///
    /// The library must export [`CREATE_SYMBOL`] with the [`CreatePlugin`]
    /// signature and be built against the same `mtvm-core` and compiler.
    pub unsafe fn load(path: &Path) -> Result<Self> {
        let load_error = |reason: String| Error::PluginLoad {
            path: path.to_path_buf(),
            reason,
        };

        let library = Library::new(path).map_err(|e| load_error(e.to_string()))?;

        let raw = {
            let create: Symbol<CreatePlugin> = library
                .get(CREATE_SYMBOL)
                .map_err(|e| load_error(format!("missing mtvm_plugin_create: {}", e)))?;
            create()
        };
        if raw.is_null() {
            return Err(load_error("mtvm_plugin_create returned null".to_string()));
        }
        let plugin = *Box::from_raw(raw);

        info!("Loaded native plugin from {}", path.display());

        Ok(Self {
            plugin,
            _library: library,
        })
    }
}

#[async_trait]
impl Plugin for NativePlugin {
    async fn latest_version(&self) -> Result<String> {
        self.plugin.latest_version().await
    }

    async fn current_version(&self, install_dir: &Path, path_dir: &Path) -> Result<Option<String>> {
        self.plugin.current_version(install_dir, path_dir).await
    }

    async fn download(
        &self,
        version: &str,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<Finished> {
        self.plugin.download(version, progress, cancel).await
    }

    async fn install(&self, target_dir: &Path) -> Result<()> {
        self.plugin.install(target_dir).await
    }

    async fn activate(&self, version_dir: &Path, path_dir: &Path) -> Result<()> {
        self.plugin.activate(version_dir, path_dir).await
    }

    async fn remove(&self, version_dir: &Path, path_dir: &Path, is_active: bool) -> Result<()> {
        self.plugin.remove(version_dir, path_dir, is_active).await
    }
}

// ============================================================================
// Removal
// ============================================================================

/// Deletes the module file of plugin `name`.
pub fn remove_plugin_binary(fs: &dyn FileSystem, plugin_dir: &Path, name: &str) -> Result<()> {
    let path = plugin_path(plugin_dir, name);
    match fs.remove_file(&path) {
        Ok(()) => {
            info!("Removed plugin binary {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::not_found(
            Missing::PluginBinary,
            name,
            "native::remove_plugin_binary",
        )),
        Err(e) => Err(Error::io(path, e)),
    }
}
