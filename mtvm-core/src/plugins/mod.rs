//! Tool plugins.
//!
//! - `capability`: the [`Plugin`] contract and name resolution
//! - `builtin` / `golang`: plugins compiled into the binary
//! - `native`: plugins loaded from shared libraries
//! - `manifest`: plugin manifests and the install-or-skip decision
//! - `registry`: the persisted list of installed plugins

pub mod builtin;
pub mod capability;
pub mod extractor;
pub mod golang;
pub mod manifest;
pub mod native;
pub mod registry;
pub mod types;

pub use builtin::{BuiltinPlugins, BUILTIN_PLUGINS};
pub use capability::{CapabilityProvider, Plugin, PluginResolver};
pub use golang::GoPlugin;
pub use manifest::{
    decide_update, parse_manifest, resolve_manifest, DownloadTarget, PluginManifest, Release,
    Resolution, UpdateDecision,
};
pub use native::{plugin_path, remove_plugin_binary, NativePlugins, LIBRARY_EXTENSION};
pub use registry::{PluginEntry, PluginRegistry};
pub use types::{ArchiveFormat, Platform};
