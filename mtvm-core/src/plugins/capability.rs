//! The per-tool plugin contract and its resolution from a tool name.
//!
//! A [`Plugin`] knows how to fetch, unpack, activate and remove versions of
//! exactly one tool. [`PluginResolver`] walks an ordered chain of
//! [`CapabilityProvider`]s and returns the first implementation that claims
//! the name.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::download::{Finished, ProgressSender};
use crate::error::{Error, Result};

// ============================================================================
// Plugin trait
// ============================================================================

/// Capability contract implemented once per tool.
///
/// `download` stages an artifact that the following `install` unpacks, so the
/// two are always called in that order on the same instance. No method retries
/// internally.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Newest released version, without any tool-specific prefix.
    async fn latest_version(&self) -> Result<String>;

    /// The version currently active in `path_dir`, if any.
    async fn current_version(&self, install_dir: &Path, path_dir: &Path)
        -> Result<Option<String>>;

    /// Downloads `version`, pushing progress into `progress`.
    ///
    /// Must return [`Finished::Canceled`] rather than an error when `cancel`
    /// fires mid-transfer.
    async fn download(
        &self,
        version: &str,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<Finished>;

    /// Unpacks the last downloaded artifact into `target_dir`.
    async fn install(&self, target_dir: &Path) -> Result<()>;

    /// Makes `version_dir` the active version by pointing `path_dir` at it.
    async fn activate(&self, version_dir: &Path, path_dir: &Path) -> Result<()>;

    /// Deletes `version_dir`, and the active links too when `is_active`.
    async fn remove(&self, version_dir: &Path, path_dir: &Path, is_active: bool) -> Result<()>;
}

// ============================================================================
// Resolution
// ============================================================================

/// A source of plugin implementations.
pub trait CapabilityProvider: Send + Sync {
    /// Short label used in logs.
    fn label(&self) -> &'static str;

    /// Returns the implementation for `name` (already lowercased), or `None`
    /// when this provider does not know the tool.
    fn provide(&self, name: &str) -> Result<Option<Arc<dyn Plugin>>>;
}

/// Resolves a tool name to exactly one [`Plugin`].
#[derive(Default)]
pub struct PluginResolver {
    providers: Vec<Box<dyn CapabilityProvider>>,
}

impl PluginResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a provider. Earlier providers win.
    pub fn with_provider(mut self, provider: impl CapabilityProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Case-insensitive lookup through the provider chain.
    pub fn resolve(&self, tool: &str) -> Result<Arc<dyn Plugin>> {
        let name = tool.to_lowercase();
        for provider in &self.providers {
            if let Some(plugin) = provider.provide(&name)? {
                debug!("Resolved {} through {} plugins", name, provider.label());
                return Ok(plugin);
            }
        }
        Err(Error::UnsupportedTool(tool.to_string()))
    }
}
