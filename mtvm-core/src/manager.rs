//! High-level command API.
//!
//! [`VersionManager`] checks each command's preconditions (resolving
//! `latest`, refusing to reinstall or to remove what is not there) and then
//! runs the matching state machine through an [`Executor`].

use std::io;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::orchestrator::{
    Executor, Outcome, Phase, PluginInstall, PluginRemove, ToolInstall, VersionRemove,
};
use crate::plugins::manifest::{validate_http_url, validate_path_segment};
use crate::plugins::{Plugin, PluginEntry, PluginResolver};

/// Unwraps a precondition result or ends the command with `Outcome::Failed`.
macro_rules! try_outcome {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => return Outcome::Failed(e),
        }
    };
}

/// Like `try_outcome!` for [`VersionManager::prepare`], which also ends the
/// command with `Outcome::Canceled` when interrupted.
macro_rules! try_prepare {
    ($result:expr) => {
        match $result {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return Outcome::Canceled,
            Err(e) => return Outcome::Failed(e),
        }
    };
}

// ============================================================================
// Version Manager
// ============================================================================

/// Entry point for every mtvm command.
pub struct VersionManager {
    ctx: Context,
    resolver: PluginResolver,
}

impl VersionManager {
    /// Uses built-in plugins and native modules from the configured plugin
    /// directory.
    pub fn new(ctx: Context) -> Self {
        let resolver = ctx.resolver();
        Self { ctx, resolver }
    }

    pub fn with_resolver(ctx: Context, resolver: PluginResolver) -> Self {
        Self { ctx, resolver }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The plugin serving `tool`.
    pub fn plugin(&self, tool: &str) -> Result<Arc<dyn Plugin>> {
        self.resolver.resolve(tool)
    }

    /// True if `install_dir/tool/version` exists.
    pub fn is_version_installed(&self, tool: &str, version: &str) -> Result<bool> {
        let dir = self.ctx.config.version_dir(tool, version);
        self.ctx.fs.exists(&dir).map_err(|e| Error::io(dir, e))
    }

    /// Resolves `tool` and turns `latest` (any case) into a concrete version.
    ///
    /// Both end up as directory names under the install dir, so each must be
    /// a single path segment. `None` means `interrupt` fired first.
    async fn prepare(
        &self,
        tool: &str,
        version: &str,
        interrupt: &CancellationToken,
    ) -> Result<Option<(String, Arc<dyn Plugin>, String)>> {
        let name = tool.to_lowercase();
        validate_path_segment("tool", &name)?;
        let plugin = self.plugin(&name)?;

        let version = if version.eq_ignore_ascii_case("latest") {
            let latest = tokio::select! {
                biased;
                _ = interrupt.cancelled() => {
                    info!("Interrupted while looking up the latest {}", name);
                    return Ok(None);
                }
                latest = plugin.latest_version() => latest?,
            };
            info!("Latest {} is {}", name, latest);
            latest
        } else {
            version.to_string()
        };
        validate_path_segment("version", &version)?;

        Ok(Some((name, plugin, version)))
    }

    // ========================================================================
    // Tool commands
    // ========================================================================

    /// Downloads and installs a tool version.
    pub async fn install(
        &self,
        tool: &str,
        version: &str,
        interrupt: &CancellationToken,
        observe: impl FnMut(&Phase),
    ) -> Outcome {
        let (name, plugin, version) = try_prepare!(self.prepare(tool, version, interrupt).await);

        if try_outcome!(self.is_version_installed(&name, &version)) {
            return Outcome::AlreadyInstalled { name, version };
        }

        let machine = ToolInstall::new(name.clone(), version);
        Executor::for_tool(self.ctx.clone(), name, plugin)
            .run(machine, interrupt, observe)
            .await
    }

    /// Makes a version active, installing it first when `install` is set.
    pub async fn use_version(
        &self,
        tool: &str,
        version: &str,
        install: bool,
        interrupt: &CancellationToken,
        mut observe: impl FnMut(&Phase),
    ) -> Outcome {
        let (name, plugin, version) = try_prepare!(self.prepare(tool, version, interrupt).await);

        if try_outcome!(self.is_version_installed(&name, &version)) {
            observe(&Phase::SettingActive);
            let outcome = match self.activate(plugin.as_ref(), &name, &version).await {
                Ok(()) => Outcome::Activated { name, version },
                Err(e) => Outcome::Failed(e),
            };
            observe(&Phase::Done);
            return outcome;
        }

        if !install {
            return Outcome::NotInstalled { name, version };
        }

        let machine = ToolInstall::new(name.clone(), version).then_activate();
        Executor::for_tool(self.ctx.clone(), name, plugin)
            .run(machine, interrupt, observe)
            .await
    }

    async fn activate(&self, plugin: &dyn Plugin, tool: &str, version: &str) -> Result<()> {
        let path_dir = &self.ctx.config.path_dir;
        match self.ctx.fs.create_dir_all(path_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(Error::io(path_dir, e)),
        }
        let version_dir = self.ctx.config.version_dir(tool, version);
        plugin.activate(&version_dir, path_dir).await
    }

    /// Removes an installed tool version.
    pub async fn remove(
        &self,
        tool: &str,
        version: &str,
        interrupt: &CancellationToken,
        observe: impl FnMut(&Phase),
    ) -> Outcome {
        let (name, plugin, version) = try_prepare!(self.prepare(tool, version, interrupt).await);

        if !try_outcome!(self.is_version_installed(&name, &version)) {
            return Outcome::NotInstalled { name, version };
        }

        let machine = VersionRemove::new(name.clone(), version);
        Executor::for_tool(self.ctx.clone(), name, plugin)
            .run(machine, interrupt, observe)
            .await
    }

    // ========================================================================
    // Plugin commands
    // ========================================================================

    /// Installs or updates the plugin whose manifest is at `url`.
    pub async fn install_plugin(
        &self,
        url: &str,
        force: bool,
        interrupt: &CancellationToken,
        observe: impl FnMut(&Phase),
    ) -> Outcome {
        try_outcome!(validate_http_url("url", url));
        debug!("Installing plugin from {} (force: {})", url, force);

        Executor::new(self.ctx.clone())
            .run(PluginInstall::new(url, force), interrupt, observe)
            .await
    }

    /// Deletes a plugin's module and registry entry.
    pub async fn remove_plugin(
        &self,
        name: &str,
        interrupt: &CancellationToken,
        observe: impl FnMut(&Phase),
    ) -> Outcome {
        try_outcome!(validate_path_segment("name", name));
        Executor::new(self.ctx.clone())
            .run(PluginRemove::new(name), interrupt, observe)
            .await
    }

    /// Installed plugins, in registry order.
    pub fn plugins(&self) -> Result<Vec<PluginEntry>> {
        self.ctx.registry.entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use crate::config::Configuration;
    use crate::fs::{FileSystem, MemFs};
    use crate::plugins::capability::tests::FakePlugin;
    use crate::plugins::CapabilityProvider;

    struct Only(Arc<FakePlugin>);

    impl CapabilityProvider for Only {
        fn label(&self) -> &'static str {
            "test"
        }

        fn provide(&self, name: &str) -> Result<Option<Arc<dyn Plugin>>> {
            Ok((name == "go").then(|| Arc::clone(&self.0) as Arc<dyn Plugin>))
        }
    }

    fn manager(fs: &MemFs, plugin: &Arc<FakePlugin>) -> VersionManager {
        let ctx = Context::new(
            Configuration::new("/data/tools", "/config/plugins", "/data/bin"),
            Arc::new(fs.clone()),
            PathBuf::from("/config/plugins.json"),
        );
        VersionManager::with_resolver(
            ctx,
            PluginResolver::new().with_provider(Only(Arc::clone(plugin))),
        )
    }

    #[tokio::test]
    async fn test_install_resolves_latest() {
        let fs = MemFs::new();
        let plugin = Arc::new(FakePlugin::new("1.22.0"));
        let outcome = manager(&fs, &plugin)
            .install("Go", "LATEST", &CancellationToken::new(), |_| {})
            .await;

        assert!(
            matches!(outcome, Outcome::Installed { ref version, .. } if version == "1.22.0"),
            "{:?}",
            outcome
        );
        assert_eq!(plugin.calls()[0], "latest_version");
    }

    #[tokio::test]
    async fn test_install_existing_version_does_nothing() {
        let fs = MemFs::new();
        fs.create_dir_all(Path::new("/data/tools/go/1.22.0")).unwrap();
        let plugin = Arc::new(FakePlugin::new("1.22.0"));

        let outcome = manager(&fs, &plugin)
            .install("go", "1.22.0", &CancellationToken::new(), |_| {})
            .await;

        assert!(matches!(outcome, Outcome::AlreadyInstalled { .. }));
        assert!(plugin.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_fails() {
        let fs = MemFs::new();
        let plugin = Arc::new(FakePlugin::new("1.22.0"));
        let outcome = manager(&fs, &plugin)
            .install("zig", "0.11.0", &CancellationToken::new(), |_| {})
            .await;
        assert!(matches!(outcome, Outcome::Failed(Error::UnsupportedTool(_))));
    }

    #[tokio::test]
    async fn test_use_installed_version_activates_directly() {
        let fs = MemFs::new();
        fs.create_dir_all(Path::new("/data/tools/go/1.22.0")).unwrap();
        let plugin = Arc::new(FakePlugin::new("1.22.0"));

        let mut phases = Vec::new();
        let outcome = manager(&fs, &plugin)
            .use_version("go", "1.22.0", false, &CancellationToken::new(), |p| {
                phases.push(*p)
            })
            .await;

        assert!(matches!(outcome, Outcome::Activated { .. }));
        assert_eq!(phases, vec![Phase::SettingActive, Phase::Done]);
        assert_eq!(plugin.calls(), vec!["activate /data/tools/go/1.22.0"]);
        assert!(fs.is_dir(Path::new("/data/bin")));
    }

    #[tokio::test]
    async fn test_use_missing_version() {
        let fs = MemFs::new();
        let plugin = Arc::new(FakePlugin::new("1.22.0"));

        let outcome = manager(&fs, &plugin)
            .use_version("go", "1.21.0", false, &CancellationToken::new(), |_| {})
            .await;
        assert!(matches!(outcome, Outcome::NotInstalled { .. }));

        let outcome = manager(&fs, &plugin)
            .use_version("go", "1.21.0", true, &CancellationToken::new(), |_| {})
            .await;
        assert!(matches!(outcome, Outcome::Activated { .. }), "{:?}", outcome);
    }

    #[tokio::test]
    async fn test_remove_requires_installed_version() {
        let fs = MemFs::new();
        let plugin = Arc::new(FakePlugin::new("1.22.0"));

        let outcome = manager(&fs, &plugin)
            .remove("go", "1.22.0", &CancellationToken::new(), |_| {})
            .await;
        assert!(matches!(outcome, Outcome::NotInstalled { .. }));

        fs.create_dir_all(Path::new("/data/tools/go/1.22.0")).unwrap();
        let outcome = manager(&fs, &plugin)
            .remove("go", "1.22.0", &CancellationToken::new(), |_| {})
            .await;
        assert!(matches!(outcome, Outcome::Removed { .. }), "{:?}", outcome);
    }

    #[tokio::test]
    async fn test_dot_segments_are_rejected() {
        let fs = MemFs::new();
        fs.create_dir_all(Path::new("/data/tools/go/1.22.0")).unwrap();
        let plugin = Arc::new(FakePlugin::new("1.22.0"));
        let manager = manager(&fs, &plugin);

        for version in ["..", ".", "../..", "1.22.0/.."] {
            let outcome = manager
                .remove("go", version, &CancellationToken::new(), |_| {})
                .await;
            assert!(
                matches!(outcome, Outcome::Failed(Error::Validation { ref field, .. }) if field == "version"),
                "{}: {:?}",
                version,
                outcome
            );
        }

        let outcome = manager
            .install("../go", "1.22.0", &CancellationToken::new(), |_| {})
            .await;
        assert!(matches!(
            outcome,
            Outcome::Failed(Error::Validation { ref field, .. }) if field == "tool"
        ));

        let outcome = manager
            .remove_plugin("..", &CancellationToken::new(), |_| {})
            .await;
        assert!(matches!(outcome, Outcome::Failed(Error::Validation { .. })));

        assert!(fs.is_dir(Path::new("/data/tools/go/1.22.0")));
        assert!(plugin.calls().is_empty());
    }

    #[tokio::test]
    async fn test_latest_version_must_be_a_path_segment() {
        let fs = MemFs::new();
        let plugin = Arc::new(FakePlugin::new(".."));
        let outcome = manager(&fs, &plugin)
            .remove("go", "latest", &CancellationToken::new(), |_| {})
            .await;
        assert!(matches!(outcome, Outcome::Failed(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn test_interrupt_during_latest_lookup_cancels() {
        let fs = MemFs::new();
        let plugin = Arc::new(FakePlugin::new("1.22.0").with_slow_latest());
        let manager = manager(&fs, &plugin);
        let interrupt = CancellationToken::new();

        let canceler = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceler.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            manager.install("go", "latest", &interrupt, |_| {}),
        )
        .await
        .expect("latest lookup ignored the interrupt");

        assert!(matches!(outcome, Outcome::Canceled), "{:?}", outcome);
        assert!(!plugin.calls().iter().any(|call| call.starts_with("download")));
        assert!(!fs.exists(Path::new("/data/tools/go")).unwrap());
    }

    #[tokio::test]
    async fn test_install_plugin_rejects_bad_url() {
        let fs = MemFs::new();
        let plugin = Arc::new(FakePlugin::new("1.22.0"));
        let outcome = manager(&fs, &plugin)
            .install_plugin("file:///etc/passwd", false, &CancellationToken::new(), |_| {})
            .await;
        assert!(matches!(outcome, Outcome::Failed(Error::Validation { .. })));
    }

    #[test]
    fn test_plugins_lists_registry() {
        let fs = MemFs::new();
        let plugin = Arc::new(FakePlugin::new("1.22.0"));
        let manager = manager(&fs, &plugin);
        assert!(manager.plugins().unwrap().is_empty());

        manager
            .context()
            .registry
            .upsert(PluginEntry::new("x", "1.0.0", "https://example.com/x.json"))
            .unwrap();
        assert_eq!(manager.plugins().unwrap().len(), 1);
    }
}
