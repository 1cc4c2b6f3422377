//! Built-in plugin for the Go toolchain.
//!
//! Releases come from `go.dev`. A version is installed as
//! `install_dir/go/<version>/go/...` (the archive's own `go/` root is kept)
//! and activated by linking `path_dir/go` and `path_dir/gofmt` to its `bin/`.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::capability::Plugin;
use super::extractor::extract_archive;
use super::types::{ArchiveFormat, Platform};
use crate::download::{Downloader, Finished, ProgressSender, Sink};
use crate::error::{Error, Result};
use crate::fs::FileSystem;

/// Where Go releases are published.
pub const GO_BASE_URL: &str = "https://go.dev";

/// Binaries linked into the path directory on activation.
const LINKED_BINARIES: [&str; 2] = ["go", "gofmt"];

pub struct GoPlugin {
    fs: Arc<dyn FileSystem>,
    downloader: Downloader,
    staging_dir: PathBuf,
    base_url: String,
    platform: Platform,
    /// Archive written by the last completed `download`.
    staged: Mutex<Option<PathBuf>>,
}

impl GoPlugin {
    /// Archives are staged in `staging_dir` between download and install.
    pub fn new(fs: Arc<dyn FileSystem>, downloader: Downloader, staging_dir: PathBuf) -> Self {
        Self {
            fs,
            downloader,
            staging_dir,
            base_url: GO_BASE_URL.to_string(),
            platform: Platform::current(),
            staged: Mutex::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// `go1.22.0.linux-amd64.tar.gz`
    fn archive_name(&self, version: &str) -> String {
        format!(
            "go{}.{}-{}.{}",
            version,
            self.platform.os,
            self.platform.arch,
            self.platform.archive_format().extension()
        )
    }

    fn binary_name(&self, name: &str) -> String {
        if self.platform.os == "windows" {
            format!("{}.exe", name)
        } else {
            name.to_string()
        }
    }

    fn link_path(&self, path_dir: &Path, name: &str) -> PathBuf {
        path_dir.join(self.binary_name(name))
    }

    fn take_staged(&self) -> Option<PathBuf> {
        self.staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn remove_links(&self, path_dir: &Path) -> Result<()> {
        for name in LINKED_BINARIES {
            let link = self.link_path(path_dir, name);
            match self.fs.remove_file(&link) {
                Ok(()) => debug!("Removed link {}", link.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(link, e)),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Plugin for GoPlugin {
    async fn latest_version(&self) -> Result<String> {
        let url = format!("{}/VERSION?m=text", self.base_url);
        let body = self.downloader.fetch(&url).await?;
        let text = String::from_utf8_lossy(&body);

        let version = text
            .lines()
            .next()
            .map(str::trim)
            .and_then(|line| line.strip_prefix("go"))
            .filter(|version| !version.is_empty())
            .ok_or_else(|| anyhow!("unexpected response from {}: {:?}", url, text))?;

        debug!("Latest Go release is {}", version);
        Ok(version.to_string())
    }

    async fn current_version(&self, install_dir: &Path, path_dir: &Path) -> Result<Option<String>> {
        let link = self.link_path(path_dir, "go");
        let target = match self.fs.read_link(&link) {
            Ok(target) => target,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(link, e)),
        };

        let version = target
            .strip_prefix(install_dir)
            .ok()
            .and_then(|rest| rest.components().next())
            .and_then(|component| match component {
                Component::Normal(name) => name.to_str().map(str::to_string),
                _ => None,
            });

        if version.is_none() {
            warn!(
                "{} points outside {}: {}",
                link.display(),
                install_dir.display(),
                target.display()
            );
        }
        Ok(version)
    }

    async fn download(
        &self,
        version: &str,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<Finished> {
        let archive = self.staging_dir.join(self.archive_name(version));
        let url = format!("{}/dl/{}", self.base_url, self.archive_name(version));

        self.fs
            .create_dir_all(&self.staging_dir)
            .map_err(|e| Error::io(&self.staging_dir, e))?;

        info!("Downloading Go {} for {}", version, self.platform);
        let task = self
            .downloader
            .start(&url, Sink::File(archive.clone()), Some(progress), cancel);
        let finished = task.finished().await?;

        if let Finished::Completed(_) = finished {
            *self.staged.lock().unwrap_or_else(PoisonError::into_inner) = Some(archive);
        }
        Ok(finished)
    }

    async fn install(&self, target_dir: &Path) -> Result<()> {
        let archive = self
            .take_staged()
            .ok_or_else(|| anyhow!("no downloaded Go archive to install"))?;
        let format = ArchiveFormat::from_url(&archive.to_string_lossy())
            .unwrap_or_else(|| self.platform.archive_format());

        let data = self
            .fs
            .read(&archive)
            .map_err(|e| Error::io(&archive, e))?;

        if let Err(e) = extract_archive(self.fs.as_ref(), &data, target_dir, format) {
            if let Err(cleanup) = self.fs.remove_dir_all(target_dir) {
                warn!(
                    "Failed to clean up {} after a failed install: {}",
                    target_dir.display(),
                    cleanup
                );
            }
            return Err(e);
        }

        if let Err(e) = self.fs.remove_file(&archive) {
            warn!("Failed to clean up archive {}: {}", archive.display(), e);
        }

        info!("Go installed to {}", target_dir.display());
        Ok(())
    }

    async fn activate(&self, version_dir: &Path, path_dir: &Path) -> Result<()> {
        self.fs
            .create_dir_all(path_dir)
            .map_err(|e| Error::io(path_dir, e))?;
        self.remove_links(path_dir)?;

        let bin_dir = version_dir.join("go").join("bin");
        for name in LINKED_BINARIES {
            let target = bin_dir.join(self.binary_name(name));
            let link = self.link_path(path_dir, name);
            self.fs
                .symlink(&target, &link)
                .map_err(|e| Error::io(&link, e))?;
        }

        info!("Go now resolves to {}", version_dir.display());
        Ok(())
    }

    async fn remove(&self, version_dir: &Path, path_dir: &Path, is_active: bool) -> Result<()> {
        self.fs
            .remove_dir_all(version_dir)
            .map_err(|e| Error::io(version_dir, e))?;
        if is_active {
            self.remove_links(path_dir)?;
        }
        info!("Removed {}", version_dir.display());
        Ok(())
    }
}
