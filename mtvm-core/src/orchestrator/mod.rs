//! Command state machines and the executor that drives them.
//!
//! Each command is a [`Machine`]: a pure transition function from
//! `(state, event)` to `(state, effects)`. The [`Executor`] performs the
//! effects (downloads, installs, registry writes), feeds their completions back
//! as [`Event`]s one at a time, and reports the [`Phase`] after every
//! transition until the machine reaches its terminal [`Outcome`].
//!
//! Cancellation is only honoured while a download is in flight. The machine
//! then emits [`Effect::CancelDownload`] and still waits for the download to
//! acknowledge before ending in [`Outcome::Canceled`].

mod executor;
mod install;
mod plugin_install;
mod remove;

use std::fmt;

use crate::download::{Finished, Progress};
use crate::error::{Error, Result};
use crate::plugins::{PluginEntry, Resolution};

pub use executor::Executor;
pub use install::ToolInstall;
pub use plugin_install::PluginInstall;
pub use remove::{PluginRemove, VersionRemove};

// =============================================================================
// Events
// =============================================================================

/// Something that happened. Exactly one event drives one transition.
#[derive(Debug)]
pub enum Event {
    /// A value from the progress pipe of the active download.
    Progress(Progress),
    /// The tool or plugin binary download ended.
    DownloadFinished(Result<Finished>),
    /// The plugin manifest transfer ended.
    ManifestFetched(Result<Finished>),
    ManifestResolved(Result<Resolution>),
    Installed(Result<()>),
    Activated(Result<()>),
    Registered(Result<()>),
    FileRemoved(Result<()>),
    EntryRemoved(Result<()>),
    CurrentVersion(Result<Option<String>>),
    VersionRemoved(Result<()>),
    /// The user asked to stop.
    CancelRequested,
}

// =============================================================================
// Effects
// =============================================================================

/// Work a machine asks the executor to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    DownloadTool { version: String },
    InstallTool { version: String },
    ActivateTool { version: String },
    FetchManifest { url: String },
    ResolveManifest { data: Vec<u8>, force: bool },
    DownloadPlugin { name: String, url: String },
    RegisterPlugin(PluginEntry),
    RemovePluginFile { name: String },
    RemovePluginEntry { name: String },
    QueryCurrentVersion,
    RemoveToolVersion { version: String, is_active: bool },
    CancelDownload,
}

// =============================================================================
// Outcomes
// =============================================================================

/// Terminal result of one command.
#[derive(Debug)]
pub enum Outcome {
    Installed { name: String, version: String },
    Activated { name: String, version: String },
    UpToDate { name: String, version: String },
    NoBuildForPlatform { name: String, version: String },
    Removed { name: String },
    NothingToRemove { name: String },
    AlreadyInstalled { name: String, version: String },
    NotInstalled { name: String, version: String },
    Canceled,
    Failed(Error),
}

impl Outcome {
    /// False for failures, refused preconditions and cancellation.
    pub fn is_success(&self) -> bool {
        !matches!(
            self,
            Self::Failed(_)
                | Self::AlreadyInstalled { .. }
                | Self::NotInstalled { .. }
                | Self::Canceled
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed { name, version } => write!(f, "Installed {} {}", name, version),
            Self::Activated { name, version } => write!(f, "Now using {} {}", name, version),
            Self::UpToDate { name, version } => {
                write!(f, "{} is already up to date ({})", name, version)
            }
            Self::NoBuildForPlatform { name, version } => {
                write!(f, "{} {} has no download for your system", name, version)
            }
            Self::Removed { name } => write!(f, "Removed {}", name),
            Self::NothingToRemove { name } => write!(f, "{} is not installed", name),
            Self::AlreadyInstalled { name, version } => {
                write!(f, "{} {} is already installed", name, version)
            }
            Self::NotInstalled { name, version } => {
                write!(f, "{} {} is not installed", name, version)
            }
            Self::Canceled => f.write_str("Canceled"),
            Self::Failed(e) => write!(f, "Error: {}", e),
        }
    }
}

// =============================================================================
// Phases
// =============================================================================

/// What a running command is doing, for rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    FetchingMetadata,
    Resolving,
    /// `progress` stays `None` while the total size is unknown.
    Downloading { progress: Option<Progress> },
    Installing,
    SettingActive,
    Registering,
    Removing,
    Canceling,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchingMetadata => f.write_str("Fetching plugin metadata..."),
            Self::Resolving => f.write_str("Resolving..."),
            Self::Downloading { progress: Some(p) } => write!(f, "Downloading... {}", p),
            Self::Downloading { progress: None } => f.write_str("Downloading..."),
            Self::Installing => f.write_str("Installing..."),
            Self::SettingActive => f.write_str("Setting active version..."),
            Self::Registering => f.write_str("Updating plugin registry..."),
            Self::Removing => f.write_str("Removing..."),
            Self::Canceling => f.write_str("Canceling..."),
            Self::Done => f.write_str("Done"),
        }
    }
}

// =============================================================================
// Machine
// =============================================================================

/// A command as a pure state machine.
pub trait Machine: Sized + Send {
    /// Leaves the initial state and returns the first effects.
    fn start(self) -> (Self, Vec<Effect>);

    /// Applies one event.
    fn step(self, event: Event) -> (Self, Vec<Effect>);

    fn phase(&self) -> Phase;

    /// The outcome once terminal, otherwise the machine itself.
    fn into_outcome(self) -> std::result::Result<Outcome, Self>;
}

/// Folds a finished download into the next state of a download phase.
///
/// `canceling` is true once a cancel was requested; any completion then means
/// canceled, even if the transfer happened to succeed first.
pub(crate) fn download_result(result: Result<Finished>, canceling: bool) -> DownloadResult {
    match result {
        _ if canceling => DownloadResult::Canceled,
        Ok(Finished::Completed(_)) => DownloadResult::Completed,
        Ok(Finished::Canceled) => DownloadResult::Canceled,
        Err(e) => DownloadResult::Failed(e),
    }
}

pub(crate) enum DownloadResult {
    Completed,
    Canceled,
    Failed(Error),
}
