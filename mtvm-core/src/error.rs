//! Error taxonomy shared by every mtvm component.
//!
//! Errors fall into four families (see [`ErrorKind`]): not-found, validation,
//! transport and everything else. A canceled transfer is an outcome, not an
//! error.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

// =============================================================================
// Not-found subjects
// =============================================================================

/// The kind of artifact a [`Error::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    /// The `plugins.json` registry file does not exist.
    RegistryFile,
    /// The registry exists but has no entry with the requested name.
    Entry,
    /// No native plugin module with the requested name exists.
    PluginBinary,
}

impl Missing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegistryFile => "registry file",
            Self::Entry => "entry",
            Self::PluginBinary => "plugin binary",
        }
    }
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Error Types
// =============================================================================

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Transport,
    Other,
}

/// Errors produced by mtvm operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A named artifact is absent. `origin` names the operation that looked
    /// for it, e.g. `registry::lookup_version`.
    #[error("{origin} could not find {thing} {name}")]
    NotFound {
        thing: Missing,
        name: String,
        origin: &'static str,
    },

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("invalid version {version:?}: {source}")]
    InvalidVersion {
        version: String,
        source: semver::Error,
    },

    #[error("GET {url} failed with status {status} {reason}")]
    HttpStatus {
        url: String,
        status: u16,
        reason: String,
    },

    #[error("GET {url} failed: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("GET {url} returned an invalid Content-Length: {value:?}")]
    InvalidContentLength { url: String, value: String },

    #[error("unsupported tool: {0}")]
    UnsupportedTool(String),

    #[error("failed to load plugin from {path}: {reason}")]
    PluginLoad { path: PathBuf, reason: String },

    #[error("I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("malformed JSON in {context}: {source}")]
    Json {
        context: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(thing: Missing, name: impl Into<String>, origin: &'static str) -> Self {
        Self::NotFound {
            thing,
            name: name.into(),
            origin,
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the family this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation { .. } | Self::InvalidVersion { .. } => ErrorKind::Validation,
            Self::HttpStatus { .. } | Self::Network { .. } | Self::InvalidContentLength { .. } => {
                ErrorKind::Transport
            }
            _ => ErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns the missing artifact if this is a not-found error.
    pub fn missing(&self) -> Option<Missing> {
        match self {
            Self::NotFound { thing, .. } => Some(*thing),
            _ => None,
        }
    }
}
