//! Plugin manifests and the install-or-skip decision.
//!
//! A manifest is the JSON document a plugin author publishes:
//!
//! ```json
//! {
//!   "name": "zig",
//!   "version": "1.2.0",
//!   "downloads": [
//!     { "os": "linux", "arch": "amd64", "url": "https://example.com/zig.so", "checksum": "" }
//!   ]
//! }
//! ```
//!
//! Names are lowercased on parse, the same way tool names are matched when a
//! plugin is resolved.
//!
//! Resolution happens in a fixed order: an invalid version fails first, then an
//! up-to-date registry entry skips the install, then a missing build for the
//! running platform, and only then is a download URL handed out.

use std::path::{Component, Path};

use semver::Version;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::types::Platform;
use crate::error::{Error, Result};

// ============================================================================
// Manifest
// ============================================================================

/// One per-platform build listed in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub os: String,
    pub arch: String,
    pub url: String,
    /// Published but not verified.
    pub checksum: String,
}

/// A validated plugin manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginManifest {
    pub name: String,
    pub version: Version,
    pub downloads: Vec<DownloadTarget>,
}

/// Wire form. Every field is optional so that missing keys surface as
/// validation errors naming the field rather than as decode errors.
#[derive(Debug, Deserialize)]
struct RawManifest {
    name: Option<String>,
    version: Option<String>,
    downloads: Option<Vec<RawDownload>>,
}

#[derive(Debug, Deserialize)]
struct RawDownload {
    os: Option<String>,
    arch: Option<String>,
    url: Option<String>,
    #[serde(default)]
    checksum: String,
}

/// Decodes and validates manifest bytes.
pub fn parse_manifest(data: &[u8]) -> Result<PluginManifest> {
    let raw: RawManifest = serde_json::from_slice(data).map_err(|source| Error::Json {
        context: "plugin manifest".to_string(),
        source,
    })?;

    let name = required("name", raw.name)?.to_lowercase();
    validate_path_segment("name", &name)?;
    let version = parse_version(&required("version", raw.version)?)?;
    let downloads = raw
        .downloads
        .ok_or_else(|| Error::validation("downloads", "required"))?
        .into_iter()
        .enumerate()
        .map(|(i, download)| -> Result<DownloadTarget> {
            let field = |name: &str| format!("downloads[{}].{}", i, name);
            let url = required(&field("url"), download.url)?;
            validate_http_url(&field("url"), &url)?;
            Ok(DownloadTarget {
                os: required(&field("os"), download.os)?,
                arch: required(&field("arch"), download.arch)?,
                url,
                checksum: download.checksum,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PluginManifest {
        name,
        version,
        downloads,
    })
}

impl PluginManifest {
    /// The build for `platform`, matched exactly on (os, arch).
    pub fn download_for(&self, platform: &Platform) -> Option<&DownloadTarget> {
        self.downloads
            .iter()
            .find(|download| platform.matches(&download.os, &download.arch))
    }
}

// ============================================================================
// Field validation
// ============================================================================

fn required(field: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::validation(field, "required")),
    }
}

/// Parses a strict semantic version.
pub(crate) fn parse_version(version: &str) -> Result<Version> {
    Version::parse(version).map_err(|source| Error::InvalidVersion {
        version: version.to_string(),
        source,
    })
}

/// Checks that `value` can be joined onto a directory without leaving it:
/// exactly one normal path component, so no separators, `.` or `..`.
pub(crate) fn validate_path_segment(field: &str, value: &str) -> Result<()> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(segment)), None) if segment == value => Ok(()),
        _ => Err(Error::validation(
            field,
            format!("{:?} is not a single path segment", value),
        )),
    }
}

/// Checks that `value` is an absolute http(s) URL.
pub(crate) fn validate_http_url(field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value).map_err(|e| Error::validation(field, e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(()),
        "http" | "https" => Err(Error::validation(field, "URL has no host")),
        scheme => Err(Error::validation(
            field,
            format!("expected an http(s) URL, got scheme {:?}", scheme),
        )),
    }
}

// ============================================================================
// Update decision
// ============================================================================

/// Whether a manifest version should be installed over what the registry has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision {
    /// Proceed. `previous` is the parsed registry version, if there was one.
    Install { previous: Option<Version> },
    /// The registry already holds this version or a newer one.
    UpToDate { installed: Version },
}

/// Compares `available` against the stored registry version.
///
/// `stored` is the result of the registry lookup: a not-found error (missing
/// file or missing entry) means there is no baseline. Any other error is
/// returned unchanged.
pub fn decide_update(
    available: &Version,
    stored: Result<String>,
    force: bool,
) -> Result<UpdateDecision> {
    let stored = match stored {
        Ok(version) => Some(version),
        Err(e) if e.is_not_found() => {
            debug!("No registry baseline: {}", e);
            None
        }
        Err(e) => return Err(e),
    };

    let previous = stored.and_then(|version| match Version::parse(&version) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!("Ignoring invalid registry version {:?}: {}", version, e);
            None
        }
    });

    match previous {
        Some(installed) if !force && *available <= installed => {
            Ok(UpdateDecision::UpToDate { installed })
        }
        previous => Ok(UpdateDecision::Install { previous }),
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// What a plugin-install should do after reading the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Registry already has `installed`; nothing to download.
    UpToDate { name: String, installed: Version },
    /// The manifest has no build for the running platform.
    NoBuild { name: String, version: Version },
    /// Download `url` and record `version`.
    Install(Release),
}

/// A selected platform build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub name: String,
    pub version: Version,
    pub url: String,
}

/// Parses `data` and decides what to do with it.
///
/// `lookup` returns the registry version stored for a plugin name.
pub fn resolve_manifest(
    data: &[u8],
    platform: &Platform,
    lookup: impl FnOnce(&str) -> Result<String>,
    force: bool,
) -> Result<Resolution> {
    let manifest = parse_manifest(data)?;

    if let UpdateDecision::UpToDate { installed } =
        decide_update(&manifest.version, lookup(&manifest.name), force)?
    {
        return Ok(Resolution::UpToDate {
            name: manifest.name,
            installed,
        });
    }

    let url = manifest.download_for(platform).map(|d| d.url.clone());
    Ok(match url {
        Some(url) => Resolution::Install(Release {
            name: manifest.name,
            version: manifest.version,
            url,
        }),
        None => Resolution::NoBuild {
            name: manifest.name,
            version: manifest.version,
        },
    })
}
