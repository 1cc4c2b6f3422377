//! Platform identification and archive formats.
//!
//! Platforms are named the way Go names them (`linux`/`darwin`/`windows`,
//! `amd64`/`arm64`/`386`), which is also the convention plugin manifests use.

use std::fmt;

// ============================================================================
// Platform Detection
// ============================================================================

/// An (OS, architecture) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
}

impl Platform {
    pub const fn new(os: &'static str, arch: &'static str) -> Self {
        Self { os, arch }
    }

    /// The platform this binary runs on.
    pub fn current() -> Self {
        Self {
            os: go_os(std::env::consts::OS),
            arch: go_arch(std::env::consts::ARCH),
        }
    }

    /// Exact, case-sensitive match against manifest values.
    pub fn matches(&self, os: &str, arch: &str) -> bool {
        self.os == os && self.arch == arch
    }

    /// The archive format toolchains are usually shipped in on this platform.
    pub fn archive_format(&self) -> ArchiveFormat {
        if self.os == "windows" {
            ArchiveFormat::Zip
        } else {
            ArchiveFormat::TarGz
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

fn go_os(os: &'static str) -> &'static str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn go_arch(arch: &'static str) -> &'static str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64",
        "loongarch64" => "loong64",
        other => other,
    }
}

// ============================================================================
// Archive Format
// ============================================================================

/// Archive format of a downloaded toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Gzip-compressed tar archive (.tar.gz, .tgz)
    TarGz,
    /// ZIP archive (.zip)
    Zip,
}

impl ArchiveFormat {
    /// Infers the archive format from a URL or filename.
    pub fn from_url(url: &str) -> Option<Self> {
        let lower = url.to_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_platform_uses_go_names() {
        let platform = Platform::current();
        assert_ne!(platform.os, "macos");
        assert_ne!(platform.arch, "x86_64");
        assert_ne!(platform.arch, "aarch64");

        #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
        assert_eq!(platform, Platform::new("linux", "amd64"));
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        assert_eq!(platform, Platform::new("darwin", "arm64"));
    }

    #[test]
    fn test_platform_matches_exactly() {
        let platform = Platform::new("linux", "amd64");
        assert!(platform.matches("linux", "amd64"));
        assert!(!platform.matches("Linux", "amd64"));
        assert!(!platform.matches("linux", "arm64"));
        assert_eq!(platform.to_string(), "linux/amd64");
    }

    #[test]
    fn test_archive_format_from_url() {
        assert_eq!(
            ArchiveFormat::from_url("https://go.dev/dl/go1.22.0.linux-amd64.tar.gz"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::from_url("https://example.com/tool.tgz"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::from_url("https://go.dev/dl/go1.22.0.windows-amd64.ZIP"),
            Some(ArchiveFormat::Zip)
        );
        assert_eq!(ArchiveFormat::from_url("https://example.com/tool.dmg"), None);
    }

    #[test]
    fn test_archive_format_per_platform() {
        assert_eq!(
            Platform::new("windows", "amd64").archive_format(),
            ArchiveFormat::Zip
        );
        assert_eq!(
            Platform::new("darwin", "arm64").archive_format().extension(),
            "tar.gz"
        );
    }
}
