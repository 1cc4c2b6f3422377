//! Archive extraction for downloaded toolchains.
//!
//! Archives are read from memory and unpacked through the [`FileSystem`]
//! abstraction, so the same code runs against the OS and against `MemFs`.

use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use anyhow::anyhow;
use tracing::{debug, info, warn};

use super::types::ArchiveFormat;
use crate::error::{Error, Result};
use crate::fs::FileSystem;

/// Largest buffer reserved up front for one entry. Sizes come from the
/// archive headers and are not trusted beyond this.
const PREALLOCATE_LIMIT: u64 = 64 * 1024 * 1024;

// ============================================================================
// Archive Extraction
// ============================================================================

/// Extracts `archive` into `dest_dir`.
///
/// Entries with absolute paths or `..` components are skipped, as are tar
/// symlinks and hardlinks. Files under a `bin/` directory, or carrying any
/// executable mode bit, are marked executable.
pub fn extract_archive(
    fs: &dyn FileSystem,
    archive: &[u8],
    dest_dir: &Path,
    format: ArchiveFormat,
) -> Result<()> {
    info!(
        "Extracting {:?} archive ({} bytes) to {}",
        format,
        archive.len(),
        dest_dir.display()
    );

    fs.create_dir_all(dest_dir)
        .map_err(|e| Error::io(dest_dir, e))?;

    match format {
        ArchiveFormat::Zip => extract_zip(fs, archive, dest_dir),
        ArchiveFormat::TarGz => extract_tar_gz(fs, archive, dest_dir),
    }
}

// ============================================================================
// ZIP Extraction
// ============================================================================

fn extract_zip(fs: &dyn FileSystem, archive: &[u8], dest_dir: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| anyhow!("failed to read zip archive: {}", e))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| anyhow!("failed to read zip entry {}: {}", i, e))?;

        let entry_path = match entry.enclosed_name() {
            Some(path) => path.to_owned(),
            None => {
                warn!("Skipping unsafe path in zip: {:?}", entry.name());
                continue;
            }
        };

        let dest_path = dest_dir.join(&entry_path);

        if entry.is_dir() {
            fs.create_dir_all(&dest_path)
                .map_err(|e| Error::io(&dest_path, e))?;
        } else {
            let mut data = Vec::with_capacity(entry_capacity(entry.size()));
            entry
                .read_to_end(&mut data)
                .map_err(|e| Error::io(&dest_path, e))?;
            let executable = is_executable(&entry_path, entry.unix_mode());
            write_entry(fs, &dest_path, &data, executable)?;
        }
    }

    debug!("ZIP extraction complete");
    Ok(())
}

// ============================================================================
// TAR.GZ Extraction
// ============================================================================

fn extract_tar_gz(fs: &dyn FileSystem, archive: &[u8], dest_dir: &Path) -> Result<()> {
    let decoder = flate2::read::GzDecoder::new(archive);
    let mut archive = tar::Archive::new(decoder);

    let entries = archive
        .entries()
        .map_err(|e| anyhow!("failed to read tar archive: {}", e))?;

    for entry_result in entries {
        let mut entry = entry_result.map_err(|e| anyhow!("failed to read tar entry: {}", e))?;
        let entry_type = entry.header().entry_type();

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            warn!("Skipping symlink/hardlink in tar archive");
            continue;
        }

        let path: PathBuf = match entry.path() {
            Ok(path) => path.into_owned(),
            Err(e) => {
                warn!("Skipping tar entry with unreadable path: {}", e);
                continue;
            }
        };

        if !is_safe(&path) {
            warn!("Skipping unsafe path in tar: {:?}", path);
            continue;
        }

        let dest_path = dest_dir.join(&path);

        if entry_type.is_dir() {
            fs.create_dir_all(&dest_path)
                .map_err(|e| Error::io(&dest_path, e))?;
        } else if entry_type.is_file() {
            let mut data = Vec::with_capacity(entry_capacity(entry.size()));
            entry
                .read_to_end(&mut data)
                .map_err(|e| Error::io(&dest_path, e))?;
            let executable = is_executable(&path, entry.header().mode().ok());
            write_entry(fs, &dest_path, &data, executable)?;
        }
    }

    debug!("TAR extraction complete");
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn entry_capacity(size: u64) -> usize {
    size.min(PREALLOCATE_LIMIT) as usize
}

fn is_safe(path: &Path) -> bool {
    !path.is_absolute()
        && path
            .components()
            .all(|c| !matches!(c, Component::ParentDir | Component::Prefix(_)))
}

fn is_executable(path: &Path, mode: Option<u32>) -> bool {
    let in_bin = path
        .parent()
        .and_then(Path::file_name)
        .is_some_and(|dir| dir == "bin");
    in_bin || mode.is_some_and(|mode| mode & 0o111 != 0)
}

fn write_entry(fs: &dyn FileSystem, dest_path: &Path, data: &[u8], executable: bool) -> Result<()> {
    if let Some(parent) = dest_path.parent() {
        fs.create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    fs.write(dest_path, data)
        .map_err(|e| Error::io(dest_path, e))?;
    if executable {
        fs.set_executable(dest_path)
            .map_err(|e| Error::io(dest_path, e))?;
    }
    Ok(())
}
