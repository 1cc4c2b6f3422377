//! The installed-plugin registry.
//!
//! `plugins.json` holds a JSON array of [`PluginEntry`] values, tab-indented.
//! Every mutation reads the whole file, edits it in memory and writes it back
//! in full. There is no locking; two processes mutating the registry at once
//! can lose an update.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::manifest::{parse_version, validate_http_url, validate_path_segment};
use crate::error::{Error, Missing, Result};
use crate::fs::FileSystem;

// ============================================================================
// Entries
// ============================================================================

/// One installed plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginEntry {
    pub name: String,
    pub version: String,
    /// Where the manifest this entry was installed from lives.
    #[serde(rename = "metadataUrl")]
    pub metadata_url: String,
}

impl PluginEntry {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        metadata_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            metadata_url: metadata_url.into(),
        }
    }

    /// Name required and usable as a file name, version semver, metadata URL
    /// absolute http(s).
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("name", "required"));
        }
        validate_path_segment("name", &self.name)?;
        parse_version(&self.version)?;
        validate_http_url("metadataUrl", &self.metadata_url)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Handle on a `plugins.json` file. Cheap to clone.
#[derive(Clone)]
pub struct PluginRegistry {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl PluginRegistry {
    pub fn new(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries, in file order. A missing file is an empty registry.
    pub fn entries(&self) -> Result<Vec<PluginEntry>> {
        Ok(self.load()?.unwrap_or_default())
    }

    /// Replaces the entry with the same name in place, or appends it.
    pub fn upsert(&self, entry: PluginEntry) -> Result<()> {
        entry.validate()?;

        let mut entries = self.load()?.unwrap_or_default();
        match entries.iter_mut().find(|existing| existing.name == entry.name) {
            Some(existing) => {
                debug!("Updating registry entry {}", entry.name);
                *existing = entry;
            }
            None => {
                debug!("Adding registry entry {}", entry.name);
                entries.push(entry);
            }
        }

        self.store(&entries)
    }

    /// The version recorded for `name`.
    pub fn lookup_version(&self, name: &str) -> Result<String> {
        const ORIGIN: &str = "registry::lookup_version";

        let entries = self
            .load()?
            .ok_or_else(|| Error::not_found(Missing::RegistryFile, name, ORIGIN))?;

        entries
            .into_iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.version)
            .ok_or_else(|| Error::not_found(Missing::Entry, name, ORIGIN))
    }

    /// Deletes every entry named `name`. The file is left untouched when
    /// nothing matched.
    pub fn remove(&self, name: &str) -> Result<()> {
        const ORIGIN: &str = "registry::remove";

        let mut entries = self
            .load()?
            .ok_or_else(|| Error::not_found(Missing::RegistryFile, name, ORIGIN))?;

        let before = entries.len();
        entries.retain(|entry| entry.name != name);
        if entries.len() == before {
            return Err(Error::not_found(Missing::Entry, name, ORIGIN));
        }

        self.store(&entries)?;
        info!("Removed {} from the plugin registry", name);
        Ok(())
    }

    /// `None` when the file does not exist.
    fn load(&self) -> Result<Option<Vec<PluginEntry>>> {
        let data = match self.fs.read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(&self.path, e)),
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| Error::Json {
                context: self.path.display().to_string(),
                source,
            })
    }

    fn store(&self, entries: &[PluginEntry]) -> Result<()> {
        let json = to_tab_indented_json(entries).map_err(|source| Error::Json {
            context: self.path.display().to_string(),
            source,
        })?;

        if let Some(parent) = self.path.parent() {
            self.fs
                .create_dir_all(parent)
                .map_err(|e| Error::io(parent, e))?;
        }
        self.fs
            .write(&self.path, &json)
            .map_err(|e| Error::io(&self.path, e))
    }
}

fn to_tab_indented_json(entries: &[PluginEntry]) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    entries.serialize(&mut serializer)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fs::MemFs;

    const ONE_ENTRY_JSON: &str = "[\n\t{\n\t\t\"name\": \"loremIpsum\",\n\t\t\"version\": \"0.0.0\",\n\t\t\"metadataUrl\": \"https://example.com\"\n\t}\n]";

    const TWO_ENTRY_JSON: &str = "[\n\t{\n\t\t\"name\": \"loremIpsum\",\n\t\t\"version\": \"0.0.0\",\n\t\t\"metadataUrl\": \"https://example.com\"\n\t},\n\t{\n\t\t\"name\": \"dolorSitAmet\",\n\t\t\"version\": \"0.0.0\",\n\t\t\"metadataUrl\": \"https://example.com\"\n\t}\n]";

    fn registry() -> (MemFs, PluginRegistry) {
        let fs = MemFs::new();
        let registry = PluginRegistry::new(Arc::new(fs.clone()), "/config/mtvm/plugins.json");
        (fs, registry)
    }

    fn lorem() -> PluginEntry {
        PluginEntry::new("loremIpsum", "0.0.0", "https://example.com")
    }

    fn dolor() -> PluginEntry {
        PluginEntry::new("dolorSitAmet", "0.0.0", "https://example.com")
    }

    fn contents(fs: &MemFs) -> String {
        String::from_utf8(fs.read(Path::new("/config/mtvm/plugins.json")).unwrap()).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty_registry() {
        let (_, registry) = registry();
        assert!(registry.entries().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_creates_file_with_tabs() {
        let (fs, registry) = registry();
        registry.upsert(lorem()).unwrap();
        assert_eq!(contents(&fs), ONE_ENTRY_JSON);

        registry.upsert(dolor()).unwrap();
        assert_eq!(contents(&fs), TWO_ENTRY_JSON);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let (fs, registry) = registry();
        registry.upsert(lorem()).unwrap();
        registry.upsert(lorem()).unwrap();
        assert_eq!(contents(&fs), ONE_ENTRY_JSON);
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let (_, registry) = registry();
        registry.upsert(lorem()).unwrap();
        registry.upsert(dolor()).unwrap();
        registry
            .upsert(PluginEntry::new("loremIpsum", "1.0.0", "https://mirror.example.com"))
            .unwrap();

        let entries = registry.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "loremIpsum");
        assert_eq!(entries[0].version, "1.0.0");
        assert_eq!(entries[0].metadata_url, "https://mirror.example.com");
        assert_eq!(entries[1], dolor());
    }

    #[test]
    fn test_upsert_rejects_invalid_entries() {
        let (fs, registry) = registry();

        let err = registry
            .upsert(PluginEntry::new("", "1.0.0", "https://example.com"))
            .unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "name"));

        for name in ["../x", "..", "x/y"] {
            let err = registry
                .upsert(PluginEntry::new(name, "1.0.0", "https://example.com"))
                .unwrap_err();
            assert!(matches!(err, Error::Validation { ref field, .. } if field == "name"));
        }

        let err = registry
            .upsert(PluginEntry::new("x", "latest", "https://example.com"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidVersion { .. }));

        let err = registry
            .upsert(PluginEntry::new("x", "1.0.0", "example.com"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert!(!fs.exists(Path::new("/config/mtvm/plugins.json")).unwrap());
    }

    #[test]
    fn test_lookup_version() {
        let (_, registry) = registry();

        let err = registry.lookup_version("loremIpsum").unwrap_err();
        assert_eq!(err.missing(), Some(Missing::RegistryFile));
        assert_eq!(
            err.to_string(),
            "registry::lookup_version could not find registry file loremIpsum"
        );

        registry.upsert(lorem()).unwrap();
        assert_eq!(registry.lookup_version("loremIpsum").unwrap(), "0.0.0");

        let err = registry.lookup_version("dolorSitAmet").unwrap_err();
        assert_eq!(err.missing(), Some(Missing::Entry));
    }

    #[test]
    fn test_lookup_in_empty_registry_is_missing_entry() {
        let (fs, registry) = registry();
        fs.create_dir_all(Path::new("/config/mtvm")).unwrap();
        fs.write(Path::new("/config/mtvm/plugins.json"), b"[]").unwrap();

        let err = registry.lookup_version("x").unwrap_err();
        assert_eq!(err.missing(), Some(Missing::Entry));
    }

    #[test]
    fn test_remove() {
        let (fs, registry) = registry();
        registry.upsert(lorem()).unwrap();
        registry.upsert(dolor()).unwrap();

        registry.remove("dolorSitAmet").unwrap();
        assert_eq!(contents(&fs), ONE_ENTRY_JSON);
        assert_eq!(registry.entries().unwrap(), vec![lorem()]);
    }

    #[test]
    fn test_remove_missing() {
        let (fs, registry) = registry();

        let err = registry.remove("loremIpsum").unwrap_err();
        assert_eq!(err.missing(), Some(Missing::RegistryFile));
        assert!(!fs.exists(Path::new("/config/mtvm/plugins.json")).unwrap());

        registry.upsert(lorem()).unwrap();
        let err = registry.remove("dolorSitAmet").unwrap_err();
        assert_eq!(err.missing(), Some(Missing::Entry));
        assert_eq!(contents(&fs), ONE_ENTRY_JSON);
    }

    #[test]
    fn test_malformed_registry_is_error() {
        let (fs, registry) = registry();
        fs.create_dir_all(Path::new("/config/mtvm")).unwrap();
        fs.write(Path::new("/config/mtvm/plugins.json"), b"{").unwrap();

        assert!(matches!(registry.entries(), Err(Error::Json { .. })));
    }
}
