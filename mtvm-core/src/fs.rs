//! Filesystem abstraction.
//!
//! Every component that touches disk goes through [`FileSystem`] so it can be
//! exercised against [`MemFs`] in tests. [`OsFs`] is the real implementation
//! used by the binary.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Minimal set of filesystem operations used by mtvm.
///
/// Missing paths must be reported with [`io::ErrorKind::NotFound`] so callers
/// can tell absence apart from real failures.
pub trait FileSystem: Send + Sync {
    /// Returns true if something exists at `path` (symlinks are not followed).
    fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Creates (or truncates) a file and returns a writable handle to it.
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Moves `from` to `to`, replacing a file already at `to`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Creates a symlink at `link` pointing to `target`.
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;

    fn read_link(&self, link: &Path) -> io::Result<PathBuf>;

    /// Marks a file as executable. A no-op where the concept does not exist.
    fn set_executable(&self, path: &Path) -> io::Result<()>;
}

// ============================================================================
// OS filesystem
// ============================================================================

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFs;

impl FileSystem for OsFs {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        match fs::symlink_metadata(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        let file = fs::File::create(path)?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        fs::write(path, data)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(target, link)
        }
        #[cfg(windows)]
        {
            std::os::windows::fs::symlink_file(target, link)
        }
    }

    fn read_link(&self, link: &Path) -> io::Result<PathBuf> {
        fs::read_link(link)
    }

    fn set_executable(&self, path: &Path) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(perms.mode() | 0o755);
            fs::set_permissions(path, perms)
        }
        #[cfg(not(unix))]
        {
            fs::metadata(path).map(|_| ())
        }
    }
}

// ============================================================================
// In-memory filesystem
// ============================================================================

#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, executable: bool },
    Dir,
    Symlink(PathBuf),
}

/// An in-memory filesystem. Clones share the same tree.
#[derive(Debug, Clone, Default)]
pub struct MemFs {
    nodes: Arc<Mutex<BTreeMap<PathBuf, Node>>>,
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

fn is_a_directory(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::Other,
        format!("{} is a directory", path.display()),
    )
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PathBuf, Node>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if `path` is a file marked executable.
    pub fn is_executable(&self, path: &Path) -> bool {
        matches!(
            self.lock().get(path),
            Some(Node::File {
                executable: true,
                ..
            })
        )
    }

    /// Returns true if `path` is a directory.
    pub fn is_dir(&self, path: &Path) -> bool {
        matches!(self.lock().get(path), Some(Node::Dir))
    }

    fn check_parent(nodes: &BTreeMap<PathBuf, Node>, path: &Path) -> io::Result<()> {
        match path.parent() {
            None => Ok(()),
            Some(parent) if parent.as_os_str().is_empty() || parent.parent().is_none() => Ok(()),
            Some(parent) => match nodes.get(parent) {
                Some(Node::Dir) => Ok(()),
                _ => Err(not_found(parent)),
            },
        }
    }
}

/// Write handle into a [`MemFs`] file.
struct MemFile {
    nodes: Arc<Mutex<BTreeMap<PathBuf, Node>>>,
    path: PathBuf,
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        match nodes.get_mut(&self.path) {
            Some(Node::File { data, .. }) => {
                data.extend_from_slice(buf);
                Ok(buf.len())
            }
            _ => Err(not_found(&self.path)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl FileSystem for MemFs {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        Ok(self.lock().contains_key(path))
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        let mut nodes = self.lock();
        Self::check_parent(&nodes, path)?;
        if let Some(Node::Dir) = nodes.get(path) {
            return Err(is_a_directory(path));
        }
        nodes.insert(
            path.to_path_buf(),
            Node::File {
                data: Vec::new(),
                executable: false,
            },
        );
        Ok(Box::new(MemFile {
            nodes: Arc::clone(&self.nodes),
            path: path.to_path_buf(),
        }))
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            match nodes.get(ancestor) {
                Some(Node::Dir) => {}
                Some(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} exists and is not a directory", ancestor.display()),
                    ))
                }
                None => {
                    nodes.insert(ancestor.to_path_buf(), Node::Dir);
                }
            }
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        match nodes.get(path) {
            None => Err(not_found(path)),
            Some(Node::Dir) => Err(is_a_directory(path)),
            Some(_) => {
                nodes.remove(path);
                Ok(())
            }
        }
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        if !nodes.contains_key(path) {
            return Err(not_found(path));
        }
        nodes.retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let nodes = self.lock();
        let node = match nodes.get(path) {
            Some(Node::Symlink(target)) => nodes.get(target),
            other => other,
        };
        match node {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(_) => Err(is_a_directory(path)),
            None => Err(not_found(path)),
        }
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut nodes = self.lock();
        Self::check_parent(&nodes, path)?;
        if let Some(Node::Dir) = nodes.get(path) {
            return Err(is_a_directory(path));
        }
        nodes.insert(
            path.to_path_buf(),
            Node::File {
                data: data.to_vec(),
                executable: false,
            },
        );
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        if !nodes.contains_key(from) {
            return Err(not_found(from));
        }
        Self::check_parent(&nodes, to)?;
        if let Some(Node::Dir) = nodes.get(to) {
            return Err(is_a_directory(to));
        }

        let moved: Vec<PathBuf> = nodes
            .keys()
            .filter(|path| path.starts_with(from))
            .cloned()
            .collect();
        for path in moved {
            if let Some(node) = nodes.remove(&path) {
                let rest = path.strip_prefix(from).unwrap_or(Path::new(""));
                let dest = if rest.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(rest)
                };
                nodes.insert(dest, node);
            }
        }
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        Self::check_parent(&nodes, link)?;
        if nodes.contains_key(link) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", link.display()),
            ));
        }
        nodes.insert(link.to_path_buf(), Node::Symlink(target.to_path_buf()));
        Ok(())
    }

    fn read_link(&self, link: &Path) -> io::Result<PathBuf> {
        match self.lock().get(link) {
            Some(Node::Symlink(target)) => Ok(target.clone()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a symlink", link.display()),
            )),
            None => Err(not_found(link)),
        }
    }

    fn set_executable(&self, path: &Path) -> io::Result<()> {
        match self.lock().get_mut(path) {
            Some(Node::File { executable, .. }) => {
                *executable = true;
                Ok(())
            }
            Some(_) => Err(is_a_directory(path)),
            None => Err(not_found(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memfs_requires_parent_dir() {
        let fs = MemFs::new();
        let err = fs.write(Path::new("/a/b.txt"), b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        fs.create_dir_all(Path::new("/a")).unwrap();
        fs.write(Path::new("/a/b.txt"), b"x").unwrap();
        assert_eq!(fs.read(Path::new("/a/b.txt")).unwrap(), b"x");
    }

    #[test]
    fn test_memfs_create_streams_writes() {
        let fs = MemFs::new();
        fs.create_dir_all(Path::new("/dl")).unwrap();

        let mut file = fs.create(Path::new("/dl/archive")).unwrap();
        file.write_all(b"hello ").unwrap();
        file.write_all(b"world").unwrap();
        drop(file);

        assert_eq!(fs.read(Path::new("/dl/archive")).unwrap(), b"hello world");
    }

    #[test]
    fn test_memfs_remove_dir_all_removes_children() {
        let fs = MemFs::new();
        fs.create_dir_all(Path::new("/install/go/1.22.0/bin")).unwrap();
        fs.write(Path::new("/install/go/1.22.0/bin/go"), b"bin")
            .unwrap();
        fs.create_dir_all(Path::new("/install/go/1.21.0")).unwrap();

        fs.remove_dir_all(Path::new("/install/go/1.22.0")).unwrap();

        assert!(!fs.exists(Path::new("/install/go/1.22.0/bin/go")).unwrap());
        assert!(!fs.exists(Path::new("/install/go/1.22.0")).unwrap());
        assert!(fs.exists(Path::new("/install/go/1.21.0")).unwrap());

        let err = fs.remove_dir_all(Path::new("/install/go/1.22.0")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_memfs_symlinks() {
        let fs = MemFs::new();
        fs.create_dir_all(Path::new("/bin")).unwrap();
        fs.symlink(Path::new("/install/go"), Path::new("/bin/go"))
            .unwrap();

        assert_eq!(
            fs.read_link(Path::new("/bin/go")).unwrap(),
            PathBuf::from("/install/go")
        );
        assert!(fs
            .symlink(Path::new("/elsewhere"), Path::new("/bin/go"))
            .is_err());

        fs.remove_file(Path::new("/bin/go")).unwrap();
        let err = fs.read_link(Path::new("/bin/go")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_memfs_rename_replaces_destination() {
        let fs = MemFs::new();
        fs.create_dir_all(Path::new("/plugins")).unwrap();
        fs.write(Path::new("/plugins/x.so"), b"old").unwrap();
        fs.write(Path::new("/plugins/x.so.part"), b"new").unwrap();

        fs.rename(Path::new("/plugins/x.so.part"), Path::new("/plugins/x.so"))
            .unwrap();

        assert_eq!(fs.read(Path::new("/plugins/x.so")).unwrap(), b"new");
        assert!(!fs.exists(Path::new("/plugins/x.so.part")).unwrap());

        let err = fs
            .rename(Path::new("/plugins/x.so.part"), Path::new("/plugins/x.so"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(fs.read(Path::new("/plugins/x.so")).unwrap(), b"new");

        let err = fs
            .rename(Path::new("/plugins/x.so"), Path::new("/missing/x.so"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_memfs_rename_moves_directory_tree() {
        let fs = MemFs::new();
        fs.create_dir_all(Path::new("/stage/go/bin")).unwrap();
        fs.write(Path::new("/stage/go/bin/go"), b"bin").unwrap();
        fs.create_dir_all(Path::new("/tools")).unwrap();

        fs.rename(Path::new("/stage/go"), Path::new("/tools/go"))
            .unwrap();

        assert!(fs.is_dir(Path::new("/tools/go/bin")));
        assert_eq!(fs.read(Path::new("/tools/go/bin/go")).unwrap(), b"bin");
        assert!(!fs.exists(Path::new("/stage/go")).unwrap());
        assert!(fs.is_dir(Path::new("/stage")));
    }

    #[test]
    fn test_memfs_set_executable() {
        let fs = MemFs::new();
        fs.write(Path::new("/tool"), b"#!").unwrap();
        assert!(!fs.is_executable(Path::new("/tool")));
        fs.set_executable(Path::new("/tool")).unwrap();
        assert!(fs.is_executable(Path::new("/tool")));
    }

    #[test]
    fn test_osfs_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let fs = OsFs;
        let dir = temp_dir.path().join("nested").join("dir");
        let file = dir.join("data.bin");

        assert!(!fs.exists(&file).unwrap());
        fs.create_dir_all(&dir).unwrap();

        let mut handle = fs.create(&file).unwrap();
        handle.write_all(b"payload").unwrap();
        handle.flush().unwrap();
        drop(handle);

        assert!(fs.exists(&file).unwrap());
        assert_eq!(fs.read(&file).unwrap(), b"payload");

        let moved = dir.join("moved.bin");
        fs.rename(&file, &moved).unwrap();
        assert!(!fs.exists(&file).unwrap());
        assert_eq!(fs.read(&moved).unwrap(), b"payload");
        fs.rename(&moved, &file).unwrap();

        fs.remove_file(&file).unwrap();
        assert_eq!(
            fs.remove_file(&file).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_osfs_symlink_and_executable() {
        let temp_dir = TempDir::new().unwrap();
        let fs = OsFs;
        let target = temp_dir.path().join("tool");
        let link = temp_dir.path().join("link");

        fs.write(&target, b"#!/bin/sh\n").unwrap();
        fs.set_executable(&target).unwrap();
        fs.symlink(&target, &link).unwrap();

        assert_eq!(fs.read_link(&link).unwrap(), target);

        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
