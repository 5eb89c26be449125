//! Archive containers backing the composite schemes
//!
//! `ContainerStore` opens a container by path; a `Container` resolves
//! archive-relative entry paths and reads entry bytes at an offset.
//! `res:` resources reuse the same abstraction with the module as container.

use crate::error::{BindError, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Metadata for a resolved entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Entry path as resolved inside the container
    pub path: String,

    /// Entry length in bytes
    pub length: u64,
}

/// An open container
pub trait Container: Send {
    /// Path the container was opened from
    fn path(&self) -> &str;

    /// Resolve an archive-relative path; `FileNotFound` if absent
    fn resolve(&mut self, inner: &str) -> Result<EntryInfo>;

    /// Read entry bytes starting at `offset`; returns 0 at end of entry
    fn read_at(&mut self, entry: &EntryInfo, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

/// Opens containers by path
pub trait ContainerStore: Send + Sync {
    /// Open a container; `FileNotFound` if it does not exist
    fn open(&self, path: &str) -> Result<Box<dyn Container>>;
}

/// Store that has no containers at all
#[derive(Debug, Default)]
pub struct EmptyContainerStore;

impl ContainerStore for EmptyContainerStore {
    fn open(&self, path: &str) -> Result<Box<dyn Container>> {
        Err(BindError::FileNotFound(path.to_string()))
    }
}

type EntryMap = HashMap<String, Bytes>;

/// In-memory container store for development and testing
///
/// Entry lookups are case-insensitive. Tracks how many containers are
/// currently open so callers can verify handles are released.
#[derive(Default)]
pub struct MemoryContainerStore {
    containers: RwLock<HashMap<String, Arc<EntryMap>>>,
    open: Arc<AtomicUsize>,
}

impl MemoryContainerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry, creating the container if needed
    pub fn insert(
        &self,
        container: impl Into<String>,
        entry: &str,
        data: impl Into<Bytes>,
    ) -> Result<()> {
        let mut containers = self.containers.write().map_err(|e| {
            BindError::Config(format!("Container store lock poisoned: {}", e))
        })?;
        let map = containers.entry(container.into()).or_default();
        Arc::make_mut(map).insert(normalize_entry(entry), data.into());
        Ok(())
    }

    /// Number of containers opened and not yet dropped
    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

impl ContainerStore for MemoryContainerStore {
    fn open(&self, path: &str) -> Result<Box<dyn Container>> {
        let containers = self.containers.read().map_err(|e| {
            BindError::Config(format!("Container store lock poisoned: {}", e))
        })?;
        let entries = containers
            .get(path)
            .cloned()
            .ok_or_else(|| BindError::FileNotFound(path.to_string()))?;
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryContainer {
            path: path.to_string(),
            entries,
            open: Arc::clone(&self.open),
        }))
    }
}

struct MemoryContainer {
    path: String,
    entries: Arc<EntryMap>,
    open: Arc<AtomicUsize>,
}

impl Drop for MemoryContainer {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Container for MemoryContainer {
    fn path(&self) -> &str {
        &self.path
    }

    fn resolve(&mut self, inner: &str) -> Result<EntryInfo> {
        let key = normalize_entry(inner);
        let data = self
            .entries
            .get(&key)
            .ok_or_else(|| BindError::FileNotFound(format!("{}::{}", self.path, inner)))?;
        Ok(EntryInfo {
            path: key,
            length: data.len() as u64,
        })
    }

    fn read_at(&mut self, entry: &EntryInfo, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self
            .entries
            .get(&entry.path)
            .ok_or_else(|| BindError::FileNotFound(entry.path.clone()))?;
        let start = (offset as usize).min(data.len());
        let n = (data.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }
}

fn normalize_entry(entry: &str) -> String {
    let mut key = entry.replace('\\', "/").to_ascii_lowercase();
    if !key.starts_with('/') {
        key.insert(0, '/');
    }
    key
}

/// Serves unpacked containers: each container path names a directory
///
/// Relative container paths resolve against `root`. Entry paths may not
/// escape the container directory.
#[derive(Debug, Clone)]
pub struct DirectoryContainerStore {
    root: PathBuf,
}

impl DirectoryContainerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ContainerStore for DirectoryContainerStore {
    fn open(&self, path: &str) -> Result<Box<dyn Container>> {
        let dir = self.root.join(path);
        if !dir.is_dir() {
            return Err(BindError::FileNotFound(dir.display().to_string()));
        }
        tracing::debug!(container = %dir.display(), "Directory container opened");
        Ok(Box::new(DirectoryContainer {
            path: path.to_string(),
            dir,
            current: None,
        }))
    }
}

struct DirectoryContainer {
    path: String,
    dir: PathBuf,
    current: Option<(String, File)>,
}

impl DirectoryContainer {
    fn entry_path(&self, inner: &str) -> Result<PathBuf> {
        let relative = Path::new(inner.trim_start_matches(['/', '\\']));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(BindError::FileNotFound(format!("{}::{}", self.path, inner)));
        }
        Ok(self.dir.join(relative))
    }
}

impl Container for DirectoryContainer {
    fn path(&self) -> &str {
        &self.path
    }

    fn resolve(&mut self, inner: &str) -> Result<EntryInfo> {
        let file = self.entry_path(inner)?;
        let metadata = std::fs::metadata(&file)
            .map_err(|_| BindError::FileNotFound(format!("{}::{}", self.path, inner)))?;
        if !metadata.is_file() {
            return Err(BindError::FileNotFound(format!("{}::{}", self.path, inner)));
        }
        Ok(EntryInfo {
            path: inner.to_string(),
            length: metadata.len(),
        })
    }

    fn read_at(&mut self, entry: &EntryInfo, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let reopen = !matches!(self.current, Some((ref p, _)) if *p == entry.path);
        if reopen {
            let file = File::open(self.entry_path(&entry.path)?)?;
            self.current = Some((entry.path.clone(), file));
        }
        match self.current {
            Some((_, ref mut file)) => {
                file.seek(SeekFrom::Start(offset))?;
                Ok(file.read(buf)?)
            }
            None => Err(BindError::DataNotAvailable(entry.path.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_resolve_and_read() {
        let store = MemoryContainerStore::new();
        store.insert("test.chm", "/blank.html", &b"<html></html>"[..]).unwrap();

        let mut container = store.open("test.chm").unwrap();
        assert_eq!(store.open_count(), 1);

        let entry = container.resolve("/BLANK.html").unwrap();
        assert_eq!(entry.length, 13);

        let mut buf = [0u8; 5];
        assert_eq!(container.read_at(&entry, 0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"<html");
        assert_eq!(container.read_at(&entry, 10, &mut buf).unwrap(), 3);
        assert_eq!(container.read_at(&entry, 13, &mut buf).unwrap(), 0);

        drop(container);
        assert_eq!(store.open_count(), 0);
    }

    #[test]
    fn test_memory_store_missing() {
        let store = MemoryContainerStore::new();
        assert!(matches!(store.open("nope.chm"), Err(BindError::FileNotFound(_))));

        store.insert("a.chm", "x.html", &b"x"[..]).unwrap();
        let mut container = store.open("a.chm").unwrap();
        assert!(container.resolve("/x.html").is_ok());
        assert!(matches!(
            container.resolve("/y.html"),
            Err(BindError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_directory_store() {
        let dir = tempfile::tempdir().unwrap();
        let chm = dir.path().join("help.chm");
        std::fs::create_dir_all(chm.join("sub")).unwrap();
        std::fs::write(chm.join("sub").join("page.html"), b"<p>hi</p>").unwrap();

        let store = DirectoryContainerStore::new(dir.path());
        let mut container = store.open("help.chm").unwrap();
        let entry = container.resolve("/sub/page.html").unwrap();
        assert_eq!(entry.length, 9);

        let mut buf = [0u8; 64];
        let n = container.read_at(&entry, 3, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi</p>");

        assert!(matches!(
            container.resolve("/../escape.html"),
            Err(BindError::FileNotFound(_))
        ));
        assert!(matches!(store.open("missing.chm"), Err(BindError::FileNotFound(_))));
    }

    #[test]
    fn test_empty_store() {
        assert!(matches!(
            EmptyContainerStore.open("x"),
            Err(BindError::FileNotFound(_))
        ));
    }
}
