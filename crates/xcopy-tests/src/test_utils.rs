//! Sandboxed volumes and tree snapshots
//!
//! A [`Sandbox`] owns one temporary directory holding a sub-directory per
//! volume. Its [`backend`](Sandbox::backend) is a [`LocalBackend`] with every
//! volume registered as a drive or a native filesystem.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;
use xcopy_config::Config;
use xcopy_engine::{EngineBuilder, SchedulerConfig, XcopyEngine};
use xcopy_fs::LocalBackend;
use xcopy_types::{Backend, InFlightLimit};

/// One entry of a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEntry {
    /// A directory
    Dir,
    /// A file and its contents
    File(Vec<u8>),
}

/// Temporary drive and native roots
#[derive(Debug)]
pub struct Sandbox {
    temp_dir: TempDir,
    drives: Vec<String>,
    natives: Vec<String>,
}

impl Sandbox {
    /// Create an empty sandbox
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
            drives: Vec::new(),
            natives: Vec::new(),
        }
    }

    /// Add a drive named `id`
    pub fn with_drive(mut self, id: &str) -> Self {
        fs::create_dir_all(self.temp_dir.path().join(id)).expect("Failed to create drive root");
        self.drives.push(id.to_string());
        self
    }

    /// Add a native filesystem named `id`
    pub fn with_native(mut self, id: &str) -> Self {
        fs::create_dir_all(self.temp_dir.path().join(id)).expect("Failed to create native root");
        self.natives.push(id.to_string());
        self
    }

    /// Root directory of a volume
    pub fn root(&self, volume: &str) -> PathBuf {
        self.temp_dir.path().join(volume)
    }

    /// Path of `relative` inside a volume
    pub fn path(&self, volume: &str, relative: &str) -> PathBuf {
        let mut path = self.root(volume);
        for part in relative.split('/').filter(|part| !part.is_empty()) {
            path.push(part);
        }
        path
    }

    /// Backend over every volume of the sandbox
    pub fn backend(&self) -> LocalBackend {
        let backend = self
            .drives
            .iter()
            .fold(LocalBackend::new(), |backend, id| backend.with_drive(id, self.root(id)));
        self.natives
            .iter()
            .fold(backend, |backend, id| backend.with_native(id, self.root(id)))
    }

    /// Create a directory and its parents
    pub fn mkdir(&self, volume: &str, relative: &str) {
        fs::create_dir_all(self.path(volume, relative)).expect("Failed to create directory");
    }

    /// Write a file, creating its parents
    pub fn write(&self, volume: &str, relative: &str, contents: &[u8]) {
        let path = self.path(volume, relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(&path, contents).expect("Failed to write test file");
    }

    /// Contents of a file, `None` when it is missing
    pub fn read(&self, volume: &str, relative: &str) -> Option<Vec<u8>> {
        fs::read(self.path(volume, relative)).ok()
    }

    /// Whether anything exists at `relative`
    pub fn exists(&self, volume: &str, relative: &str) -> bool {
        self.path(volume, relative).exists()
    }

    /// Every entry below `relative`, keyed by its `/` separated path
    pub fn snapshot(&self, volume: &str, relative: &str) -> BTreeMap<String, TreeEntry> {
        snapshot(&self.path(volume, relative))
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Every entry below `root`, keyed by its `/` separated path
pub fn snapshot(root: &Path) -> BTreeMap<String, TreeEntry> {
    let mut entries = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.expect("Failed to walk directory");
        let relative = entry
            .path()
            .strip_prefix(root)
            .expect("walked outside the root")
            .components()
            .map(|part| part.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let value = if entry.file_type().is_dir() {
            TreeEntry::Dir
        } else {
            TreeEntry::File(fs::read(entry.path()).expect("Failed to read file"))
        };
        entries.insert(relative, value);
    }
    entries
}

/// Engine over `backend` with default settings and the given in-flight ceiling
pub fn engine(backend: Arc<dyn Backend>, max_in_flight: usize) -> XcopyEngine {
    let limit = InFlightLimit::new(max_in_flight).expect("invalid in-flight limit");
    EngineBuilder::new()
        .with_config(Config::default())
        .with_scheduler_config(SchedulerConfig::default().with_max_in_flight(limit))
        .with_backend(backend)
        .build()
        .expect("Failed to build engine")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_walks_the_tree() {
        let sandbox = Sandbox::new().with_drive("home");
        sandbox.write("home", "photos/2024/a.jpg", b"jpeg");
        sandbox.mkdir("home", "photos/empty");

        let tree = sandbox.snapshot("home", "photos");
        assert_eq!(tree.len(), 3);
        assert_eq!(tree["2024"], TreeEntry::Dir);
        assert_eq!(tree["2024/a.jpg"], TreeEntry::File(b"jpeg".to_vec()));
        assert_eq!(tree["empty"], TreeEntry::Dir);
    }

    #[test]
    fn test_backend_knows_every_volume() {
        let sandbox = Sandbox::new().with_drive("home").with_native("usb");
        let backend = sandbox.backend();
        assert!(backend.has_volume("home"));
        assert!(backend.has_volume("usb"));
        assert!(!backend.has_volume("other"));
    }
}
