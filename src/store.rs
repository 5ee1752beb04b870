//! Mock store backends.
//!
//! The store is read-only from the engine's point of view and is consulted
//! on every call, so edits to mock files take effect immediately.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// Hierarchical, path-keyed source of mock definitions.
#[async_trait]
pub trait MockStore: Send + Sync {
    /// Whether `path` names a mock definition.
    async fn is_file(&self, path: &Path) -> bool;

    /// Whether `path` names a directory-like prefix of other entries.
    async fn is_dir(&self, path: &Path) -> bool;

    /// Read the raw mock definition at `path`.
    async fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

/// Store backed by the local filesystem.
///
/// Uses `tokio::fs`, so reads run on the blocking pool and never stall
/// other calls.
#[derive(Debug, Clone, Default)]
pub struct FsStore;

#[async_trait]
impl MockStore for FsStore {
    async fn is_file(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn is_dir(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }
}

/// Store held entirely in memory, keyed by path.
///
/// Directories are implicit: a path is a directory when some entry lives
/// beneath it.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    files: BTreeMap<PathBuf, String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a mock definition.
    pub fn insert(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    /// Builder-style [`InMemoryStore::insert`].
    pub fn with(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }

    pub fn remove(&mut self, path: &Path) -> Option<String> {
        self.files.remove(path)
    }
}

#[async_trait]
impl MockStore for InMemoryStore {
    async fn is_file(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    async fn is_dir(&self, path: &Path) -> bool {
        self.files
            .keys()
            .any(|file| file.as_path() != path && file.starts_with(path))
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no mock stored at {}", path.display()),
            )
        })
    }
}
