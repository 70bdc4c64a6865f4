//! Storage layer for the local scene backup
//!
//! The backup is a single JSON document. [`BlobStore`] abstracts where that
//! document lives:
//! - File storage with atomic replace (default)
//! - In-memory storage (tests and ephemeral runs)

pub mod scene_store;

use crate::error::{HassError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub use scene_store::{BackupDocument, ConfigurationStore, BACKUP_FORMAT_VERSION};

/// Whole-document persistence primitive
pub trait BlobStore: Send + Sync {
    /// Current contents, `None` when nothing was stored yet
    fn read(&self) -> Result<Option<String>>;

    /// Replace the contents. Readers never observe a partial write.
    fn write(&self, contents: &str) -> Result<()>;

    /// Human readable location for logs
    fn describe(&self) -> String;
}

/// Blob stored in a file, replaced atomically through a temp file + rename
pub struct FileBlobStore {
    path: PathBuf,
}

impl FileBlobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlobStore for FileBlobStore {
    fn read(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HassError::storage(format!(
                "Failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn write(&self, contents: &str) -> Result<()> {
        let directory = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(directory).map_err(|e| {
            HassError::storage(format!("Failed to create {}: {e}", directory.display()))
        })?;

        let mut temp = tempfile::NamedTempFile::new_in(directory)
            .map_err(|e| HassError::storage(format!("Failed to create temp file: {e}")))?;
        temp.write_all(contents.as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| HassError::storage(format!("Failed to write backup: {e}")))?;
        temp.persist(&self.path).map_err(|e| {
            HassError::storage(format!("Failed to replace {}: {e}", self.path.display()))
        })?;

        debug!("Wrote {} bytes to {}", contents.len(), self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory blob. Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    contents: Arc<Mutex<Option<String>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Arc::new(Mutex::new(Some(contents.into()))),
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn read(&self) -> Result<Option<String>> {
        let guard = self
            .contents
            .lock()
            .map_err(|_| HassError::storage("memory store lock poisoned"))?;
        Ok(guard.clone())
    }

    fn write(&self, contents: &str) -> Result<()> {
        let mut guard = self
            .contents
            .lock()
            .map_err(|_| HassError::storage("memory store lock poisoned"))?;
        *guard = Some(contents.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
