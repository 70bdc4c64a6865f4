//! Local configuration store: scene backups plus the snapshot ring buffer
//!
//! Every mutation rewrites the whole document through the [`BlobStore`]; the
//! in-memory copy is only replaced once the write succeeded.

use crate::error::{HassError, Result};
use crate::scenes::model::{LocalBackupEntry, Snapshot};
use crate::storage::BlobStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info, warn};

/// Current backup document format
pub const BACKUP_FORMAT_VERSION: u32 = 1;

fn current_version() -> u32 {
    BACKUP_FORMAT_VERSION
}

/// On-disk backup document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDocument {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default)]
    pub scenes: BTreeMap<String, LocalBackupEntry>,
    /// Oldest first
    #[serde(default)]
    pub snapshots: VecDeque<Snapshot>,
}

impl Default for BackupDocument {
    fn default() -> Self {
        Self {
            version: BACKUP_FORMAT_VERSION,
            scenes: BTreeMap::new(),
            snapshots: VecDeque::new(),
        }
    }
}

/// Local scene backups and snapshots
pub struct ConfigurationStore {
    blob: Box<dyn BlobStore>,
    document: BackupDocument,
    max_snapshots: usize,
}

impl ConfigurationStore {
    /// Open the store, loading the existing document if there is one
    pub fn open(blob: Box<dyn BlobStore>, max_snapshots: usize) -> Result<Self> {
        let document = match blob.read()? {
            Some(contents) if !contents.trim().is_empty() => {
                let document: BackupDocument = serde_json::from_str(&contents).map_err(|e| {
                    HassError::storage(format!(
                        "Backup document {} is unreadable: {e}",
                        blob.describe()
                    ))
                })?;
                if document.version > BACKUP_FORMAT_VERSION {
                    return Err(HassError::storage(format!(
                        "Backup document version {} is newer than supported version {}",
                        document.version, BACKUP_FORMAT_VERSION
                    )));
                }
                document
            }
            _ => {
                debug!("No backup document at {}, starting empty", blob.describe());
                BackupDocument::default()
            }
        };

        info!(
            "Loaded local backup from {} ({} scenes, {} snapshots)",
            blob.describe(),
            document.scenes.len(),
            document.snapshots.len()
        );

        let mut store = Self {
            blob,
            document,
            max_snapshots,
        };
        if store.document.snapshots.len() > max_snapshots {
            let mut next = store.document.clone();
            trim_snapshots(&mut next.snapshots, max_snapshots);
            store.commit(next)?;
        }
        Ok(store)
    }

    fn commit(&mut self, mut next: BackupDocument) -> Result<()> {
        next.version = BACKUP_FORMAT_VERSION;
        let contents = serde_json::to_string_pretty(&next)?;
        self.blob.write(&contents)?;
        self.document = next;
        Ok(())
    }

    pub fn get(&self, scene_id: &str) -> Option<LocalBackupEntry> {
        self.document.scenes.get(scene_id).cloned()
    }

    /// Insert or replace a backup entry, keeping the original creation time
    pub fn put(&mut self, mut entry: LocalBackupEntry) -> Result<()> {
        let scene_id = entry.scene.id.clone();
        if let Some(existing) = self.document.scenes.get(&scene_id) {
            entry.created_at = existing.created_at;
        }
        entry.updated_at = Utc::now();

        let mut next = self.document.clone();
        next.scenes.insert(scene_id.clone(), entry);
        self.commit(next)?;
        debug!("Stored local backup of scene {scene_id}");
        Ok(())
    }

    pub fn remove(&mut self, scene_id: &str) -> Result<Option<LocalBackupEntry>> {
        if !self.document.scenes.contains_key(scene_id) {
            return Ok(None);
        }
        let mut next = self.document.clone();
        let removed = next.scenes.remove(scene_id);
        self.commit(next)?;
        Ok(removed)
    }

    /// Every stored scene, ordered by scene id
    pub fn list_all(&self) -> Vec<LocalBackupEntry> {
        self.document.scenes.values().cloned().collect()
    }

    /// Append a snapshot, evicting the oldest ones beyond capacity
    pub fn append_snapshot(&mut self, snapshot: Snapshot) -> Result<()> {
        let mut next = self.document.clone();
        next.snapshots.push_back(snapshot);
        let evicted = trim_snapshots(&mut next.snapshots, self.max_snapshots);
        self.commit(next)?;
        if evicted > 0 {
            debug!("Evicted {evicted} old snapshot(s)");
        }
        Ok(())
    }

    /// Snapshots, newest first, optionally for one scene only
    pub fn list_snapshots(&self, scene_id: Option<&str>) -> Vec<Snapshot> {
        self.document
            .snapshots
            .iter()
            .rev()
            .filter(|snapshot| scene_id.map_or(true, |id| snapshot.scene_id == id))
            .cloned()
            .collect()
    }

    pub fn get_snapshot(&self, snapshot_id: &str) -> Option<Snapshot> {
        self.document
            .snapshots
            .iter()
            .find(|snapshot| snapshot.id == snapshot_id)
            .cloned()
    }

    pub fn snapshot_count(&self) -> usize {
        self.document.snapshots.len()
    }

    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }

    pub fn location(&self) -> String {
        self.blob.describe()
    }
}

fn trim_snapshots(snapshots: &mut VecDeque<Snapshot>, max: usize) -> usize {
    let mut evicted = 0;
    while snapshots.len() > max {
        snapshots.pop_front();
        evicted += 1;
    }
    if evicted > 0 && max == 0 {
        warn!("Snapshot capacity is zero; snapshots are not retained");
    }
    evicted
}
