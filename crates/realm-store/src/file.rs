//! One JSON file per world under a root directory
//!
//! Writes go to a temporary sibling and are renamed into place, so a crash
//! mid-save leaves the previous record intact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use realm_core::WorldId;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::record::{merged, SaveBatch, WorldRecord};
use crate::PersistentStore;

const EXTENSION: &str = "json";

/// File-backed store
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    /// Serializes load-merge-write cycles
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        info!("World store at {}", root.display());
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Platform data directory, e.g. `~/.local/share/realm/worlds`
    pub fn default_root() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("realm")
            .join("worlds")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, world_id: &WorldId) -> PathBuf {
        // WorldId only admits [A-Za-z0-9_-], so it is a safe file stem
        self.root.join(format!("{}.{}", world_id, EXTENSION))
    }

    fn read_record(&self, world_id: &WorldId) -> Result<Option<WorldRecord>, StoreError> {
        let path = self.path_for(world_id);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: WorldRecord = serde_json::from_str(&json)
            .map_err(|e| StoreError::InvalidRecord(format!("{}: {}", path.display(), e)))?;
        if &record.world_id != world_id {
            return Err(StoreError::InvalidRecord(format!(
                "{} holds world {}",
                path.display(),
                record.world_id
            )));
        }
        Ok(Some(record))
    }

    fn write_record(&self, record: &WorldRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.world_id);
        let tmp = path.with_extension(format!("{}.tmp", EXTENSION));
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&tmp, json)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

impl PersistentStore for FileStore {
    fn load(&self, world_id: &WorldId) -> Result<Option<WorldRecord>, StoreError> {
        self.read_record(world_id)
    }

    fn save(&self, world_id: &WorldId, batch: &SaveBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock();
        let record = merged(self.read_record(world_id)?, world_id, batch);
        self.write_record(&record)?;
        debug!(
            "Saved world {} to {} ({} chunks, {} aux records in batch)",
            world_id,
            self.path_for(world_id).display(),
            batch.chunks.len(),
            batch.aux_records.len()
        );
        Ok(())
    }

    fn delete(&self, world_id: &WorldId) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.path_for(world_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_worlds(&self) -> Result<Vec<WorldId>, StoreError> {
        let mut worlds = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match WorldId::parse(stem) {
                Ok(id) => worlds.push(id),
                Err(e) => warn!("Ignoring {} in world store: {}", path.display(), e),
            }
        }
        worlds.sort();
        Ok(worlds)
    }
}
