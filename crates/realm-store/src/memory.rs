//! In-process store used by tests and ephemeral servers

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use realm_core::WorldId;
use tracing::debug;

use crate::error::StoreError;
use crate::record::{merged, SaveBatch, WorldRecord};
use crate::PersistentStore;

/// Keeps records in a map. Can be switched unavailable to simulate an outage.
#[derive(Debug)]
pub struct MemoryStore {
    records: Mutex<HashMap<WorldId, WorldRecord>>,
    available: AtomicBool,
    saves: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            saves: AtomicUsize::new(0),
        }
    }

    /// While unavailable, every operation fails with `StoreError::Unavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of non-empty saves that reached the store
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Insert a record directly, bypassing the merge
    pub fn insert(&self, record: WorldRecord) {
        self.records.lock().insert(record.world_id.clone(), record);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".into()))
        }
    }
}

impl PersistentStore for MemoryStore {
    fn load(&self, world_id: &WorldId) -> Result<Option<WorldRecord>, StoreError> {
        self.check_available()?;
        Ok(self.records.lock().get(world_id).cloned())
    }

    fn save(&self, world_id: &WorldId, batch: &SaveBatch) -> Result<(), StoreError> {
        self.check_available()?;
        if batch.is_empty() {
            return Ok(());
        }
        let mut records = self.records.lock();
        let record = merged(records.remove(world_id), world_id, batch);
        debug!(
            "Saved world {} ({} chunks stored)",
            world_id,
            record.chunks.len()
        );
        records.insert(world_id.clone(), record);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, world_id: &WorldId) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.records.lock().remove(world_id).is_some())
    }

    fn list_worlds(&self) -> Result<Vec<WorldId>, StoreError> {
        self.check_available()?;
        let mut ids: Vec<WorldId> = self.records.lock().keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use realm_core::ChunkCoord;

    fn id(name: &str) -> WorldId {
        WorldId::parse(name).unwrap()
    }

    #[test]
    fn test_disjoint_saves_keep_everything() {
        let store = MemoryStore::new();
        let world = id("w");
        store
            .save(&world, &SaveBatch::new(Utc::now()).with_chunk(ChunkCoord::new(0, 0), vec![1]))
            .unwrap();
        store
            .save(&world, &SaveBatch::new(Utc::now()).with_chunk(ChunkCoord::new(1, 0), vec![2]))
            .unwrap();

        let record = store.load(&world).unwrap().unwrap();
        assert_eq!(record.chunks.len(), 2);
        assert_eq!(record.chunks["0,0"], vec![1]);
        assert_eq!(record.chunks["1,0"], vec![2]);
    }

    #[test]
    fn test_empty_save_is_noop() {
        let store = MemoryStore::new();
        let world = id("w");
        let batch = SaveBatch::new(Utc::now()).with_aux_record("a", vec![9]);
        store.save(&world, &batch).unwrap();
        let before = store.load(&world).unwrap();

        store.save(&world, &SaveBatch::new(Utc::now())).unwrap();
        store.save(&world, &SaveBatch::new(Utc::now())).unwrap();
        assert_eq!(store.load(&world).unwrap(), before);
        assert_eq!(store.save_count(), 1);

        store.save(&id("never"), &SaveBatch::new(Utc::now())).unwrap();
        assert!(store.load(&id("never")).unwrap().is_none());
    }

    #[test]
    fn test_unavailable_store_fails_retryably() {
        let store = MemoryStore::new();
        store.set_available(false);
        let err = store.load(&id("w")).unwrap_err();
        assert!(err.is_retryable());
        assert!(store
            .save(&id("w"), &SaveBatch::new(Utc::now()).with_aux_record("a", vec![]))
            .is_err());

        store.set_available(true);
        assert!(store.load(&id("w")).unwrap().is_none());
    }

    #[test]
    fn test_delete_and_list() {
        let store = MemoryStore::new();
        for name in ["b", "a"] {
            store
                .save(&id(name), &SaveBatch::new(Utc::now()).with_aux_record("k", vec![]))
                .unwrap();
        }
        assert_eq!(store.list_worlds().unwrap(), vec![id("a"), id("b")]);
        assert!(store.delete(&id("a")).unwrap());
        assert!(!store.delete(&id("a")).unwrap());
        assert_eq!(store.list_worlds().unwrap(), vec![id("b")]);
    }
}
