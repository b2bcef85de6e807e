//! Realm Store - Durable world records
//!
//! Saves are merges: dirty chunks and auxiliary records are upserted into the
//! stored record by key and nothing already stored is ever dropped.

pub mod error;
pub mod file;
pub mod memory;
pub mod record;

pub use error::StoreError;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use record::{RoleGrant, SaveBatch, WorldRecord, RECORD_VERSION};

use realm_core::WorldId;

/// Durable backing store for world records
pub trait PersistentStore: Send + Sync {
    /// Load the record for `world_id`, or `None` if it was never saved
    fn load(&self, world_id: &WorldId) -> Result<Option<WorldRecord>, StoreError>;

    /// Merge `batch` into the stored record (or into an empty one).
    /// An empty batch leaves stored content untouched.
    fn save(&self, world_id: &WorldId, batch: &SaveBatch) -> Result<(), StoreError>;

    /// Remove a world entirely. Returns whether anything was stored.
    fn delete(&self, world_id: &WorldId) -> Result<bool, StoreError>;

    /// Every world with a stored record
    fn list_worlds(&self) -> Result<Vec<WorldId>, StoreError>;
}
