//! A live world: its chunks, observers, permissions, and dirty tracking
//!
//! Every mutation takes the instance's write lock, so writes to one world are
//! applied strictly in sequence and readers never see a partially-written
//! cell. Deltas are published to the [`DeltaSink`] while that lock is held,
//! which makes the sink's order the application order.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use realm_core::{ActorId, BlockPos, ChunkCoord, WorldId};
use tracing::{debug, warn};

use crate::block::Block;
use crate::chunk::Chunk;
use crate::error::WorldError;
use crate::permission::{Capability, PermissionOracle, PermissionTable, Role, Visibility};
use crate::terrain::TerrainGenerator;

/// A single applied block change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDelta {
    pub world_id: WorldId,
    pub pos: BlockPos,
    pub block: Block,
    /// Actor whose mutation produced this delta
    pub origin: ActorId,
    /// Per-world application order, starting at 1
    pub sequence: u64,
}

/// Receives deltas in the order they were applied
pub trait DeltaSink: Send + Sync {
    fn publish(&self, delta: BlockDelta);
}

/// Discards every delta
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDeltaSink;

impl DeltaSink for NullDeltaSink {
    fn publish(&self, _delta: BlockDelta) {}
}

/// World-level metadata persisted alongside the chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldHeader {
    pub seed: i64,
    pub owner: Option<ActorId>,
    pub visibility: Visibility,
    pub grants: HashMap<ActorId, Role>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSnapshot {
    pub coord: ChunkCoord,
    pub bytes: Vec<u8>,
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxRecordSnapshot {
    pub key: String,
    pub bytes: Vec<u8>,
    pub revision: u64,
}

/// Point-in-time copy of everything not yet persisted
#[derive(Debug, Clone)]
pub struct WorldSnapshot {
    pub world_id: WorldId,
    /// Present only when metadata changed since the last confirmed save
    pub header: Option<WorldHeader>,
    pub chunks: Vec<ChunkSnapshot>,
    pub aux_records: Vec<AuxRecordSnapshot>,
    meta_revision: u64,
}

impl WorldSnapshot {
    pub fn is_empty(&self) -> bool {
        self.header.is_none() && self.chunks.is_empty() && self.aux_records.is_empty()
    }
}

/// Construction parameters shared by fresh and hydrated instances
#[derive(Clone)]
pub struct InstanceOptions {
    /// Chebyshev radius, in chunks around the origin, of the world's extent
    pub world_radius: u32,
    pub generator: Arc<dyn TerrainGenerator>,
    pub sink: Arc<dyn DeltaSink>,
}

struct AuxEntry {
    bytes: Vec<u8>,
    revision: u64,
    dirty: bool,
}

struct WorldState {
    chunks: HashMap<ChunkCoord, Chunk>,
    dirty: HashSet<ChunkCoord>,
    aux: HashMap<String, AuxEntry>,
    permissions: PermissionTable,
    meta_dirty: bool,
    meta_revision: u64,
    observers: HashSet<ActorId>,
    empty_since: Option<DateTime<Utc>>,
    sequence: u64,
}

/// One resident world
pub struct WorldInstance {
    id: WorldId,
    seed: i64,
    world_radius: u32,
    generator: Arc<dyn TerrainGenerator>,
    sink: Arc<dyn DeltaSink>,
    state: RwLock<WorldState>,
}

impl fmt::Debug for WorldInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldInstance")
            .field("id", &self.id)
            .field("seed", &self.seed)
            .field("world_radius", &self.world_radius)
            .finish_non_exhaustive()
    }
}

impl WorldInstance {
    /// A brand-new world. Its metadata starts dirty so the first persist
    /// records the seed and owner.
    pub fn fresh(id: WorldId, seed: i64, options: InstanceOptions, now: DateTime<Utc>) -> Self {
        let state = WorldState {
            chunks: HashMap::new(),
            dirty: HashSet::new(),
            aux: HashMap::new(),
            permissions: PermissionTable::default(),
            meta_dirty: true,
            meta_revision: 1,
            observers: HashSet::new(),
            empty_since: Some(now),
            sequence: 0,
        };
        Self::with_state(id, seed, options, state)
    }

    /// Rebuild a world from persisted data. Every chunk is decoded and applied
    /// before this returns; a chunk that fails to decode is replaced by a
    /// freshly generated one.
    pub fn hydrate(
        id: WorldId,
        header: WorldHeader,
        chunks: impl IntoIterator<Item = (ChunkCoord, Vec<u8>)>,
        aux_records: impl IntoIterator<Item = (String, Vec<u8>)>,
        options: InstanceOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let mut loaded = HashMap::new();
        for (coord, bytes) in chunks {
            let chunk = match Chunk::deserialize(&bytes) {
                Ok(chunk) if chunk.coord() == coord => chunk,
                Ok(chunk) => {
                    warn!(
                        "World {}: chunk stored at {} claims to be {}, regenerating",
                        id,
                        coord,
                        chunk.coord()
                    );
                    Chunk::generate(coord, header.seed, options.generator.as_ref())
                }
                Err(e) => {
                    warn!("World {}: corrupt chunk {} ({}), regenerating", id, coord, e);
                    Chunk::generate(coord, header.seed, options.generator.as_ref())
                }
            };
            loaded.insert(coord, chunk);
        }

        let aux = aux_records
            .into_iter()
            .map(|(key, bytes)| {
                let entry = AuxEntry {
                    bytes,
                    revision: 0,
                    dirty: false,
                };
                (key, entry)
            })
            .collect();

        let state = WorldState {
            chunks: loaded,
            dirty: HashSet::new(),
            aux,
            permissions: PermissionTable::new(header.owner, header.visibility, header.grants),
            meta_dirty: false,
            meta_revision: 0,
            observers: HashSet::new(),
            empty_since: Some(now),
            sequence: 0,
        };
        Self::with_state(id, header.seed, options, state)
    }

    fn with_state(id: WorldId, seed: i64, options: InstanceOptions, state: WorldState) -> Self {
        Self {
            id,
            seed,
            world_radius: options.world_radius,
            generator: options.generator,
            sink: options.sink,
            state: RwLock::new(state),
        }
    }

    pub fn id(&self) -> &WorldId {
        &self.id
    }

    pub fn seed(&self) -> i64 {
        self.seed
    }

    pub fn world_radius(&self) -> u32 {
        self.world_radius
    }

    /// Whether `coord` lies inside the world's extent
    pub fn contains_chunk(&self, coord: ChunkCoord) -> bool {
        coord.distance(&ChunkCoord::new(0, 0)) <= self.world_radius
    }

    // ---- Chunks ----

    /// Run `f` against the chunk at `coord`, generating it first if needed
    pub fn with_chunk<R>(&self, coord: ChunkCoord, f: impl FnOnce(&Chunk) -> R) -> Result<R, WorldError> {
        if !self.contains_chunk(coord) {
            return Err(WorldError::ChunkOutOfBounds(coord));
        }
        let state = self.state.upgradable_read();
        if let Some(chunk) = state.chunks.get(&coord) {
            return Ok(f(chunk));
        }
        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        self.materialize(&mut state, coord);
        let state = RwLockWriteGuard::downgrade(state);
        Ok(f(&state.chunks[&coord]))
    }

    /// A copy of the chunk at `coord`, generating it first if needed
    pub fn get_or_create_chunk(&self, coord: ChunkCoord) -> Result<Chunk, WorldError> {
        self.with_chunk(coord, Chunk::clone)
    }

    /// Serialized form of the chunk at `coord`, for streaming
    pub fn chunk_bytes(&self, coord: ChunkCoord) -> Result<Vec<u8>, WorldError> {
        self.with_chunk(coord, Chunk::serialize)
    }

    pub fn loaded_chunk_count(&self) -> usize {
        self.state.read().chunks.len()
    }

    pub fn is_chunk_loaded(&self, coord: ChunkCoord) -> bool {
        self.state.read().chunks.contains_key(&coord)
    }

    fn materialize<'a>(&self, state: &'a mut WorldState, coord: ChunkCoord) -> &'a mut Chunk {
        state.chunks.entry(coord).or_insert_with(|| {
            debug!("World {}: generating chunk {}", self.id, coord);
            Chunk::generate(coord, self.seed, self.generator.as_ref())
        })
    }

    // ---- Blocks ----

    /// Read a block. Any joined observer may read.
    pub fn read_block(&self, actor: ActorId, pos: BlockPos) -> Result<Block, WorldError> {
        if !self.is_observer(actor) {
            return Err(WorldError::NotJoined(actor));
        }
        let (coord, local) = pos.split().ok_or(WorldError::OutOfBounds(pos))?;
        self.with_chunk(coord, |chunk| chunk.get(local))?
            .map_err(WorldError::from)
    }

    /// Apply a block change on behalf of `actor`.
    ///
    /// Fails with `PermissionDenied`, and changes nothing, unless the actor's
    /// role carries the mutate capability.
    pub fn mutate_block(&self, actor: ActorId, pos: BlockPos, block: Block) -> Result<u64, WorldError> {
        let mut state = self.state.write();
        PermissionOracle::require(actor, state.permissions.role_of(actor), Capability::Mutate)?;
        if !state.observers.contains(&actor) {
            return Err(WorldError::NotJoined(actor));
        }
        let (coord, local) = pos.split().ok_or(WorldError::OutOfBounds(pos))?;
        if !self.contains_chunk(coord) {
            return Err(WorldError::OutOfBounds(pos));
        }

        self.materialize(&mut state, coord).set(local, block)?;
        state.dirty.insert(coord);
        state.sequence += 1;
        let sequence = state.sequence;

        self.sink.publish(BlockDelta {
            world_id: self.id.clone(),
            pos,
            block,
            origin: actor,
            sequence,
        });
        Ok(sequence)
    }

    // ---- Auxiliary records ----

    /// Store an opaque auxiliary record (container contents and the like)
    pub fn put_aux_record(&self, actor: ActorId, key: impl Into<String>, bytes: Vec<u8>) -> Result<(), WorldError> {
        let mut state = self.state.write();
        PermissionOracle::require(actor, state.permissions.role_of(actor), Capability::Mutate)?;
        let entry = state.aux.entry(key.into()).or_insert(AuxEntry {
            bytes: Vec::new(),
            revision: 0,
            dirty: false,
        });
        entry.bytes = bytes;
        entry.revision += 1;
        entry.dirty = true;
        Ok(())
    }

    pub fn aux_record(&self, key: &str) -> Option<Vec<u8>> {
        self.state.read().aux.get(key).map(|entry| entry.bytes.clone())
    }

    // ---- Permissions ----

    pub fn role_of(&self, actor: ActorId) -> Role {
        self.state.read().permissions.role_of(actor)
    }

    pub fn owner(&self) -> Option<ActorId> {
        self.state.read().permissions.owner()
    }

    pub fn visibility(&self) -> Visibility {
        self.state.read().permissions.visibility()
    }

    pub fn grant_role(&self, admin: ActorId, target: ActorId, role: Role) -> Result<(), WorldError> {
        let mut state = self.state.write();
        state.permissions.grant(admin, target, role)?;
        mark_meta_dirty(&mut state);
        Ok(())
    }

    pub fn set_visibility(&self, admin: ActorId, visibility: Visibility) -> Result<(), WorldError> {
        let mut state = self.state.write();
        state.permissions.set_visibility(admin, visibility)?;
        mark_meta_dirty(&mut state);
        Ok(())
    }

    /// Fail unless `actor` may administer this world
    pub fn require_admin(&self, actor: ActorId) -> Result<(), WorldError> {
        PermissionOracle::require(actor, self.role_of(actor), Capability::Administer)
    }

    pub fn header(&self) -> WorldHeader {
        let state = self.state.read();
        header_of(self.seed, &state.permissions)
    }

    // ---- Observers ----

    /// Admit `actor` as an observer. The first actor to join a world without
    /// an owner becomes its owner.
    pub fn admit(&self, actor: ActorId) -> Result<Role, WorldError> {
        self.admit_inner(actor).map(|(role, _)| role)
    }

    /// Same gate as [`WorldInstance::admit`]; returns whether `actor` was not
    /// already an observer
    pub fn add_observer(&self, actor: ActorId) -> Result<bool, WorldError> {
        self.admit_inner(actor).map(|(_, added)| added)
    }

    fn admit_inner(&self, actor: ActorId) -> Result<(Role, bool), WorldError> {
        let mut state = self.state.write();
        if state.permissions.owner().is_none() && state.permissions.claim_owner(actor) {
            mark_meta_dirty(&mut state);
        }
        let role = state.permissions.role_of(actor);
        PermissionOracle::require(actor, role, Capability::Read)?;
        let added = state.observers.insert(actor);
        state.empty_since = None;
        Ok((role, added))
    }

    /// Remove an observer. Removing the last one stamps `empty_since`.
    pub fn remove_observer(&self, actor: ActorId, now: DateTime<Utc>) -> bool {
        let mut state = self.state.write();
        let removed = state.observers.remove(&actor);
        if removed && state.observers.is_empty() {
            state.empty_since = Some(now);
        }
        removed
    }

    pub fn is_observer(&self, actor: ActorId) -> bool {
        self.state.read().observers.contains(&actor)
    }

    pub fn observer_count(&self) -> usize {
        self.state.read().observers.len()
    }

    pub fn observers(&self) -> Vec<ActorId> {
        self.state.read().observers.iter().copied().collect()
    }

    /// When the last observer left; `None` while anyone is joined
    pub fn empty_since(&self) -> Option<DateTime<Utc>> {
        self.state.read().empty_since
    }

    // ---- Persistence ----

    pub fn has_unsaved_changes(&self) -> bool {
        let state = self.state.read();
        state.meta_dirty || !state.dirty.is_empty() || state.aux.values().any(|e| e.dirty)
    }

    pub fn dirty_chunk_count(&self) -> usize {
        self.state.read().dirty.len()
    }

    /// Copy out every unsaved chunk, auxiliary record, and (if changed) the
    /// header. Dirty flags are left untouched.
    pub fn snapshot(&self) -> WorldSnapshot {
        let state = self.state.read();
        let mut chunks: Vec<ChunkSnapshot> = state
            .dirty
            .iter()
            .filter_map(|coord| state.chunks.get(coord))
            .map(|chunk| ChunkSnapshot {
                coord: chunk.coord(),
                bytes: chunk.serialize(),
                revision: chunk.revision(),
            })
            .collect();
        chunks.sort_by_key(|c| c.coord);

        let mut aux_records: Vec<AuxRecordSnapshot> = state
            .aux
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(key, entry)| AuxRecordSnapshot {
                key: key.clone(),
                bytes: entry.bytes.clone(),
                revision: entry.revision,
            })
            .collect();
        aux_records.sort_by(|a, b| a.key.cmp(&b.key));

        WorldSnapshot {
            world_id: self.id.clone(),
            header: state
                .meta_dirty
                .then(|| header_of(self.seed, &state.permissions)),
            chunks,
            aux_records,
            meta_revision: state.meta_revision,
        }
    }

    /// Clear dirty state for everything in `snapshot` that has not been
    /// written again since the snapshot was taken
    pub fn confirm_saved(&self, snapshot: &WorldSnapshot) {
        let mut state = self.state.write();
        let state = &mut *state;
        for saved in &snapshot.chunks {
            if let Some(chunk) = state.chunks.get_mut(&saved.coord) {
                if chunk.revision() == saved.revision {
                    chunk.clear_dirty();
                    state.dirty.remove(&saved.coord);
                }
            }
        }
        for saved in &snapshot.aux_records {
            if let Some(entry) = state.aux.get_mut(&saved.key) {
                if entry.revision == saved.revision {
                    entry.dirty = false;
                }
            }
        }
        if snapshot.header.is_some() && state.meta_revision == snapshot.meta_revision {
            state.meta_dirty = false;
        }
    }
}

fn mark_meta_dirty(state: &mut WorldState) {
    state.meta_dirty = true;
    state.meta_revision += 1;
}

fn header_of(seed: i64, permissions: &PermissionTable) -> WorldHeader {
    WorldHeader {
        seed,
        owner: permissions.owner(),
        visibility: permissions.visibility(),
        grants: permissions.grants().clone(),
    }
}
