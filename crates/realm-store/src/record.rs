//! Persisted world record and the merge applied on every save

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use realm_core::{ActorId, ChunkCoord, WorldId};
use realm_world::{Role, Visibility, WorldHeader, WorldSnapshot};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Current record format version
pub const RECORD_VERSION: u32 = 1;

/// An explicit role grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub actor: ActorId,
    pub role: Role,
}

/// Everything stored for one world
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldRecord {
    /// Record format version (for future migration)
    pub version: u32,
    pub world_id: WorldId,
    pub seed: i64,
    #[serde(default)]
    pub owner_id: Option<ActorId>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub grants: Vec<RoleGrant>,
    /// Serialized chunks keyed by `"cx,cz"`
    #[serde(default)]
    pub chunks: BTreeMap<String, Vec<u8>>,
    /// Opaque auxiliary records (container contents and the like)
    #[serde(default)]
    pub aux_records: BTreeMap<String, Vec<u8>>,
    #[serde(default)]
    pub last_saved_at: Option<DateTime<Utc>>,
}

impl WorldRecord {
    /// A record with nothing in it
    pub fn empty(world_id: WorldId) -> Self {
        Self {
            version: RECORD_VERSION,
            world_id,
            seed: 0,
            owner_id: None,
            visibility: Visibility::Public,
            grants: Vec::new(),
            chunks: BTreeMap::new(),
            aux_records: BTreeMap::new(),
            last_saved_at: None,
        }
    }

    /// Merge a batch into this record. Chunks and auxiliary records are
    /// upserted by key; entries absent from the batch are left untouched.
    pub fn merge(&mut self, batch: &SaveBatch) {
        if let Some(header) = &batch.header {
            self.seed = header.seed;
            self.owner_id = header.owner;
            self.visibility = header.visibility;
            let mut grants: Vec<RoleGrant> = header
                .grants
                .iter()
                .map(|(actor, role)| RoleGrant {
                    actor: *actor,
                    role: *role,
                })
                .collect();
            grants.sort_by_key(|g| g.actor);
            self.grants = grants;
        }
        for (coord, bytes) in &batch.chunks {
            self.chunks.insert(coord.key(), bytes.clone());
        }
        for (key, bytes) in &batch.aux_records {
            self.aux_records.insert(key.clone(), bytes.clone());
        }
        self.version = RECORD_VERSION;
        self.last_saved_at = Some(batch.saved_at);
    }

    /// World metadata in the form `WorldInstance::hydrate` expects
    pub fn header(&self) -> WorldHeader {
        WorldHeader {
            seed: self.seed,
            owner: self.owner_id,
            visibility: self.visibility,
            grants: self.grants.iter().map(|g| (g.actor, g.role)).collect(),
        }
    }

    /// Stored chunks with parsed coordinates. Entries with unparseable keys
    /// are skipped with a warning.
    pub fn chunk_entries(&self) -> Vec<(ChunkCoord, Vec<u8>)> {
        self.chunks
            .iter()
            .filter_map(|(key, bytes)| match ChunkCoord::parse_key(key) {
                Ok(coord) => Some((coord, bytes.clone())),
                Err(e) => {
                    warn!("World {}: skipping stored chunk: {}", self.world_id, e);
                    None
                }
            })
            .collect()
    }

    pub fn aux_entries(&self) -> Vec<(String, Vec<u8>)> {
        self.aux_records
            .iter()
            .map(|(key, bytes)| (key.clone(), bytes.clone()))
            .collect()
    }
}

/// The unsaved portion of one world, handed to `PersistentStore::save`
#[derive(Debug, Clone)]
pub struct SaveBatch {
    /// Replaces the stored metadata when present
    pub header: Option<WorldHeader>,
    pub chunks: Vec<(ChunkCoord, Vec<u8>)>,
    pub aux_records: Vec<(String, Vec<u8>)>,
    pub saved_at: DateTime<Utc>,
}

impl SaveBatch {
    pub fn new(saved_at: DateTime<Utc>) -> Self {
        Self {
            header: None,
            chunks: Vec::new(),
            aux_records: Vec::new(),
            saved_at,
        }
    }

    pub fn from_snapshot(snapshot: &WorldSnapshot, saved_at: DateTime<Utc>) -> Self {
        Self {
            header: snapshot.header.clone(),
            chunks: snapshot
                .chunks
                .iter()
                .map(|c| (c.coord, c.bytes.clone()))
                .collect(),
            aux_records: snapshot
                .aux_records
                .iter()
                .map(|a| (a.key.clone(), a.bytes.clone()))
                .collect(),
            saved_at,
        }
    }

    pub fn with_header(mut self, header: WorldHeader) -> Self {
        self.header = Some(header);
        self
    }

    pub fn with_chunk(mut self, coord: ChunkCoord, bytes: Vec<u8>) -> Self {
        self.chunks.push((coord, bytes));
        self
    }

    pub fn with_aux_record(mut self, key: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.aux_records.push((key.into(), bytes));
        self
    }

    /// Nothing to write
    pub fn is_empty(&self) -> bool {
        self.header.is_none() && self.chunks.is_empty() && self.aux_records.is_empty()
    }
}

/// Load-merge-store used by every `PersistentStore` implementation
pub(crate) fn merged(existing: Option<WorldRecord>, world_id: &WorldId, batch: &SaveBatch) -> WorldRecord {
    let mut record = existing.unwrap_or_else(|| WorldRecord::empty(world_id.clone()));
    record.merge(batch);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn world() -> WorldId {
        WorldId::parse("merge").unwrap()
    }

    #[test]
    fn test_merge_upserts_by_key() {
        let mut record = WorldRecord::empty(world());
        record.chunks.insert("0,0".into(), vec![1]);
        record.chunks.insert("5,5".into(), vec![5]);

        let batch = SaveBatch::new(Utc::now())
            .with_chunk(ChunkCoord::new(0, 0), vec![2])
            .with_chunk(ChunkCoord::new(-1, 3), vec![3]);
        record.merge(&batch);

        assert_eq!(record.chunks.len(), 3);
        assert_eq!(record.chunks["0,0"], vec![2]);
        assert_eq!(record.chunks["5,5"], vec![5]);
        assert_eq!(record.chunks["-1,3"], vec![3]);
        assert_eq!(record.last_saved_at, Some(batch.saved_at));
    }

    #[test]
    fn test_merge_without_header_keeps_metadata() {
        let owner = ActorId::new();
        let mut record = WorldRecord::empty(world());
        record.merge(&SaveBatch::new(Utc::now()).with_header(WorldHeader {
            seed: 99,
            owner: Some(owner),
            visibility: Visibility::Private,
            grants: HashMap::new(),
        }));

        record.merge(&SaveBatch::new(Utc::now()).with_aux_record("k", vec![1]));
        assert_eq!(record.seed, 99);
        assert_eq!(record.owner_id, Some(owner));
        assert_eq!(record.visibility, Visibility::Private);
        assert_eq!(record.aux_records["k"], vec![1]);
    }

    #[test]
    fn test_header_round_trip_with_grants() {
        let (owner, builder) = (ActorId::new(), ActorId::new());
        let header = WorldHeader {
            seed: -7,
            owner: Some(owner),
            visibility: Visibility::Public,
            grants: HashMap::from([(builder, Role::Builder)]),
        };
        let mut record = WorldRecord::empty(world());
        record.merge(&SaveBatch::new(Utc::now()).with_header(header.clone()));

        let json = serde_json::to_string(&record).unwrap();
        let loaded: WorldRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.header(), header);
    }

    #[test]
    fn test_bad_chunk_keys_are_skipped() {
        let mut record = WorldRecord::empty(world());
        record.chunks.insert("1,2".into(), vec![1]);
        record.chunks.insert("garbage".into(), vec![2]);
        let entries = record.chunk_entries();
        assert_eq!(entries, vec![(ChunkCoord::new(1, 2), vec![1])]);
    }
}
