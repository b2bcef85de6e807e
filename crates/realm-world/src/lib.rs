//! Realm World - Chunk storage and live world instances
//!
//! Provides the dense chunk grid and its run-length codec, seed-deterministic
//! terrain generation, role-based permissions, and the `WorldInstance` that
//! serializes mutations for one world.

pub mod block;
pub mod chunk;
pub mod error;
pub mod instance;
pub mod permission;
pub mod terrain;

pub use block::{Block, BlockCatalog, BlockProperties};
pub use chunk::Chunk;
pub use error::{ChunkError, WorldError};
pub use instance::{
    AuxRecordSnapshot, BlockDelta, ChunkSnapshot, DeltaSink, InstanceOptions, NullDeltaSink,
    WorldHeader, WorldInstance, WorldSnapshot,
};
pub use permission::{Capability, PermissionOracle, PermissionTable, Role, Visibility};
pub use terrain::{FlatTerrain, NoiseTerrain, TerrainConfig, TerrainGenerator};
