use realm_core::{ActorId, BlockPos, ChunkCoord, LocalPos};
use thiserror::Error;

use crate::permission::{Capability, Role};

/// Errors raised by a single chunk
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// Local coordinate outside the chunk. Always a caller bug.
    #[error("Local position {0:?} is outside the chunk")]
    Range(LocalPos),

    /// Corrupt or truncated serialized chunk
    #[error("Malformed chunk data: {0}")]
    Format(String),
}

/// Errors raised by world instance operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error("Block {0:?} lies outside the world")]
    OutOfBounds(BlockPos),

    #[error("Chunk {0} lies outside the world")]
    ChunkOutOfBounds(ChunkCoord),

    #[error("Actor {actor} lacks the {capability:?} capability")]
    PermissionDenied {
        actor: ActorId,
        capability: Capability,
    },

    #[error("Role {role:?} cannot be granted to {target}")]
    InvalidGrant { target: ActorId, role: Role },

    #[error("Actor {0} is not joined to this world")]
    NotJoined(ActorId),
}
