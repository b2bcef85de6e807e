//! JSON wire messages exchanged with connected clients

use glam::Vec3;
use realm_core::{ActorId, BlockPos, ChunkCoord, WorldId};
use realm_world::{Block, BlockDelta, Role, Visibility};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Enter a world, leaving the current one if any
    Join {
        world_id: WorldId,
        #[serde(default)]
        position: [f32; 3],
    },
    Leave,
    Move {
        position: [f32; 3],
    },
    SetBlock {
        world_id: WorldId,
        coord_x: i32,
        coord_y: i32,
        coord_z: i32,
        block_id: u16,
        #[serde(default)]
        metadata: u8,
    },
    /// Owner only
    Grant {
        target: ActorId,
        role: Role,
    },
    /// Owner only
    SetVisibility {
        visibility: Visibility,
    },
    /// Owner only; refused while anyone else is joined
    DeleteWorld,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Welcome {
        actor: ActorId,
    },
    Joined {
        world_id: WorldId,
        role: Role,
    },
    Left {
        world_id: WorldId,
    },
    /// A full serialized chunk
    ChunkData {
        x: i32,
        z: i32,
        data: Vec<u8>,
    },
    /// Chunks the client may forget
    DropChunks {
        chunks: Vec<ChunkCoord>,
    },
    BlockChanged {
        world_id: WorldId,
        coord_x: i32,
        coord_y: i32,
        coord_z: i32,
        block_id: u16,
        metadata: u8,
        sequence: u64,
    },
    Error {
        message: String,
        retryable: bool,
    },
}

impl ServerMessage {
    pub fn chunk(coord: ChunkCoord, data: Vec<u8>) -> Self {
        ServerMessage::ChunkData {
            x: coord.x,
            z: coord.z,
            data,
        }
    }

    pub fn error(message: impl Into<String>, retryable: bool) -> Self {
        ServerMessage::Error {
            message: message.into(),
            retryable,
        }
    }
}

impl From<&BlockDelta> for ServerMessage {
    fn from(delta: &BlockDelta) -> Self {
        ServerMessage::BlockChanged {
            world_id: delta.world_id.clone(),
            coord_x: delta.pos.x,
            coord_y: delta.pos.y,
            coord_z: delta.pos.z,
            block_id: delta.block.id,
            metadata: delta.block.metadata,
            sequence: delta.sequence,
        }
    }
}

/// Observer position carried by join and move messages
pub fn position_of(position: [f32; 3]) -> Vec3 {
    Vec3::from_array(position)
}

/// Target block and new contents of a `SetBlock` message
pub fn block_change(coord_x: i32, coord_y: i32, coord_z: i32, block_id: u16, metadata: u8) -> (BlockPos, Block) {
    (BlockPos::new(coord_x, coord_y, coord_z), Block::new(block_id, metadata))
}
