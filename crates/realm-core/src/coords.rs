//! Block and chunk coordinates
//!
//! Chunks are columns of `CHUNK_WIDTH x CHUNK_HEIGHT x CHUNK_WIDTH` cells laid
//! out on the XZ plane. Every chunk in every world has the same dimensions.

use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Width of a chunk along X and Z, in blocks
pub const CHUNK_WIDTH: usize = 16;
/// Height of a chunk along Y, in blocks
pub const CHUNK_HEIGHT: usize = 128;
/// Number of cells in one chunk
pub const CHUNK_VOLUME: usize = CHUNK_WIDTH * CHUNK_HEIGHT * CHUNK_WIDTH;

/// Grid coordinate for a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub z: i32,
}

impl ChunkCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Convert a world position to the chunk coordinate that contains it.
    /// Out-of-range components saturate and NaN maps to 0.
    pub fn from_world_pos(pos: Vec3) -> Self {
        let width = CHUNK_WIDTH as f32;
        Self {
            x: (pos.x / width).floor() as i32,
            z: (pos.z / width).floor() as i32,
        }
    }

    /// Block position of this chunk's min corner at y = 0
    pub fn origin(&self) -> BlockPos {
        BlockPos::new(
            self.x * CHUNK_WIDTH as i32,
            0,
            self.z * CHUNK_WIDTH as i32,
        )
    }

    /// Chebyshev distance to another chunk coord
    pub fn distance(&self, other: &ChunkCoord) -> u32 {
        let dx = (i64::from(self.x) - i64::from(other.x)).unsigned_abs();
        let dz = (i64::from(self.z) - i64::from(other.z)).unsigned_abs();
        u32::try_from(dx.max(dz)).unwrap_or(u32::MAX)
    }

    /// Every chunk coordinate within `radius` of this one, nearest rings first.
    /// Coordinates that would pass `i32` bounds are left out.
    pub fn within_radius(&self, radius: u32) -> Vec<ChunkCoord> {
        let r = i32::try_from(radius).unwrap_or(i32::MAX);
        let side = 2 * radius as usize + 1;
        let mut coords = Vec::with_capacity(side * side);
        for dz in -r..=r {
            let Some(z) = self.z.checked_add(dz) else {
                continue;
            };
            for dx in -r..=r {
                if let Some(x) = self.x.checked_add(dx) {
                    coords.push(ChunkCoord::new(x, z));
                }
            }
        }
        coords.sort_by_key(|c| (c.distance(self), c.z, c.x));
        coords
    }

    /// Storage key in `"cx,cz"` form
    pub fn key(&self) -> String {
        format!("{},{}", self.x, self.z)
    }

    /// Parse a `"cx,cz"` storage key
    pub fn parse_key(key: &str) -> Result<Self, CoreError> {
        let malformed = || CoreError::MalformedChunkKey(key.to_string());
        let (x, z) = key.split_once(',').ok_or_else(malformed)?;
        let x = x.trim().parse().map_err(|_| malformed())?;
        let z = z.trim().parse().map_err(|_| malformed())?;
        Ok(Self { x, z })
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Absolute block position inside a world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The chunk column this block falls in (ignores Y)
    pub fn chunk(&self) -> ChunkCoord {
        let width = CHUNK_WIDTH as i32;
        ChunkCoord::new(self.x.div_euclid(width), self.z.div_euclid(width))
    }

    /// Split into the owning chunk and the position inside it.
    /// Returns `None` when Y lies outside the chunk height.
    pub fn split(&self) -> Option<(ChunkCoord, LocalPos)> {
        if self.y < 0 || self.y as usize >= CHUNK_HEIGHT {
            return None;
        }
        let width = CHUNK_WIDTH as i32;
        let local = LocalPos::new(
            self.x.rem_euclid(width) as usize,
            self.y as usize,
            self.z.rem_euclid(width) as usize,
        );
        Some((self.chunk(), local))
    }

    /// Rebuild a world position from a chunk and a local offset
    pub fn from_local(chunk: ChunkCoord, local: LocalPos) -> Self {
        let origin = chunk.origin();
        Self::new(
            origin.x + local.x as i32,
            local.y as i32,
            origin.z + local.z as i32,
        )
    }
}

/// Position of a cell inside a chunk. Not range-checked on construction;
/// the chunk validates on access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalPos {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl LocalPos {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    pub fn in_bounds(&self) -> bool {
        self.x < CHUNK_WIDTH && self.y < CHUNK_HEIGHT && self.z < CHUNK_WIDTH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_coord_from_world_pos() {
        assert_eq!(
            ChunkCoord::from_world_pos(Vec3::new(0.0, 0.0, 0.0)),
            ChunkCoord::new(0, 0)
        );
        assert_eq!(
            ChunkCoord::from_world_pos(Vec3::new(17.0, 40.0, 33.0)),
            ChunkCoord::new(1, 2)
        );
        assert_eq!(
            ChunkCoord::from_world_pos(Vec3::new(-0.5, 0.0, -16.5)),
            ChunkCoord::new(-1, -2)
        );
    }

    #[test]
    fn test_chunk_coord_distance() {
        let a = ChunkCoord::new(0, 0);
        assert_eq!(a.distance(&ChunkCoord::new(3, 2)), 3);
        assert_eq!(a.distance(&ChunkCoord::new(-2, 1)), 2);
    }

    #[test]
    fn test_within_radius_is_nearest_first() {
        let center = ChunkCoord::new(5, -5);
        let coords = center.within_radius(2);
        assert_eq!(coords.len(), 25);
        assert_eq!(coords[0], center);
        let distances: Vec<u32> = coords.iter().map(|c| c.distance(&center)).collect();
        let mut sorted = distances.clone();
        sorted.sort();
        assert_eq!(distances, sorted);
    }

    #[test]
    fn test_extreme_positions_do_not_overflow() {
        let far = ChunkCoord::from_world_pos(Vec3::new(3.0e38, 0.0, -3.0e38));
        assert_eq!(far, ChunkCoord::new(i32::MAX, i32::MIN));
        assert_eq!(
            ChunkCoord::from_world_pos(Vec3::new(f32::NAN, 0.0, f32::INFINITY)),
            ChunkCoord::new(0, i32::MAX)
        );

        assert_eq!(far.distance(&ChunkCoord::new(0, 0)), i32::MAX as u32 + 1);
        assert_eq!(
            ChunkCoord::new(i32::MIN, 0).distance(&ChunkCoord::new(i32::MAX, 0)),
            u32::MAX
        );

        // Only the in-range quarter of the square survives at a corner
        let coords = far.within_radius(2);
        assert_eq!(coords.len(), 9);
        assert_eq!(coords[0], far);
        assert!(coords.iter().all(|c| c.distance(&far) <= 2));
    }

    #[test]
    fn test_chunk_key_round_trip() {
        let coord = ChunkCoord::new(-12, 7);
        assert_eq!(coord.key(), "-12,7");
        assert_eq!(ChunkCoord::parse_key("-12,7").unwrap(), coord);
        assert!(ChunkCoord::parse_key("12;7").is_err());
        assert!(ChunkCoord::parse_key("a,7").is_err());
    }

    #[test]
    fn test_block_pos_split_handles_negatives() {
        let (chunk, local) = BlockPos::new(-1, 10, -17).split().unwrap();
        assert_eq!(chunk, ChunkCoord::new(-1, -2));
        assert_eq!(local, LocalPos::new(15, 10, 15));
        assert_eq!(BlockPos::from_local(chunk, local), BlockPos::new(-1, 10, -17));
    }

    #[test]
    fn test_block_pos_split_rejects_height() {
        assert!(BlockPos::new(0, -1, 0).split().is_none());
        assert!(BlockPos::new(0, CHUNK_HEIGHT as i32, 0).split().is_none());
    }
}
