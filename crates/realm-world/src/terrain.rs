//! Seed-deterministic terrain generation using Perlin noise

use noise::{NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

use realm_core::CHUNK_HEIGHT;

use crate::block::{Block, BlockCatalog};
use crate::chunk::Column;

/// Supplies initial chunk content when nothing is persisted.
///
/// Implementations must be pure functions of `(seed, x, z)`.
pub trait TerrainGenerator: Send + Sync {
    /// Fill the column at world `(x, z)`. The column arrives filled with air.
    fn fill_column(&self, seed: i64, x: i32, z: i32, column: &mut Column);
}

/// Terrain generation configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TerrainConfig {
    /// Height of the lowest possible surface
    pub base_height: u32,
    /// Maximum height of terrain features above the base
    pub max_height: f32,
    /// Noise scale (smaller = larger features)
    pub noise_scale: f32,
    /// Number of octaves for fractal noise
    pub octaves: u32,
    /// Persistence for fractal noise (amplitude decrease per octave)
    pub persistence: f32,
    /// Lacunarity for fractal noise (frequency increase per octave)
    pub lacunarity: f32,
    /// Columns whose surface is below this are flooded with water
    pub sea_level: u32,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            base_height: 40,
            max_height: 32.0,
            noise_scale: 0.02,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
            sea_level: 52,
        }
    }
}

/// Rolling hills with a dirt/grass crust, beaches, and water below sea level
pub struct NoiseTerrain {
    config: TerrainConfig,
    stone: Block,
    dirt: Block,
    grass: Block,
    sand: Block,
    water: Block,
    bedrock: Block,
}

impl NoiseTerrain {
    pub fn new(config: TerrainConfig, catalog: &BlockCatalog) -> Self {
        let block = |name: &str, fallback: u16| Block::new(catalog.id_of(name).unwrap_or(fallback), 0);
        Self {
            config,
            stone: block("stone", BlockCatalog::STONE),
            dirt: block("dirt", BlockCatalog::DIRT),
            grass: block("grass", BlockCatalog::GRASS),
            sand: block("sand", BlockCatalog::SAND),
            water: block("water", BlockCatalog::WATER),
            bedrock: block("bedrock", BlockCatalog::BEDROCK),
        }
    }

    /// Surface height of the column at world `(x, z)`
    pub fn surface_height(&self, seed: i64, x: i32, z: i32) -> usize {
        let perlin = Perlin::new(fold_seed(seed));
        let n = fractal_noise(
            &perlin,
            (x as f32 * self.config.noise_scale) as f64,
            (z as f32 * self.config.noise_scale) as f64,
            self.config.octaves,
            self.config.persistence,
            self.config.lacunarity,
        );
        let height = self.config.base_height as f32 + n * self.config.max_height;
        (height.max(1.0) as usize).min(CHUNK_HEIGHT - 1)
    }
}

impl Default for NoiseTerrain {
    fn default() -> Self {
        Self::new(TerrainConfig::default(), &BlockCatalog::standard())
    }
}

impl TerrainGenerator for NoiseTerrain {
    fn fill_column(&self, seed: i64, x: i32, z: i32, column: &mut Column) {
        let surface = self.surface_height(seed, x, z);
        let sea_level = (self.config.sea_level as usize).min(CHUNK_HEIGHT - 1);
        let underwater = surface < sea_level;

        column[0] = self.bedrock;
        for y in 1..=surface {
            column[y] = if y == surface {
                if underwater || surface <= sea_level + 1 {
                    self.sand
                } else {
                    self.grass
                }
            } else if y + 4 > surface {
                self.dirt
            } else {
                self.stone
            };
        }
        if underwater {
            for cell in column.iter_mut().take(sea_level + 1).skip(surface + 1) {
                *cell = self.water;
            }
        }
    }
}

/// Flat layers: bedrock, stone up to `height - 1`, then one grass layer
#[derive(Debug, Clone)]
pub struct FlatTerrain {
    pub height: usize,
}

impl Default for FlatTerrain {
    fn default() -> Self {
        Self { height: 8 }
    }
}

impl TerrainGenerator for FlatTerrain {
    fn fill_column(&self, _seed: i64, _x: i32, _z: i32, column: &mut Column) {
        let height = self.height.min(CHUNK_HEIGHT);
        for (y, cell) in column.iter_mut().enumerate().take(height) {
            *cell = if y == 0 {
                Block::new(BlockCatalog::BEDROCK, 0)
            } else if y + 1 == height {
                Block::new(BlockCatalog::GRASS, 0)
            } else {
                Block::new(BlockCatalog::STONE, 0)
            };
        }
    }
}

fn fold_seed(seed: i64) -> u32 {
    (seed ^ (seed >> 32)) as u32
}

/// Generate fractal (multi-octave) Perlin noise in the 0 to 1 range
fn fractal_noise(
    perlin: &Perlin,
    x: f64,
    z: f64,
    octaves: u32,
    persistence: f32,
    lacunarity: f32,
) -> f32 {
    let mut total = 0.0f32;
    let mut amplitude = 1.0f32;
    let mut frequency = 1.0f32;
    let mut max_value = 0.0f32;

    for _ in 0..octaves {
        let value = perlin.get([x * frequency as f64, z * frequency as f64]) as f32;
        total += value * amplitude;
        max_value += amplitude;
        amplitude *= persistence;
        frequency *= lacunarity;
    }

    if max_value == 0.0 {
        return 0.5;
    }
    ((total / max_value + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use realm_core::{ChunkCoord, LocalPos};

    #[test]
    fn test_generation_is_deterministic() {
        let terrain = NoiseTerrain::default();
        let a = Chunk::generate(ChunkCoord::new(2, -1), 1234, &terrain);
        let b = Chunk::generate(ChunkCoord::new(2, -1), 1234, &terrain);
        assert_eq!(a, b);
        assert!(!a.is_dirty());
    }

    #[test]
    fn test_seed_changes_terrain() {
        let terrain = NoiseTerrain::default();
        let heights_a: Vec<usize> = (0..64).map(|x| terrain.surface_height(1, x * 7, 3)).collect();
        let heights_b: Vec<usize> = (0..64).map(|x| terrain.surface_height(99, x * 7, 3)).collect();
        assert_ne!(heights_a, heights_b);
    }

    #[test]
    fn test_column_has_bedrock_and_air_above() {
        let terrain = NoiseTerrain::default();
        let chunk = Chunk::generate(ChunkCoord::new(0, 0), 7, &terrain);
        assert_eq!(
            chunk.get(LocalPos::new(0, 0, 0)).unwrap().id,
            BlockCatalog::BEDROCK
        );
        assert_eq!(
            chunk.get(LocalPos::new(0, CHUNK_HEIGHT - 1, 0)).unwrap(),
            Block::AIR
        );
    }

    #[test]
    fn test_flat_terrain_layers() {
        let chunk = Chunk::generate(ChunkCoord::new(5, 5), 0, &FlatTerrain { height: 4 });
        assert_eq!(chunk.get(LocalPos::new(1, 0, 1)).unwrap().id, BlockCatalog::BEDROCK);
        assert_eq!(chunk.get(LocalPos::new(1, 2, 1)).unwrap().id, BlockCatalog::STONE);
        assert_eq!(chunk.get(LocalPos::new(1, 3, 1)).unwrap().id, BlockCatalog::GRASS);
        assert_eq!(chunk.get(LocalPos::new(1, 4, 1)).unwrap(), Block::AIR);
    }
}
