//! Dense chunk storage and the run-length chunk codec
//!
//! Wire layout (little endian):
//!
//! ```text
//! magic "RCHK" | version u8 | chunk_x i32 | chunk_z i32 | cell_count u32
//! (block_id u16, metadata u8, run_length u32)*   run_length > 0
//! (0, 0, 0)                                      end marker
//! crc32 u32                                      over every preceding byte
//! ```

use realm_core::{ChunkCoord, LocalPos, CHUNK_HEIGHT, CHUNK_VOLUME, CHUNK_WIDTH};

use crate::block::Block;
use crate::error::ChunkError;
use crate::terrain::TerrainGenerator;

const MAGIC: &[u8; 4] = b"RCHK";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 4 + 4 + 4;
const RUN_LEN: usize = 2 + 1 + 4;

/// A single column of blocks, written by terrain generators
pub type Column = [Block; CHUNK_HEIGHT];

/// A fixed-size block grid
#[derive(Debug, Clone)]
pub struct Chunk {
    coord: ChunkCoord,
    cells: Vec<Block>,
    dirty: bool,
    revision: u64,
}

impl Chunk {
    /// A chunk filled with a single block
    pub fn filled(coord: ChunkCoord, block: Block) -> Self {
        Self {
            coord,
            cells: vec![block; CHUNK_VOLUME],
            dirty: false,
            revision: 0,
        }
    }

    /// Generate a chunk deterministically from the world seed and its coordinate
    pub fn generate(coord: ChunkCoord, seed: i64, generator: &dyn TerrainGenerator) -> Self {
        let mut chunk = Self::filled(coord, Block::AIR);
        let origin = coord.origin();
        let mut column: Column = [Block::AIR; CHUNK_HEIGHT];
        for z in 0..CHUNK_WIDTH {
            for x in 0..CHUNK_WIDTH {
                column.fill(Block::AIR);
                generator.fill_column(seed, origin.x + x as i32, origin.z + z as i32, &mut column);
                for (y, block) in column.iter().enumerate() {
                    chunk.cells[index(x, y, z)] = *block;
                }
            }
        }
        chunk
    }

    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// Read one cell
    pub fn get(&self, pos: LocalPos) -> Result<Block, ChunkError> {
        if !pos.in_bounds() {
            return Err(ChunkError::Range(pos));
        }
        Ok(self.cells[index(pos.x, pos.y, pos.z)])
    }

    /// Overwrite one cell and mark the chunk dirty
    pub fn set(&mut self, pos: LocalPos, block: Block) -> Result<(), ChunkError> {
        if !pos.in_bounds() {
            return Err(ChunkError::Range(pos));
        }
        self.cells[index(pos.x, pos.y, pos.z)] = block;
        self.dirty = true;
        self.revision += 1;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Number of writes applied since this chunk was created or loaded
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Encode into the run-length wire format
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + RUN_LEN * 8 + 4);
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&self.coord.x.to_le_bytes());
        out.extend_from_slice(&self.coord.z.to_le_bytes());
        out.extend_from_slice(&(self.cells.len() as u32).to_le_bytes());

        let mut cells = self.cells.iter();
        if let Some(first) = cells.next() {
            let mut current = *first;
            let mut run: u32 = 1;
            for cell in cells {
                if *cell == current {
                    run += 1;
                } else {
                    write_run(&mut out, current, run);
                    current = *cell;
                    run = 1;
                }
            }
            write_run(&mut out, current, run);
        }
        write_run(&mut out, Block::AIR, 0);

        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Decode from the run-length wire format
    pub fn deserialize(bytes: &[u8]) -> Result<Self, ChunkError> {
        if bytes.len() < HEADER_LEN + RUN_LEN + 4 {
            return Err(format_error("data shorter than the minimum chunk"));
        }
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if crc32fast::hash(body) != expected {
            return Err(format_error("checksum mismatch"));
        }

        let mut reader = Reader::new(body);
        if reader.take::<4>()? != *MAGIC {
            return Err(format_error("bad magic"));
        }
        let version = reader.u8()?;
        if version != FORMAT_VERSION {
            return Err(format_error(&format!("unsupported version {version}")));
        }
        let coord = ChunkCoord::new(reader.i32()?, reader.i32()?);
        let cell_count = reader.u32()? as usize;
        if cell_count != CHUNK_VOLUME {
            return Err(format_error(&format!(
                "cell count {cell_count} does not match chunk volume {CHUNK_VOLUME}"
            )));
        }

        let mut cells = Vec::with_capacity(CHUNK_VOLUME);
        loop {
            let id = reader.u16()?;
            let metadata = reader.u8()?;
            let run = reader.u32()? as usize;
            if run == 0 {
                break;
            }
            if cells.len() + run > cell_count {
                return Err(format_error("run lengths exceed cell count"));
            }
            cells.extend(std::iter::repeat(Block::new(id, metadata)).take(run));
        }
        if cells.len() != cell_count {
            return Err(format_error(&format!(
                "run lengths sum to {} but header declares {cell_count}",
                cells.len()
            )));
        }
        if !reader.is_empty() {
            return Err(format_error("trailing bytes after end marker"));
        }

        Ok(Self {
            coord,
            cells,
            dirty: false,
            revision: 0,
        })
    }
}

/// Chunks compare by position and content; dirty state is ignored
impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.coord == other.coord && self.cells == other.cells
    }
}

impl Eq for Chunk {}

fn index(x: usize, y: usize, z: usize) -> usize {
    (y * CHUNK_WIDTH + z) * CHUNK_WIDTH + x
}

fn write_run(out: &mut Vec<u8>, block: Block, run: u32) {
    out.extend_from_slice(&block.id.to_le_bytes());
    out.push(block.metadata);
    out.extend_from_slice(&run.to_le_bytes());
}

fn format_error(reason: &str) -> ChunkError {
    ChunkError::Format(reason.to_string())
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ChunkError> {
        if self.bytes.len() < N {
            return Err(format_error("unexpected end of data"));
        }
        let (head, rest) = self.bytes.split_at(N);
        self.bytes = rest;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ChunkError> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, ChunkError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn u32(&mut self) -> Result<u32, ChunkError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn i32(&mut self) -> Result<i32, ChunkError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
