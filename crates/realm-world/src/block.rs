//! Block cells and the block catalog
//!
//! The storage engine treats a block as an opaque `(id, metadata)` pair. Static
//! properties live in one [`BlockCatalog`] table consulted only by terrain
//! generation and other collaborators.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One cell of a chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    pub id: u16,
    pub metadata: u8,
}

impl Block {
    pub const AIR: Block = Block::new(0, 0);

    pub const fn new(id: u16, metadata: u8) -> Self {
        Self { id, metadata }
    }
}

/// Static properties of a block type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProperties {
    pub name: String,
    pub solid: bool,
    pub transparent: bool,
    pub replaceable: bool,
}

impl BlockProperties {
    fn new(name: &str, solid: bool, transparent: bool, replaceable: bool) -> Self {
        Self {
            name: name.to_string(),
            solid,
            transparent,
            replaceable,
        }
    }
}

/// Capability table keyed by block id
#[derive(Debug, Clone, Default)]
pub struct BlockCatalog {
    entries: HashMap<u16, BlockProperties>,
    by_name: HashMap<String, u16>,
}

impl BlockCatalog {
    pub const AIR: u16 = 0;
    pub const STONE: u16 = 1;
    pub const DIRT: u16 = 2;
    pub const GRASS: u16 = 3;
    pub const WATER: u16 = 4;
    pub const BEDROCK: u16 = 5;
    pub const SAND: u16 = 6;

    /// An empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in block set used by the default terrain generator
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        catalog.register(Self::AIR, BlockProperties::new("air", false, true, true));
        catalog.register(Self::STONE, BlockProperties::new("stone", true, false, false));
        catalog.register(Self::DIRT, BlockProperties::new("dirt", true, false, false));
        catalog.register(Self::GRASS, BlockProperties::new("grass", true, false, false));
        catalog.register(Self::WATER, BlockProperties::new("water", false, true, true));
        catalog.register(Self::BEDROCK, BlockProperties::new("bedrock", true, false, false));
        catalog.register(Self::SAND, BlockProperties::new("sand", true, false, false));
        catalog
    }

    /// Register (or replace) the properties for `id`
    pub fn register(&mut self, id: u16, properties: BlockProperties) {
        if let Some(old) = self.entries.get(&id) {
            self.by_name.remove(&old.name);
        }
        self.by_name.insert(properties.name.clone(), id);
        self.entries.insert(id, properties);
    }

    pub fn properties(&self, id: u16) -> Option<&BlockProperties> {
        self.entries.get(&id)
    }

    pub fn id_of(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    /// Unknown ids are treated as solid
    pub fn is_solid(&self, id: u16) -> bool {
        self.properties(id).map_or(true, |p| p.solid)
    }

    /// Unknown ids are treated as opaque
    pub fn is_transparent(&self, id: u16) -> bool {
        self.properties(id).map_or(false, |p| p.transparent)
    }

    pub fn is_replaceable(&self, id: u16) -> bool {
        self.properties(id).map_or(false, |p| p.replaceable)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
