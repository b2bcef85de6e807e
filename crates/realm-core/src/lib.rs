//! Realm Core - Core types shared by every Realm crate
//!
//! This crate provides the foundational types used throughout the engine:
//! - Identifiers for worlds and actors
//! - Block and chunk coordinates (chunk dimensions are fixed engine-wide)
//! - A clock abstraction so idle timers can be driven by tests

pub mod coords;
pub mod error;
pub mod time;
pub mod types;

pub use coords::{BlockPos, ChunkCoord, LocalPos, CHUNK_HEIGHT, CHUNK_VOLUME, CHUNK_WIDTH};
pub use error::CoreError;
pub use glam::Vec3;
pub use time::{elapsed_between, Clock, ManualClock, SystemClock};
pub use types::{ActorId, WorldId};
