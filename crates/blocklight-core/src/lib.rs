//! Core types shared by the blocklight crates.
//!
//! This crate provides the foundational types used throughout the world:
//! - Block types and their static lighting properties
//! - Coordinate systems (world, chunk, local) and face directions
//! - Common error types

pub mod block;
pub mod coords;
pub mod error;

pub use block::{Block, BlockType};
pub use coords::{ChunkPos, Face, LocalPos, WorldPos};
pub use error::{Error, Result};

/// World-wide constants
pub mod constants {
    /// Width of a chunk in blocks along X and Z
    pub const CHUNK_WIDTH: usize = 16;
    /// Bits needed to represent a position within a chunk column (4 bits for 0-15)
    pub const CHUNK_BITS: u32 = 4;
    /// Highest light level a cell can hold
    pub const MAX_LIGHT: u8 = 15;
    /// Default number of blocks in a chunk column
    pub const DEFAULT_WORLD_HEIGHT: usize = 128;
}
