//! Block types and their static properties.
//!
//! Every cell of a chunk stores a [`BlockType`]. The properties that drive
//! lighting and ticking live in a static [`Block`] table indexed by type.

use crate::constants::MAX_LIGHT;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Kind of block stored in a cell.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum BlockType {
    #[default]
    Air = 0,
    Stone,
    Dirt,
    Grass,
    Sand,
    Gravel,
    Water,
    Log,
    Leaves,
    Glass,
    Planks,
    Torch,
    Glowstone,
    Lava,
    Bedrock,
    Snow,
}

impl BlockType {
    /// Number of block types
    pub const COUNT: usize = 16;

    /// Every block type, in discriminant order
    pub const ALL: [BlockType; Self::COUNT] = [
        BlockType::Air,
        BlockType::Stone,
        BlockType::Dirt,
        BlockType::Grass,
        BlockType::Sand,
        BlockType::Gravel,
        BlockType::Water,
        BlockType::Log,
        BlockType::Leaves,
        BlockType::Glass,
        BlockType::Planks,
        BlockType::Torch,
        BlockType::Glowstone,
        BlockType::Lava,
        BlockType::Bedrock,
        BlockType::Snow,
    ];

    /// Decode a stored discriminant
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value)).copied()
    }

    /// Returns true if this block is air (empty)
    #[inline]
    pub const fn is_air(self) -> bool {
        matches!(self, BlockType::Air)
    }

    /// Static properties of this block type
    #[inline]
    pub fn block(self) -> &'static Block {
        &BLOCKS[self as usize]
    }

    /// How much light is lost entering this block
    #[inline]
    pub fn light_opacity(self) -> u8 {
        self.block().light_opacity
    }

    /// Light emitted by this block
    #[inline]
    pub fn light_value(self) -> u8 {
        self.block().light_value
    }
}

/// Static description of a block type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Block {
    pub kind: BlockType,
    pub name: &'static str,
    /// Light lost entering the cell, 0..=15. 15 blocks light completely.
    pub light_opacity: u8,
    /// Light emitted by the cell, 0..=15.
    pub light_value: u8,
    /// Base color (RGB, 0-255)
    pub color: [u8; 3],
    /// Falls when the block below is air or water
    pub falls: bool,
    /// Ticks between a neighbour update and the scheduled block update
    pub tick_delay: u64,
}

impl Block {
    /// Light passes through and the block does not glow.
    #[inline]
    pub const fn is_transparent(&self) -> bool {
        self.light_opacity < MAX_LIGHT && self.light_value == 0
    }

    /// Blocks light completely.
    #[inline]
    pub const fn is_opaque(&self) -> bool {
        self.light_opacity >= MAX_LIGHT
    }

    /// Color as linear floats in 0..=1
    #[inline]
    pub fn color_f32(&self) -> Vec3 {
        Vec3::new(
            f32::from(self.color[0]),
            f32::from(self.color[1]),
            f32::from(self.color[2]),
        ) / 255.0
    }
}

const fn block(
    kind: BlockType,
    name: &'static str,
    light_opacity: u8,
    light_value: u8,
    color: [u8; 3],
) -> Block {
    Block {
        kind,
        name,
        light_opacity,
        light_value,
        color,
        falls: false,
        tick_delay: 1,
    }
}

const fn falling(mut b: Block) -> Block {
    b.falls = true;
    b.tick_delay = 2;
    b
}

const fn slow(mut b: Block, tick_delay: u64) -> Block {
    b.tick_delay = tick_delay;
    b
}

static BLOCKS: [Block; BlockType::COUNT] = [
    block(BlockType::Air, "air", 0, 0, [0, 0, 0]),
    block(BlockType::Stone, "stone", 15, 0, [128, 128, 128]),
    block(BlockType::Dirt, "dirt", 15, 0, [139, 90, 43]),
    block(BlockType::Grass, "grass", 15, 0, [86, 125, 70]),
    falling(block(BlockType::Sand, "sand", 15, 0, [219, 209, 160])),
    falling(block(BlockType::Gravel, "gravel", 15, 0, [136, 126, 126])),
    block(BlockType::Water, "water", 3, 0, [64, 105, 225]),
    block(BlockType::Log, "log", 15, 0, [102, 76, 51]),
    slow(block(BlockType::Leaves, "leaves", 1, 0, [60, 140, 50]), 4),
    block(BlockType::Glass, "glass", 0, 0, [200, 230, 240]),
    block(BlockType::Planks, "planks", 15, 0, [162, 130, 78]),
    block(BlockType::Torch, "torch", 0, 14, [255, 200, 80]),
    block(BlockType::Glowstone, "glowstone", 15, 15, [250, 220, 130]),
    block(BlockType::Lava, "lava", 15, 15, [207, 92, 15]),
    block(BlockType::Bedrock, "bedrock", 15, 0, [40, 40, 40]),
    block(BlockType::Snow, "snow", 15, 0, [250, 250, 250]),
];
