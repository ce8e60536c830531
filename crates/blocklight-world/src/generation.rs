//! Procedural terrain generation.
//!
//! Heights come from fractal Perlin noise. Decoration (trees, glowstone
//! pockets) is placed with a per-column hash so every chunk generates the
//! same way no matter which thread builds it or in what order.

use blocklight_core::constants::CHUNK_WIDTH;
use blocklight_core::{BlockType, ChunkPos, LocalPos};
use blocklight_voxel::Chunk;
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

use crate::WorldSeed;

/// Terrain generator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Seed for noise generation.
    pub seed: WorldSeed,
    /// Sea level (Y coordinate). Columns below it fill with water.
    pub sea_level: i32,
    /// Horizontal scale of terrain features.
    pub terrain_scale: f64,
    /// Maximum terrain height variation.
    pub terrain_height: f64,
    /// Base height the noise is added to.
    pub base_height: i32,
    /// Number of noise octaves for detail.
    pub octaves: usize,
    /// Frequency multiplier between octaves.
    pub lacunarity: f64,
    /// Amplitude multiplier between octaves.
    pub persistence: f64,
    /// Depth of dirt layer below surface.
    pub dirt_depth: u32,
    /// Chance per grass column of growing a tree.
    pub tree_chance: f64,
    /// Chance per column of a glowstone pocket underground.
    pub glowstone_chance: f64,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            sea_level: 48,
            terrain_scale: 100.0,
            terrain_height: 40.0,
            base_height: 36,
            octaves: 4,
            lacunarity: 2.0,
            persistence: 0.5,
            dirt_depth: 4,
            tree_chance: 0.01,
            glowstone_chance: 0.004,
        }
    }
}

/// Procedural terrain generator using fractal noise.
#[derive(Clone)]
pub struct TerrainGenerator {
    config: TerrainConfig,
    height_noise: Fbm<Perlin>,
}

/// Trunk height of generated trees.
const TRUNK_HEIGHT: i32 = 5;
/// Trees keep this far from chunk borders so canopies stay inside one chunk.
const TREE_MARGIN: u8 = 2;

impl TerrainGenerator {
    /// Create a new terrain generator with the given configuration.
    pub fn new(config: TerrainConfig) -> Self {
        let height_noise = Fbm::<Perlin>::new(config.seed as u32)
            .set_octaves(config.octaves)
            .set_lacunarity(config.lacunarity)
            .set_persistence(config.persistence);

        Self {
            config,
            height_noise,
        }
    }

    /// Create a terrain generator with default configuration.
    pub fn with_seed(seed: WorldSeed) -> Self {
        Self::new(TerrainConfig {
            seed,
            ..Default::default()
        })
    }

    /// Get the terrain configuration.
    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// Get terrain height at world XZ coordinates, clamped to `[1, height - 2]`
    /// (or 1 in columns too short for that range).
    pub fn height_at(&self, world_x: i32, world_z: i32, height: usize) -> i32 {
        let nx = f64::from(world_x) / self.config.terrain_scale;
        let nz = f64::from(world_z) / self.config.terrain_scale;

        // Noise returns [-1, 1], map to [0, terrain_height] and add base_height
        let noise_value = self.height_noise.get([nx, nz]);
        let surface =
            ((noise_value + 1.0) * 0.5 * self.config.terrain_height) as i32 + self.config.base_height;
        surface.clamp(1, (height as i32 - 2).max(1))
    }

    /// Determine block type at a given world Y relative to surface height.
    fn block_at_depth(&self, world_y: i32, surface_height: i32) -> BlockType {
        if world_y == 0 {
            BlockType::Bedrock
        } else if world_y > surface_height {
            if world_y <= self.config.sea_level {
                BlockType::Water
            } else {
                BlockType::Air
            }
        } else if world_y == surface_height {
            if surface_height <= self.config.sea_level + 1 {
                BlockType::Sand
            } else {
                BlockType::Grass
            }
        } else if world_y > surface_height - self.config.dirt_depth as i32 {
            if surface_height <= self.config.sea_level + 1 {
                BlockType::Sand
            } else {
                BlockType::Dirt
            }
        } else {
            BlockType::Stone
        }
    }

    /// Generate a chunk column of `height` blocks at the given position.
    ///
    /// The chunk comes back unlit.
    pub fn generate_chunk(&self, pos: ChunkPos, height: usize) -> Chunk {
        let mut chunk = Chunk::new(pos, height);
        let world_base = pos.to_world_pos();

        for lz in 0..CHUNK_WIDTH as u8 {
            for lx in 0..CHUNK_WIDTH as u8 {
                let world_x = world_base.x + i32::from(lx);
                let world_z = world_base.z + i32::from(lz);
                let surface_height = self.height_at(world_x, world_z, height);

                for ly in 0..height as u16 {
                    let block = self.block_at_depth(i32::from(ly), surface_height);
                    if !block.is_air() {
                        chunk.set_block(LocalPos::new(lx, ly, lz), block);
                    }
                }

                let column_hash = self.hash(world_x, world_z, 0);
                if chance(column_hash, self.config.glowstone_chance) {
                    let depth = 3 + (column_hash >> 40) as i32 % 8;
                    let y = surface_height - self.config.dirt_depth as i32 - depth;
                    if y > 1 {
                        chunk.set_block(LocalPos::new(lx, y as u16, lz), BlockType::Glowstone);
                    }
                }
            }
        }

        self.plant_trees(&mut chunk);
        chunk
    }

    fn plant_trees(&self, chunk: &mut Chunk) {
        let base = chunk.pos().to_world_pos();
        let height = chunk.height() as i32;
        let inner = TREE_MARGIN..CHUNK_WIDTH as u8 - TREE_MARGIN;
        for lz in inner.clone() {
            for lx in inner.clone() {
                let hash = self.hash(base.x + i32::from(lx), base.z + i32::from(lz), 1);
                if !chance(hash, self.config.tree_chance) {
                    continue;
                }
                let Some(ground) = chunk.top_non_air(lx, lz) else {
                    continue;
                };
                let ground = i32::from(ground);
                if chunk.block(LocalPos::new(lx, ground as u16, lz)) != BlockType::Grass
                    || ground + TRUNK_HEIGHT + 2 >= height
                {
                    continue;
                }
                Self::grow_tree(chunk, lx, ground + 1, lz);
            }
        }
    }

    fn grow_tree(chunk: &mut Chunk, x: u8, base_y: i32, z: u8) {
        let top = base_y + TRUNK_HEIGHT - 1;
        for dy in -2..=1 {
            let radius: i32 = if dy >= 0 { 1 } else { 2 };
            for dz in -radius..=radius {
                for dx in -radius..=radius {
                    let local = LocalPos::new(
                        (i32::from(x) + dx) as u8,
                        (top + dy) as u16,
                        (i32::from(z) + dz) as u8,
                    );
                    if chunk.block(local).is_air() {
                        chunk.set_block(local, BlockType::Leaves);
                    }
                }
            }
        }
        chunk.set_block(LocalPos::new(x, (top + 2) as u16, z), BlockType::Leaves);
        for y in base_y..=top {
            chunk.set_block(LocalPos::new(x, y as u16, z), BlockType::Log);
        }
    }

    /// Deterministic per-column hash (splitmix64 over seed and coordinates).
    fn hash(&self, x: i32, z: i32, salt: u64) -> u64 {
        let mut h = self.config.seed
            ^ ((u64::from(x as u32) << 32) | u64::from(z as u32)).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ salt.wrapping_mul(0xD1B5_4A32_D192_ED03);
        h = (h ^ (h >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        h = (h ^ (h >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        h ^ (h >> 31)
    }
}

#[inline]
fn chance(hash: u64, probability: f64) -> bool {
    ((hash & 0xFF_FFFF) as f64 / f64::from(0x100_0000)) < probability
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocklight_core::constants::DEFAULT_WORLD_HEIGHT;

    const H: usize = DEFAULT_WORLD_HEIGHT;

    fn same_blocks(a: &Chunk, b: &Chunk) -> bool {
        (0..a.volume()).all(|i| a.block_at(i) == b.block_at(i))
    }

    #[test]
    fn generator_deterministic() {
        let gen1 = TerrainGenerator::with_seed(12345);
        let gen2 = TerrainGenerator::with_seed(12345);

        for x in -100..100 {
            for z in -100..100 {
                assert_eq!(gen1.height_at(x, z, H), gen2.height_at(x, z, H));
            }
        }
        let pos = ChunkPos::new(3, -7);
        assert!(same_blocks(
            &gen1.generate_chunk(pos, H),
            &gen2.generate_chunk(pos, H)
        ));
    }

    #[test]
    fn different_seeds_different_terrain() {
        let gen1 = TerrainGenerator::with_seed(12345);
        let gen2 = TerrainGenerator::with_seed(54321);

        let mut differences = 0;
        for x in 0..10 {
            for z in 0..10 {
                if gen1.height_at(x * 7, z * 7, H) != gen2.height_at(x * 7, z * 7, H) {
                    differences += 1;
                }
            }
        }
        assert!(differences > 50, "Seeds should produce different terrain");
    }

    #[test]
    fn column_layers() {
        let gen = TerrainGenerator::with_seed(42);
        let chunk = gen.generate_chunk(ChunkPos::new(0, 0), H);

        for z in 0..16u8 {
            for x in 0..16u8 {
                assert_eq!(chunk.block(LocalPos::new(x, 0, z)), BlockType::Bedrock);
                assert_eq!(chunk.block(LocalPos::new(x, H as u16 - 1, z)), BlockType::Air);
            }
        }
        assert!(!chunk.is_empty());
    }

    #[test]
    fn water_fills_to_sea_level() {
        let config = TerrainConfig {
            seed: 7,
            base_height: 10,
            terrain_height: 4.0,
            sea_level: 30,
            ..Default::default()
        };
        let gen = TerrainGenerator::new(config);
        let chunk = gen.generate_chunk(ChunkPos::new(0, 0), H);
        assert_eq!(chunk.block(LocalPos::new(8, 30, 8)), BlockType::Water);
        assert_eq!(chunk.block(LocalPos::new(8, 31, 8)), BlockType::Air);
    }

    #[test]
    fn trees_stay_inside_their_chunk() {
        let config = TerrainConfig {
            seed: 99,
            base_height: 60,
            tree_chance: 0.2,
            ..Default::default()
        };
        let gen = TerrainGenerator::new(config);
        let chunk = gen.generate_chunk(ChunkPos::new(1, 1), H);

        let mut logs = 0;
        for i in 0..chunk.volume() {
            let local = LocalPos::from_index(i);
            if chunk.block_at(i) == BlockType::Log {
                logs += 1;
                assert!((2..14).contains(&local.x) && (2..14).contains(&local.z));
            }
        }
        assert!(logs > 0, "a 20% tree chance should grow at least one tree");
    }

    #[test]
    fn shortest_valid_world_generates() {
        let gen = TerrainGenerator::with_seed(1);
        assert_eq!(gen.height_at(0, 0, 2), 1);
        let chunk = gen.generate_chunk(ChunkPos::new(0, 0), 2);
        assert_eq!(chunk.block(LocalPos::new(0, 0, 0)), BlockType::Bedrock);
        assert!((0..chunk.volume()).all(|i| chunk.block_at(i) != BlockType::Log));
    }
}
