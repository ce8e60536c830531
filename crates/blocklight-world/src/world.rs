//! Block-level access to the loaded world.
//!
//! Reads resolve the owning chunk and take its read lock. Reads of a chunk
//! that is not ready return defaults: air, state 0 and full light. Edits
//! lock the loaded 3x3 neighbourhood of the target chunk for writing, apply
//! the change, settle light and flag every affected chunk once.

use std::sync::atomic::{AtomicU64, Ordering};

use blocklight_core::constants::MAX_LIGHT;
use blocklight_core::{Block, BlockType, ChunkPos, Face, LocalPos, WorldPos};
use blocklight_voxel::{Chunk, ChunkNeighborhood, DirtyFlags, LightChannel, LightEngine};

use crate::store::{ChunkStore, NeighborAccess, NeighborhoodLock};

/// Side effects requested with a block edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EditOptions {
    /// Re-settle light around the edited cell.
    pub light_blocks: bool,
    /// Schedule block updates for the cell and its six neighbours.
    pub tick_blocks: bool,
    /// Rebuild meshes of chunks sharing the edited cell's border.
    pub update_neighbor_sections: bool,
}

impl Default for EditOptions {
    fn default() -> Self {
        Self {
            light_blocks: true,
            tick_blocks: true,
            update_neighbor_sections: true,
        }
    }
}

impl EditOptions {
    /// Same as default, without scheduling block updates.
    #[must_use]
    pub fn without_ticks(mut self) -> Self {
        self.tick_blocks = false;
        self
    }
}

/// Collects dirty flags so each chunk is marked once per edit.
#[derive(Default)]
struct DirtySet(Vec<(ChunkPos, DirtyFlags)>);

impl DirtySet {
    fn add(&mut self, pos: ChunkPos, flags: DirtyFlags) {
        match self.0.iter_mut().find(|(p, _)| *p == pos) {
            Some((_, existing)) => *existing |= flags,
            None => self.0.push((pos, flags)),
        }
    }

    fn apply(self, region: &mut ChunkNeighborhood<'_>) {
        for (pos, flags) in self.0 {
            region.mark_dirty(&[pos], flags);
        }
    }
}

/// The set of resident chunks plus the world clock.
pub struct World {
    height: usize,
    store: ChunkStore,
    tick: AtomicU64,
}

impl World {
    /// An empty world with columns of `height` blocks.
    pub fn new(height: usize) -> Self {
        Self {
            height,
            store: ChunkStore::new(),
            tick: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Ticks elapsed since the world started.
    #[inline]
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Advance the clock and return the new tick.
    pub fn advance_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// True if the chunk holding `pos` is ready.
    pub fn is_loaded(&self, pos: WorldPos) -> bool {
        self.store.get_ready(pos.chunk_pos()).is_some()
    }

    fn read_cell<R>(&self, pos: WorldPos, default: R, f: impl FnOnce(&Chunk, LocalPos) -> R) -> R {
        if !pos.in_height(self.height) {
            return default;
        }
        let (chunk_pos, local) = pos.split();
        self.store
            .with_chunk(chunk_pos, |chunk| f(chunk, local))
            .unwrap_or(default)
    }

    pub fn block_type(&self, pos: WorldPos) -> BlockType {
        self.read_cell(pos, BlockType::Air, |chunk, local| chunk.block(local))
    }

    /// Static properties of the block at `pos`.
    pub fn block(&self, pos: WorldPos) -> &'static Block {
        self.block_type(pos).block()
    }

    pub fn block_state(&self, pos: WorldPos) -> u8 {
        self.read_cell(pos, 0, |chunk, local| chunk.state(local))
    }

    /// Brighter of block and sky light.
    pub fn final_light_level(&self, pos: WorldPos) -> u8 {
        self.read_cell(pos, MAX_LIGHT, |chunk, local| chunk.final_light(local))
    }

    pub fn block_light(&self, pos: WorldPos) -> u8 {
        self.read_cell(pos, MAX_LIGHT, |chunk, local| chunk.block_light(local))
    }

    pub fn sky_light(&self, pos: WorldPos) -> u8 {
        self.read_cell(pos, MAX_LIGHT, |chunk, local| chunk.sky_light(local))
    }

    /// Light passes through the block and it does not glow.
    pub fn is_block_transparent(&self, pos: WorldPos) -> bool {
        self.block(pos).is_transparent()
    }

    pub fn is_block_transparent_and_not_water(&self, pos: WorldPos) -> bool {
        let block = self.block(pos);
        block.is_transparent() && block.kind != BlockType::Water
    }

    /// Y of the highest non-air block in the column, if loaded.
    pub fn top_non_air(&self, x: i32, z: i32) -> Option<i32> {
        let (chunk_pos, local) = WorldPos::new(x, 0, z).split();
        self.store
            .with_chunk(chunk_pos, |chunk| chunk.top_non_air(local.x, local.z))
            .flatten()
            .map(i32::from)
    }

    /// Where a viewer starts: `saved` if it lies inside the world height,
    /// otherwise five blocks above the ground at the origin.
    pub fn resolve_spawn(&self, saved: Option<WorldPos>) -> WorldPos {
        match saved {
            Some(pos) if pos.in_height(self.height) => pos,
            _ => {
                let ground = self.top_non_air(0, 0).unwrap_or(0);
                WorldPos::new(0, (ground + 5).min(self.height as i32 - 1), 0)
            }
        }
    }

    /// Run `f` over the target chunk's neighbourhood with every ready chunk
    /// locked. `None` if the target chunk is not ready.
    pub(crate) fn with_region<R>(
        &self,
        center: ChunkPos,
        access: NeighborAccess,
        f: impl FnOnce(&mut ChunkNeighborhood<'_>) -> R,
    ) -> Option<R> {
        let slots = self.store.neighborhood(center);
        let mut lock = NeighborhoodLock::acquire(&slots, center, access);
        if !lock.holds_center() {
            return None;
        }
        let mut region = lock.region(self.height);
        Some(f(&mut region))
    }

    /// Replace the block at `pos`.
    ///
    /// Returns false if the chunk is not ready, `pos` lies outside the
    /// world height, or the cell already holds `block` with `state`.
    pub fn set_block_type(
        &self,
        pos: WorldPos,
        block: BlockType,
        state: u8,
        options: EditOptions,
    ) -> bool {
        if !pos.in_height(self.height) {
            return false;
        }
        let (center, local) = pos.split();
        let now = self.current_tick();
        let access = if options.light_blocks
            || options.tick_blocks
            || options.update_neighbor_sections
        {
            NeighborAccess::Write
        } else {
            NeighborAccess::Skip
        };

        self.with_region(center, access, |region| {
            let Some(chunk) = region.chunk_mut(center) else {
                return false;
            };
            let old = chunk.block(local);
            if old == block && chunk.state(local) == state {
                return false;
            }
            chunk.set_block(local, block);
            chunk.set_state(local, state);

            let mut dirty = DirtySet::default();
            dirty.add(center, DirtyFlags::MESH | DirtyFlags::SAVE);

            let light_changed = old.light_opacity() != block.light_opacity()
                || old.light_value() != block.light_value();
            if options.light_blocks && light_changed {
                for channel in LightChannel::ALL {
                    LightEngine::relight_cell(region, channel, pos);
                }
                for touched in region.take_touched() {
                    dirty.add(touched, DirtyFlags::MESH | DirtyFlags::SAVE);
                }
            }
            if options.update_neighbor_sections {
                for face in Face::HORIZONTAL {
                    if local.on_border(face) {
                        dirty.add(pos.step(face).chunk_pos(), DirtyFlags::MESH);
                    }
                }
            }
            if options.tick_blocks {
                Self::schedule_around(region, pos, now);
                for face in Face::HORIZONTAL {
                    if local.on_border(face) {
                        dirty.add(pos.step(face).chunk_pos(), DirtyFlags::SAVE);
                    }
                }
            }
            dirty.apply(region);
            true
        })
        .unwrap_or(false)
    }

    /// Schedule updates for `pos` and its six neighbours.
    fn schedule_around(region: &mut ChunkNeighborhood<'_>, pos: WorldPos, now: u64) {
        let cells = std::iter::once(pos).chain(Face::ALL.into_iter().map(|face| pos.step(face)));
        for cell in cells {
            let Some(block) = region.block(cell) else {
                continue;
            };
            if let Some(chunk) = region.chunk_mut(cell.chunk_pos()) {
                chunk.schedule_update(cell.local_pos(), now + block.block().tick_delay);
            }
        }
    }

    /// Schedule a single block update `delay` ticks from now.
    pub fn schedule_update(&self, pos: WorldPos, delay: u64) -> bool {
        if !pos.in_height(self.height) {
            return false;
        }
        let due = self.current_tick() + delay;
        let (chunk_pos, local) = pos.split();
        self.store
            .with_chunk_mut(chunk_pos, |chunk| {
                chunk.schedule_update(local, due);
                chunk.mark_dirty(DirtyFlags::SAVE);
            })
            .is_some()
    }

    /// Replace the state byte of the block at `pos`.
    pub fn set_block_state(&self, pos: WorldPos, state: u8) -> bool {
        if !pos.in_height(self.height) {
            return false;
        }
        let (chunk_pos, local) = pos.split();
        self.store
            .with_chunk_mut(chunk_pos, |chunk| {
                if chunk.state(local) == state {
                    return false;
                }
                chunk.set_state(local, state);
                chunk.mark_dirty(DirtyFlags::MESH | DirtyFlags::SAVE);
                true
            })
            .unwrap_or(false)
    }

    /// Force the block light at `pos`, then settle the field around it.
    pub fn set_block_light(&self, pos: WorldPos, level: u8) -> bool {
        if !pos.in_height(self.height) {
            return false;
        }
        self.with_region(pos.chunk_pos(), NeighborAccess::Write, |region| {
            LightEngine::set_level(region, LightChannel::Block, pos, level);
            let mut dirty = DirtySet::default();
            for touched in region.take_touched() {
                dirty.add(touched, DirtyFlags::MESH | DirtyFlags::SAVE);
            }
            dirty.apply(region);
        })
        .is_some()
    }
}
