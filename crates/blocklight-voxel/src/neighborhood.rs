//! A 3x3 window of chunk columns addressed in world coordinates.
//!
//! Light propagation and meshing run over a [`ChunkNeighborhood`]. Each of
//! the nine slots holds either a writable chunk, a read-only chunk or
//! nothing. Missing chunks and cells outside the window behave as walls:
//! reads return `None` and light never flows into them. Read-only chunks
//! can be read (and so seed propagation) but are never written.

use crate::chunk::{Chunk, DirtyFlags, LightChannel};
use blocklight_core::constants::CHUNK_WIDTH;
use blocklight_core::{BlockType, ChunkPos, WorldPos};

enum Slot<'a> {
    Writable(&'a mut Chunk),
    ReadOnly(&'a Chunk),
}

impl Slot<'_> {
    fn chunk(&self) -> &Chunk {
        match self {
            Slot::Writable(c) => c,
            Slot::ReadOnly(c) => c,
        }
    }
}

/// Nine chunk columns centered on one chunk.
pub struct ChunkNeighborhood<'a> {
    center: ChunkPos,
    height: usize,
    slots: [Option<Slot<'a>>; 9],
    touched: [bool; 9],
}

impl<'a> ChunkNeighborhood<'a> {
    /// Empty window around `center` for columns of `height` blocks.
    pub fn new(center: ChunkPos, height: usize) -> Self {
        Self {
            center,
            height,
            slots: Default::default(),
            touched: [false; 9],
        }
    }

    #[inline]
    pub fn center(&self) -> ChunkPos {
        self.center
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    fn slot_index(&self, pos: ChunkPos) -> Option<usize> {
        let dx = pos.x - self.center.x + 1;
        let dz = pos.z - self.center.z + 1;
        if (0..3).contains(&dx) && (0..3).contains(&dz) {
            Some((dx * 3 + dz) as usize)
        } else {
            None
        }
    }

    /// Add a chunk that may receive light. Chunks outside the window are ignored.
    pub fn insert_mut(&mut self, chunk: &'a mut Chunk) {
        debug_assert_eq!(chunk.height(), self.height);
        if let Some(i) = self.slot_index(chunk.pos()) {
            self.slots[i] = Some(Slot::Writable(chunk));
        }
    }

    /// Add a chunk that is only read.
    pub fn insert_ref(&mut self, chunk: &'a Chunk) {
        debug_assert_eq!(chunk.height(), self.height);
        if let Some(i) = self.slot_index(chunk.pos()) {
            self.slots[i] = Some(Slot::ReadOnly(chunk));
        }
    }

    /// Resolve a world position to (slot, cell index).
    #[inline]
    fn locate(&self, pos: WorldPos) -> Option<(usize, usize)> {
        if !pos.in_height(self.height) {
            return None;
        }
        let (chunk_pos, local) = pos.split();
        let slot = self.slot_index(chunk_pos)?;
        self.slots[slot].as_ref()?;
        Some((slot, local.to_index()))
    }

    /// Block at `pos`, or `None` for a wall.
    #[inline]
    pub fn block(&self, pos: WorldPos) -> Option<BlockType> {
        let (slot, index) = self.locate(pos)?;
        self.slots[slot].as_ref().map(|s| s.chunk().block_at(index))
    }

    /// Light at `pos`, or `None` for a wall.
    #[inline]
    pub fn light(&self, channel: LightChannel, pos: WorldPos) -> Option<u8> {
        let (slot, index) = self.locate(pos)?;
        self.slots[slot]
            .as_ref()
            .map(|s| s.chunk().light_at(channel, index))
    }

    /// Brighter of block and sky light at `pos`.
    pub fn final_light(&self, pos: WorldPos) -> Option<u8> {
        let block = self.light(LightChannel::Block, pos)?;
        let sky = self.light(LightChannel::Sky, pos)?;
        Some(block.max(sky))
    }

    /// True if light at `pos` may be written.
    #[inline]
    pub fn is_writable(&self, pos: WorldPos) -> bool {
        self.locate(pos)
            .is_some_and(|(slot, _)| matches!(self.slots[slot], Some(Slot::Writable(_))))
    }

    /// Write light at `pos`. Returns false for walls and read-only chunks.
    #[inline]
    pub fn set_light(&mut self, channel: LightChannel, pos: WorldPos, level: u8) -> bool {
        let Some((slot, index)) = self.locate(pos) else {
            return false;
        };
        match &mut self.slots[slot] {
            Some(Slot::Writable(chunk)) => {
                if chunk.light_at(channel, index) != level {
                    chunk.set_light_at(channel, index, level);
                    self.touched[slot] = true;
                }
                true
            }
            _ => false,
        }
    }

    /// Chunk at `pos`, if present.
    pub fn chunk(&self, pos: ChunkPos) -> Option<&Chunk> {
        let slot = self.slot_index(pos)?;
        self.slots[slot].as_ref().map(Slot::chunk)
    }

    /// Writable chunk at `pos`, if present.
    pub fn chunk_mut(&mut self, pos: ChunkPos) -> Option<&mut Chunk> {
        let slot = self.slot_index(pos)?;
        match &mut self.slots[slot] {
            Some(Slot::Writable(chunk)) => Some(&mut **chunk),
            _ => None,
        }
    }

    /// Positions of every chunk present in the window.
    pub fn loaded(&self) -> Vec<ChunkPos> {
        self.center
            .neighborhood()
            .into_iter()
            .filter(|pos| self.chunk(*pos).is_some())
            .collect()
    }

    /// Record a light change made directly on a chunk.
    pub fn touch(&mut self, pos: ChunkPos) {
        if let Some(slot) = self.slot_index(pos) {
            self.touched[slot] = true;
        }
    }

    /// Chunks whose light changed since the window was built or last drained.
    pub fn take_touched(&mut self) -> Vec<ChunkPos> {
        let mut out = Vec::new();
        for (i, touched) in self.touched.iter_mut().enumerate() {
            if std::mem::take(touched) {
                let dx = (i / 3) as i32 - 1;
                let dz = (i % 3) as i32 - 1;
                out.push(self.center.offset(dx, dz));
            }
        }
        out
    }

    /// Mark every chunk in `positions` dirty once.
    pub fn mark_dirty(&mut self, positions: &[ChunkPos], flags: DirtyFlags) {
        let mut seen = [false; 9];
        for pos in positions {
            let Some(slot) = self.slot_index(*pos) else {
                continue;
            };
            if std::mem::replace(&mut seen[slot], true) {
                continue;
            }
            if let Some(Slot::Writable(chunk)) = &mut self.slots[slot] {
                chunk.mark_dirty(flags);
            }
        }
    }

    /// World-space X/Z origin of the center chunk.
    pub fn center_origin(&self) -> WorldPos {
        self.center.to_world_pos()
    }

    /// Iterate the world positions of every cell in the center chunk.
    pub fn center_cells(&self) -> impl Iterator<Item = WorldPos> + '_ {
        let origin = self.center_origin();
        let width = CHUNK_WIDTH as i32;
        (0..self.height as i32).flat_map(move |y| {
            (0..width).flat_map(move |z| (0..width).map(move |x| origin.offset(x, y, z)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocklight_core::LocalPos;

    #[test]
    fn missing_chunks_are_walls() {
        let mut center = Chunk::new(ChunkPos::new(0, 0), 16);
        center.set_block(LocalPos::new(0, 0, 0), BlockType::Stone);
        let mut region = ChunkNeighborhood::new(ChunkPos::new(0, 0), 16);
        region.insert_mut(&mut center);

        assert_eq!(region.block(WorldPos::new(0, 0, 0)), Some(BlockType::Stone));
        assert_eq!(region.block(WorldPos::new(-1, 0, 0)), None);
        assert_eq!(region.block(WorldPos::new(0, 16, 0)), None);
        assert_eq!(region.block(WorldPos::new(0, -1, 0)), None);
        assert!(!region.set_light(LightChannel::Sky, WorldPos::new(16, 0, 0), 3));
    }

    #[test]
    fn read_only_chunks_are_never_written() {
        let mut center = Chunk::new(ChunkPos::new(0, 0), 16);
        let east = Chunk::new(ChunkPos::new(1, 0), 16);
        let mut region = ChunkNeighborhood::new(ChunkPos::new(0, 0), 16);
        region.insert_mut(&mut center);
        region.insert_ref(&east);

        let inside_east = WorldPos::new(16, 4, 4);
        assert_eq!(region.light(LightChannel::Block, inside_east), Some(0));
        assert!(!region.is_writable(inside_east));
        assert!(!region.set_light(LightChannel::Block, inside_east, 7));
        assert!(region.set_light(LightChannel::Block, WorldPos::new(15, 4, 4), 7));
        assert_eq!(region.take_touched(), vec![ChunkPos::new(0, 0)]);
        assert!(region.take_touched().is_empty());
    }

    #[test]
    fn negative_neighbors_resolve() {
        let mut center = Chunk::new(ChunkPos::new(0, 0), 16);
        let mut west = Chunk::new(ChunkPos::new(-1, -1), 16);
        west.set_block(LocalPos::new(15, 2, 15), BlockType::Glass);
        let mut region = ChunkNeighborhood::new(ChunkPos::new(0, 0), 16);
        region.insert_mut(&mut center);
        region.insert_mut(&mut west);

        assert_eq!(region.block(WorldPos::new(-1, 2, -1)), Some(BlockType::Glass));
        assert_eq!(
            region.loaded(),
            vec![ChunkPos::new(-1, -1), ChunkPos::new(0, 0)]
        );
    }

    #[test]
    fn mark_dirty_dedupes() {
        let mut center = Chunk::new(ChunkPos::new(0, 0), 16);
        let mut east = Chunk::new(ChunkPos::new(1, 0), 16);
        {
            let mut region = ChunkNeighborhood::new(ChunkPos::new(0, 0), 16);
            region.insert_mut(&mut center);
            region.insert_mut(&mut east);
            let pos = [ChunkPos::new(1, 0), ChunkPos::new(1, 0), ChunkPos::new(0, 0)];
            region.mark_dirty(&pos, DirtyFlags::MESH);
        }
        assert_eq!(east.mesh_invalidations(), 1);
        assert_eq!(center.mesh_invalidations(), 1);
    }

    #[test]
    fn center_cells_cover_the_column() {
        let mut center = Chunk::new(ChunkPos::new(-2, 3), 4);
        let region = {
            let mut region = ChunkNeighborhood::new(ChunkPos::new(-2, 3), 4);
            region.insert_mut(&mut center);
            region
        };
        let cells: Vec<_> = region.center_cells().collect();
        assert_eq!(cells.len(), 16 * 16 * 4);
        assert!(cells
            .iter()
            .all(|p| p.chunk_pos() == ChunkPos::new(-2, 3) && p.in_height(4)));
    }
}
