//! Concurrent map of resident chunks.
//!
//! The map only holds chunks that finished building. Each entry is an
//! `Arc<ChunkSlot>` carrying the chunk's lifecycle state and its lock, so a
//! caller can drop the map lock before taking the chunk lock. Whenever
//! several chunk locks are held at once they are taken in ascending
//! [`ChunkPos`] order.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use blocklight_core::ChunkPos;
use blocklight_voxel::{Chunk, ChunkNeighborhood, DirtyFlags};
use hashbrown::HashMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// State of a chunk in the loading pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChunkState {
    /// Not known to the world.
    #[default]
    Unloaded = 0,
    /// Waiting for a build worker.
    Queued,
    /// Blocks are being generated or loaded.
    Generating,
    /// Light is being computed.
    Lighting,
    /// Mesh is being built.
    Meshing,
    /// Resident and editable.
    Ready,
    /// Leaving the world; edits are refused.
    Unloading,
}

impl ChunkState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Queued,
            2 => Self::Generating,
            3 => Self::Lighting,
            4 => Self::Meshing,
            5 => Self::Ready,
            6 => Self::Unloading,
            _ => Self::Unloaded,
        }
    }

    /// True while a build worker owns the chunk.
    pub fn is_building(self) -> bool {
        matches!(self, Self::Queued | Self::Generating | Self::Lighting | Self::Meshing)
    }
}

/// Atomic holder for a [`ChunkState`].
#[derive(Debug, Default)]
pub struct AtomicChunkState(AtomicU8);

impl AtomicChunkState {
    pub fn new(state: ChunkState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> ChunkState {
        ChunkState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: ChunkState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// One resident chunk and its lock.
#[derive(Debug)]
pub struct ChunkSlot {
    pos: ChunkPos,
    state: AtomicChunkState,
    chunk: RwLock<Chunk>,
}

impl ChunkSlot {
    fn new(chunk: Chunk) -> Self {
        Self {
            pos: chunk.pos(),
            state: AtomicChunkState::new(ChunkState::Ready),
            chunk: RwLock::new(chunk),
        }
    }

    #[inline]
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    #[inline]
    pub fn state(&self) -> ChunkState {
        self.state.load()
    }

    pub fn set_state(&self, state: ChunkState) {
        self.state.store(state);
    }

    /// True if the chunk accepts reads and edits.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state() == ChunkState::Ready
    }

    /// Shared access to the chunk.
    pub fn read(&self) -> RwLockReadGuard<'_, Chunk> {
        self.chunk.read()
    }

    /// Exclusive access to the chunk.
    pub fn write(&self) -> RwLockWriteGuard<'_, Chunk> {
        self.chunk.write()
    }
}

/// Thread-safe map of resident chunks.
pub struct ChunkStore {
    chunks: RwLock<HashMap<ChunkPos, Arc<ChunkSlot>>>,
}

impl Default for ChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(HashMap::new()),
        }
    }

    /// Check if a chunk exists at the given position.
    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.chunks.read().contains_key(&pos)
    }

    /// Get the number of resident chunks.
    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    /// Check if no chunks are resident.
    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }

    /// Slot at `pos`, whatever its state.
    pub fn get(&self, pos: ChunkPos) -> Option<Arc<ChunkSlot>> {
        self.chunks.read().get(&pos).cloned()
    }

    /// Slot at `pos` if it is ready for use.
    pub fn get_ready(&self, pos: ChunkPos) -> Option<Arc<ChunkSlot>> {
        self.get(pos).filter(|slot| slot.is_ready())
    }

    /// Make a built chunk resident. Returns the existing slot instead if
    /// the position is already taken.
    pub fn publish(&self, chunk: Chunk) -> Result<Arc<ChunkSlot>, Arc<ChunkSlot>> {
        let mut chunks = self.chunks.write();
        let pos = chunk.pos();
        if let Some(existing) = chunks.get(&pos) {
            return Err(Arc::clone(existing));
        }
        let slot = Arc::new(ChunkSlot::new(chunk));
        chunks.insert(pos, Arc::clone(&slot));
        Ok(slot)
    }

    /// Remove a chunk from the map. Holders of the slot keep it alive.
    pub fn remove(&self, pos: ChunkPos) -> Option<Arc<ChunkSlot>> {
        self.chunks.write().remove(&pos)
    }

    /// Get all resident chunk positions.
    pub fn positions(&self) -> Vec<ChunkPos> {
        self.chunks.read().keys().copied().collect()
    }

    /// Every ready slot.
    pub fn ready_slots(&self) -> Vec<Arc<ChunkSlot>> {
        self.chunks
            .read()
            .values()
            .filter(|slot| slot.is_ready())
            .cloned()
            .collect()
    }

    /// Ready slots in the 3x3 block around `center`, in lock order.
    pub fn neighborhood(&self, center: ChunkPos) -> Vec<Arc<ChunkSlot>> {
        let chunks = self.chunks.read();
        center
            .neighborhood()
            .iter()
            .filter_map(|pos| chunks.get(pos))
            .filter(|slot| slot.is_ready())
            .cloned()
            .collect()
    }

    /// Positions of ready chunks carrying any of `flags`.
    ///
    /// Chunks locked by a writer are skipped and picked up on a later call.
    pub fn dirty_positions(&self, flags: DirtyFlags) -> Vec<ChunkPos> {
        self.ready_slots()
            .into_iter()
            .filter(|slot| {
                slot.chunk
                    .try_read()
                    .is_some_and(|chunk| chunk.dirty().intersects(flags))
            })
            .map(|slot| slot.pos)
            .collect()
    }

    /// Execute a function with read access to a ready chunk.
    ///
    /// Returns `None` if the chunk isn't resident or ready.
    pub fn with_chunk<F, R>(&self, pos: ChunkPos, f: F) -> Option<R>
    where
        F: FnOnce(&Chunk) -> R,
    {
        let slot = self.get_ready(pos)?;
        let chunk = slot.read();
        slot.is_ready().then(|| f(&chunk))
    }

    /// Execute a function with write access to a ready chunk.
    ///
    /// Returns `None` if the chunk isn't resident or ready.
    pub fn with_chunk_mut<F, R>(&self, pos: ChunkPos, f: F) -> Option<R>
    where
        F: FnOnce(&mut Chunk) -> R,
    {
        let slot = self.get_ready(pos)?;
        let mut chunk = slot.write();
        slot.is_ready().then(|| f(&mut chunk))
    }

    /// Total memory held by resident chunks.
    pub fn memory_usage(&self) -> usize {
        let slots: Vec<_> = self.chunks.read().values().cloned().collect();
        slots.iter().map(|slot| slot.read().memory_usage()).sum()
    }
}

/// How the chunks around the center of a [`NeighborhoodLock`] are locked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NeighborAccess {
    /// Neighbours may receive light.
    Write,
    /// Neighbours are only read.
    Read,
    /// Only the center is locked.
    Skip,
}

enum ChunkGuard<'a> {
    Write(RwLockWriteGuard<'a, Chunk>),
    Read(RwLockReadGuard<'a, Chunk>),
}

/// Locks over a window of chunks, taken in ascending position order.
///
/// The center is always locked for writing when present.
pub struct NeighborhoodLock<'a> {
    center: ChunkPos,
    guards: Vec<(&'a ChunkSlot, ChunkGuard<'a>)>,
}

impl<'a> NeighborhoodLock<'a> {
    /// Lock `slots`, which must already be sorted by position.
    pub fn acquire(slots: &'a [Arc<ChunkSlot>], center: ChunkPos, access: NeighborAccess) -> Self {
        debug_assert!(slots.windows(2).all(|w| w[0].pos() < w[1].pos()));
        let guards = slots
            .iter()
            .filter_map(|slot| {
                let guard = match (slot.pos() == center, access) {
                    (true, _) | (false, NeighborAccess::Write) => ChunkGuard::Write(slot.write()),
                    (false, NeighborAccess::Read) => ChunkGuard::Read(slot.read()),
                    (false, NeighborAccess::Skip) => return None,
                };
                Some((&**slot, guard))
            })
            .collect();
        Self { center, guards }
    }

    /// True if the center chunk is locked and still ready.
    pub fn holds_center(&self) -> bool {
        self.guards
            .iter()
            .any(|(slot, _)| slot.pos() == self.center && slot.is_ready())
    }

    /// View the locked chunks as a light/mesh window. Chunks that stopped
    /// being ready while the locks were taken are left out.
    pub fn region(&mut self, height: usize) -> ChunkNeighborhood<'_> {
        let mut region = ChunkNeighborhood::new(self.center, height);
        for (slot, guard) in &mut self.guards {
            if !slot.is_ready() {
                continue;
            }
            match guard {
                ChunkGuard::Write(chunk) => region.insert_mut(&mut **chunk),
                ChunkGuard::Read(chunk) => region.insert_ref(&**chunk),
            }
        }
        region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(x: i32, z: i32) -> Chunk {
        Chunk::new(ChunkPos::new(x, z), 16)
    }

    #[test]
    fn publish_and_get() {
        let store = ChunkStore::new();
        assert!(store.is_empty());
        let slot = store.publish(chunk(1, 2)).unwrap();
        assert_eq!(slot.state(), ChunkState::Ready);
        assert!(store.contains(ChunkPos::new(1, 2)));
        assert_eq!(store.len(), 1);
        assert!(store.get_ready(ChunkPos::new(1, 2)).is_some());
        assert!(store.get(ChunkPos::new(2, 1)).is_none());
    }

    #[test]
    fn double_publish_is_refused() {
        let store = ChunkStore::new();
        let first = store.publish(chunk(0, 0)).unwrap();
        let second = store.publish(chunk(0, 0)).unwrap_err();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn unloading_slots_are_hidden_from_ready_queries() {
        let store = ChunkStore::new();
        let slot = store.publish(chunk(0, 0)).unwrap();
        slot.set_state(ChunkState::Unloading);
        assert!(store.get(ChunkPos::new(0, 0)).is_some());
        assert!(store.get_ready(ChunkPos::new(0, 0)).is_none());
        assert!(store.with_chunk(ChunkPos::new(0, 0), |_| ()).is_none());
        assert!(store.ready_slots().is_empty());
    }

    #[test]
    fn neighborhood_is_in_lock_order() {
        let store = ChunkStore::new();
        for (x, z) in [(1, 1), (-1, 0), (0, 0), (0, -1), (5, 5)] {
            store.publish(chunk(x, z)).unwrap();
        }
        let positions: Vec<_> = store
            .neighborhood(ChunkPos::new(0, 0))
            .iter()
            .map(|slot| slot.pos())
            .collect();
        assert_eq!(
            positions,
            vec![
                ChunkPos::new(-1, 0),
                ChunkPos::new(0, -1),
                ChunkPos::new(0, 0),
                ChunkPos::new(1, 1)
            ]
        );
    }

    #[test]
    fn removed_slot_outlives_map_entry() {
        let store = ChunkStore::new();
        let slot = store.publish(chunk(3, 3)).unwrap();
        let removed = store.remove(ChunkPos::new(3, 3)).unwrap();
        assert!(Arc::ptr_eq(&slot, &removed));
        assert!(!store.contains(ChunkPos::new(3, 3)));
        assert_eq!(slot.read().pos(), ChunkPos::new(3, 3));
    }

    #[test]
    fn dirty_positions_filter_by_flag() {
        let store = ChunkStore::new();
        let a = store.publish(chunk(0, 0)).unwrap();
        let b = store.publish(chunk(1, 0)).unwrap();
        a.write().clear_dirty(DirtyFlags::all());
        b.write().clear_dirty(DirtyFlags::all());
        b.write().mark_dirty(DirtyFlags::SAVE);
        assert_eq!(store.dirty_positions(DirtyFlags::SAVE), vec![ChunkPos::new(1, 0)]);
        assert!(store.dirty_positions(DirtyFlags::MESH).is_empty());
    }

    #[test]
    fn neighborhood_lock_builds_region() {
        let store = ChunkStore::new();
        for (x, z) in [(0, 0), (1, 0), (0, 1)] {
            store.publish(chunk(x, z)).unwrap();
        }
        let slots = store.neighborhood(ChunkPos::new(0, 0));
        store
            .get(ChunkPos::new(0, 1))
            .unwrap()
            .set_state(ChunkState::Unloading);

        let mut lock = NeighborhoodLock::acquire(&slots, ChunkPos::new(0, 0), NeighborAccess::Read);
        assert!(lock.holds_center());
        let region = lock.region(16);
        assert_eq!(
            region.loaded(),
            vec![ChunkPos::new(0, 0), ChunkPos::new(1, 0)]
        );
        assert!(region.is_writable(blocklight_core::WorldPos::new(3, 3, 3)));
        assert!(!region.is_writable(blocklight_core::WorldPos::new(17, 3, 3)));
    }

    #[test]
    fn skip_access_locks_only_center() {
        let store = ChunkStore::new();
        store.publish(chunk(0, 0)).unwrap();
        let east = store.publish(chunk(1, 0)).unwrap();
        let slots = store.neighborhood(ChunkPos::new(0, 0));
        let _held = east.write();
        let mut lock = NeighborhoodLock::acquire(&slots, ChunkPos::new(0, 0), NeighborAccess::Skip);
        assert_eq!(lock.region(16).loaded(), vec![ChunkPos::new(0, 0)]);
    }

    #[test]
    fn state_round_trips_through_atomic() {
        let state = AtomicChunkState::new(ChunkState::Queued);
        for s in [
            ChunkState::Generating,
            ChunkState::Lighting,
            ChunkState::Meshing,
            ChunkState::Ready,
            ChunkState::Unloading,
            ChunkState::Unloaded,
        ] {
            state.store(s);
            assert_eq!(state.load(), s);
        }
        assert!(ChunkState::Lighting.is_building());
        assert!(!ChunkState::Ready.is_building());
    }
}
