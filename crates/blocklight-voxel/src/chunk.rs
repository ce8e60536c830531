//! Chunk column storage.
//!
//! A chunk is a `16 x height x 16` column holding a block type, a state
//! byte and two packed 4-bit light levels per cell.

use crate::mesh::ChunkMesh;
use bitflags::bitflags;
use blocklight_core::constants::{CHUNK_WIDTH, MAX_LIGHT};
use blocklight_core::{BlockType, ChunkPos, Error, LocalPos, Result};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Work a chunk is waiting on.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DirtyFlags: u8 {
        /// Mesh no longer matches blocks or light
        const MESH = 1;
        /// Contents differ from what persistence holds
        const SAVE = 1 << 1;
    }
}

/// Which of the two light fields to address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightChannel {
    /// Light emitted by blocks
    Block,
    /// Light from the open sky
    Sky,
}

impl LightChannel {
    /// Both channels
    pub const ALL: [LightChannel; 2] = [LightChannel::Block, LightChannel::Sky];
}

/// A block update due at a given world tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledUpdate {
    pub local: LocalPos,
    pub due: u64,
}

/// Serialized form of a chunk, used by persistence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub pos: ChunkPos,
    pub height: usize,
    pub blocks: Vec<u8>,
    pub states: Vec<u8>,
    pub light: Vec<u8>,
    pub scheduled: Vec<ScheduledUpdate>,
}

/// A single chunk column.
pub struct Chunk {
    pos: ChunkPos,
    height: usize,
    blocks: Box<[BlockType]>,
    states: Box<[u8]>,
    /// Low nibble block light, high nibble sky light.
    light: Box<[u8]>,
    mesh: ChunkMesh,
    dirty: DirtyFlags,
    mesh_invalidations: u64,
    /// Bumped on every block or light change.
    revision: u64,
    scheduled: Vec<ScheduledUpdate>,
}

impl Chunk {
    /// Create an all-air, unlit chunk.
    pub fn new(pos: ChunkPos, height: usize) -> Self {
        let volume = CHUNK_WIDTH * CHUNK_WIDTH * height;
        Self {
            pos,
            height,
            blocks: vec![BlockType::Air; volume].into_boxed_slice(),
            states: vec![0; volume].into_boxed_slice(),
            light: vec![0; volume].into_boxed_slice(),
            mesh: ChunkMesh::default(),
            dirty: DirtyFlags::MESH,
            mesh_invalidations: 0,
            revision: 0,
            scheduled: Vec::new(),
        }
    }

    /// Position in chunk coordinates.
    #[inline]
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// Number of blocks in the column.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of cells.
    #[inline]
    pub fn volume(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    fn index(&self, local: LocalPos) -> usize {
        debug_assert!(usize::from(local.y) < self.height);
        local.to_index()
    }

    #[inline]
    pub fn block(&self, local: LocalPos) -> BlockType {
        self.blocks[self.index(local)]
    }

    /// Set the block type. Does not touch light or dirty flags.
    #[inline]
    pub fn set_block(&mut self, local: LocalPos, block: BlockType) {
        let i = self.index(local);
        if self.blocks[i] != block {
            self.blocks[i] = block;
            self.revision += 1;
        }
    }

    #[inline]
    pub fn state(&self, local: LocalPos) -> u8 {
        self.states[self.index(local)]
    }

    #[inline]
    pub fn set_state(&mut self, local: LocalPos, state: u8) {
        let i = self.index(local);
        self.states[i] = state;
    }

    #[inline]
    pub fn light(&self, channel: LightChannel, local: LocalPos) -> u8 {
        self.light_at(channel, self.index(local))
    }

    #[inline]
    pub fn set_light(&mut self, channel: LightChannel, local: LocalPos, level: u8) {
        let i = self.index(local);
        self.set_light_at(channel, i, level);
    }

    /// Light level by flat cell index.
    #[inline]
    pub fn light_at(&self, channel: LightChannel, index: usize) -> u8 {
        let packed = self.light[index];
        match channel {
            LightChannel::Block => packed & 0x0F,
            LightChannel::Sky => packed >> 4,
        }
    }

    /// Set a light level by flat cell index.
    #[inline]
    pub fn set_light_at(&mut self, channel: LightChannel, index: usize, level: u8) {
        debug_assert!(level <= MAX_LIGHT);
        let packed = self.light[index];
        let next = match channel {
            LightChannel::Block => (packed & 0xF0) | (level & 0x0F),
            LightChannel::Sky => (packed & 0x0F) | (level << 4),
        };
        if next != packed {
            self.light[index] = next;
            self.revision += 1;
        }
    }

    /// Block type by flat cell index.
    #[inline]
    pub fn block_at(&self, index: usize) -> BlockType {
        self.blocks[index]
    }

    #[inline]
    pub fn block_light(&self, local: LocalPos) -> u8 {
        self.light(LightChannel::Block, local)
    }

    #[inline]
    pub fn sky_light(&self, local: LocalPos) -> u8 {
        self.light(LightChannel::Sky, local)
    }

    /// Brighter of block and sky light.
    #[inline]
    pub fn final_light(&self, local: LocalPos) -> u8 {
        let packed = self.light[self.index(local)];
        (packed & 0x0F).max(packed >> 4)
    }

    /// Highest non-air block in a column.
    pub fn top_non_air(&self, x: u8, z: u8) -> Option<u16> {
        (0..self.height as u16)
            .rev()
            .find(|&y| !self.block(LocalPos::new(x, y, z)).is_air())
    }

    /// Check if this chunk is empty (all air).
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| b.is_air())
    }

    /// Zero both light channels.
    pub fn clear_light(&mut self) {
        self.light.fill(0);
        self.revision += 1;
    }

    /// Counter of block and light changes. Equal revisions of the same chunk
    /// mean its blocks and light are unchanged in between.
    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[inline]
    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    /// Flag pending work. Each call carrying `MESH` counts as one
    /// mesh invalidation.
    pub fn mark_dirty(&mut self, flags: DirtyFlags) {
        if flags.contains(DirtyFlags::MESH) {
            self.mesh_invalidations += 1;
        }
        self.dirty |= flags;
    }

    pub fn clear_dirty(&mut self, flags: DirtyFlags) {
        self.dirty.remove(flags);
    }

    /// How many times the mesh has been marked stale.
    #[inline]
    pub fn mesh_invalidations(&self) -> u64 {
        self.mesh_invalidations
    }

    #[inline]
    pub fn mesh(&self) -> &ChunkMesh {
        &self.mesh
    }

    /// Install a freshly built mesh and clear the mesh flag.
    pub fn set_mesh(&mut self, mesh: ChunkMesh) {
        self.mesh = mesh;
        self.dirty.remove(DirtyFlags::MESH);
    }

    /// Queue a block update for `due`, replacing an earlier one for the same cell.
    pub fn schedule_update(&mut self, local: LocalPos, due: u64) {
        if let Some(existing) = self.scheduled.iter_mut().find(|u| u.local == local) {
            existing.due = existing.due.min(due);
            return;
        }
        self.scheduled.push(ScheduledUpdate { local, due });
    }

    /// Remove and return every update due at or before `now`.
    pub fn take_due_updates(&mut self, now: u64) -> Vec<ScheduledUpdate> {
        if self.scheduled.is_empty() {
            return Vec::new();
        }
        let (due, pending): (Vec<_>, Vec<_>) =
            self.scheduled.drain(..).partition(|u| u.due <= now);
        self.scheduled = pending;
        due
    }

    pub fn pending_updates(&self) -> usize {
        self.scheduled.len()
    }

    /// Snapshot the persistent contents.
    pub fn to_payload(&self) -> ChunkPayload {
        ChunkPayload {
            pos: self.pos,
            height: self.height,
            blocks: self.blocks.iter().map(|b| *b as u8).collect(),
            states: self.states.to_vec(),
            light: self.light.to_vec(),
            scheduled: self.scheduled.clone(),
        }
    }

    /// Rebuild a chunk from a payload. The mesh starts dirty.
    pub fn from_payload(payload: ChunkPayload) -> Result<Self> {
        let volume = CHUNK_WIDTH * CHUNK_WIDTH * payload.height;
        if payload.blocks.len() != volume
            || payload.states.len() != volume
            || payload.light.len() != volume
        {
            return Err(Error::InvalidData(format!(
                "chunk {:?}: expected {volume} cells",
                payload.pos
            )));
        }
        let blocks = payload
            .blocks
            .iter()
            .map(|&b| {
                BlockType::from_u8(b)
                    .ok_or_else(|| Error::InvalidData(format!("unknown block id {b}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut chunk = Self::new(payload.pos, payload.height);
        chunk.blocks = blocks.into_boxed_slice();
        chunk.states = payload.states.into_boxed_slice();
        chunk.light = payload.light.into_boxed_slice();
        chunk.scheduled = payload.scheduled;
        Ok(chunk)
    }

    /// Get memory usage in bytes.
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.blocks.len() * std::mem::size_of::<BlockType>()
            + self.states.len()
            + self.light.len()
            + self.mesh.memory_usage()
            + self.scheduled.capacity() * std::mem::size_of::<ScheduledUpdate>()
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("pos", &self.pos)
            .field("height", &self.height)
            .field("dirty", &self.dirty)
            .field("mesh_faces", &self.mesh.face_count())
            .finish_non_exhaustive()
    }
}
