//! Coordinate systems for the voxel world.
//!
//! Chunks are full-height columns, so a [`ChunkPos`] only carries X and Z.
//! World Y maps directly onto the local Y of the column.

use crate::constants::{CHUNK_BITS, CHUNK_WIDTH};
use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};

/// Position within a chunk column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalPos {
    pub x: u8,
    pub y: u16,
    pub z: u8,
}

impl LocalPos {
    /// Create a new local position
    #[inline]
    pub const fn new(x: u8, y: u16, z: u8) -> Self {
        debug_assert!((x as usize) < CHUNK_WIDTH);
        debug_assert!((z as usize) < CHUNK_WIDTH);
        Self { x, y, z }
    }

    /// Convert to linear index for flat array storage.
    ///
    /// Layout is Y-major so a horizontal slice is contiguous.
    #[inline]
    pub const fn to_index(self) -> usize {
        ((self.y as usize) * CHUNK_WIDTH + self.z as usize) * CHUNK_WIDTH + self.x as usize
    }

    /// Create from linear index
    #[inline]
    pub const fn from_index(index: usize) -> Self {
        let x = (index % CHUNK_WIDTH) as u8;
        let z = ((index / CHUNK_WIDTH) % CHUNK_WIDTH) as u8;
        let y = (index / (CHUNK_WIDTH * CHUNK_WIDTH)) as u16;
        Self { x, y, z }
    }

    /// True if the position lies on the chunk's vertical border facing `face`.
    #[inline]
    pub const fn on_border(self, face: Face) -> bool {
        let max = (CHUNK_WIDTH - 1) as u8;
        match face {
            Face::PosX => self.x == max,
            Face::NegX => self.x == 0,
            Face::PosZ => self.z == max,
            Face::NegZ => self.z == 0,
            Face::PosY | Face::NegY => false,
        }
    }
}

/// Chunk column position in chunk coordinates.
///
/// Ordering is by `x` then `z`. Lock acquisition over several chunks
/// always follows this order.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    /// Create a new chunk position
    #[inline]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Convert to world position (corner of chunk at y = 0)
    #[inline]
    pub const fn to_world_pos(self) -> WorldPos {
        WorldPos::new(self.x << CHUNK_BITS, 0, self.z << CHUNK_BITS)
    }

    /// Offset by a number of chunks
    #[inline]
    pub const fn offset(self, dx: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.z + dz)
    }

    /// The four face-adjacent chunk positions, in [`Face::HORIZONTAL`] order.
    pub const fn neighbors(self) -> [ChunkPos; 4] {
        [
            self.offset(1, 0),
            self.offset(-1, 0),
            self.offset(0, 1),
            self.offset(0, -1),
        ]
    }

    /// The 3x3 block of chunks centered here, in ascending order.
    pub fn neighborhood(self) -> [ChunkPos; 9] {
        let mut out = [self; 9];
        let mut i = 0;
        for dx in -1..=1 {
            for dz in -1..=1 {
                out[i] = self.offset(dx, dz);
                i += 1;
            }
        }
        out
    }

    /// Squared distance in chunk units
    #[inline]
    pub fn distance_sq(self, other: ChunkPos) -> i64 {
        let dx = i64::from(self.x - other.x);
        let dz = i64::from(self.z - other.z);
        dx * dx + dz * dz
    }

    /// True if `other` lies inside the disk of `radius` chunks around `self`.
    #[inline]
    pub fn within_radius(self, other: ChunkPos, radius: i32) -> bool {
        let r = i64::from(radius.max(0));
        self.distance_sq(other) <= r * r
    }

    /// Every chunk inside the disk of `radius` chunks, nearest first.
    ///
    /// Ties are broken by `(x, z)` so the order is deterministic.
    pub fn disk(self, radius: i32) -> Vec<ChunkPos> {
        let r = radius.max(0);
        let mut out = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);
        for dx in -r..=r {
            for dz in -r..=r {
                let pos = self.offset(dx, dz);
                if self.within_radius(pos, r) {
                    out.push(pos);
                }
            }
        }
        out.sort_by_key(|pos| (self.distance_sq(*pos), *pos));
        out
    }
}

impl From<IVec3> for ChunkPos {
    fn from(v: IVec3) -> Self {
        WorldPos::from(v).chunk_pos()
    }
}

/// World position in block coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorldPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl WorldPos {
    /// Create a new world position
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Get the chunk column containing this position
    #[inline]
    pub const fn chunk_pos(self) -> ChunkPos {
        ChunkPos::new(self.x >> CHUNK_BITS, self.z >> CHUNK_BITS)
    }

    /// Get the local position within the chunk column.
    ///
    /// Only meaningful for `y >= 0`; callers check the height range first.
    #[inline]
    pub const fn local_pos(self) -> LocalPos {
        let mask = (CHUNK_WIDTH - 1) as i32;
        LocalPos::new((self.x & mask) as u8, self.y as u16, (self.z & mask) as u8)
    }

    /// Split into chunk and local position
    #[inline]
    pub const fn split(self) -> (ChunkPos, LocalPos) {
        (self.chunk_pos(), self.local_pos())
    }

    /// Create from chunk and local position
    #[inline]
    pub const fn from_chunk_local(chunk: ChunkPos, local: LocalPos) -> Self {
        let base = chunk.to_world_pos();
        Self::new(
            base.x + local.x as i32,
            local.y as i32,
            base.z + local.z as i32,
        )
    }

    /// Offset by a block delta
    #[inline]
    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// The neighbouring block across `face`
    #[inline]
    pub const fn step(self, face: Face) -> Self {
        let (dx, dy, dz) = face.offset();
        self.offset(dx, dy, dz)
    }

    /// True if `y` lies in `[0, height)`
    #[inline]
    pub const fn in_height(self, height: usize) -> bool {
        self.y >= 0 && (self.y as usize) < height
    }

    /// Convert to glam IVec3
    #[inline]
    pub const fn to_ivec3(self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }

    /// Center of the block as a float vector
    #[inline]
    pub fn center(self) -> Vec3 {
        self.to_ivec3().as_vec3() + Vec3::splat(0.5)
    }
}

impl From<IVec3> for WorldPos {
    fn from(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<Vec3> for WorldPos {
    fn from(v: Vec3) -> Self {
        Self::from(v.floor().as_ivec3())
    }
}

/// One of the six axis-aligned block faces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Face {
    PosX,
    NegX,
    PosY,
    NegY,
    PosZ,
    NegZ,
}

impl Face {
    /// All six faces
    pub const ALL: [Face; 6] = [
        Face::PosX,
        Face::NegX,
        Face::PosY,
        Face::NegY,
        Face::PosZ,
        Face::NegZ,
    ];

    /// The four faces that cross chunk borders
    pub const HORIZONTAL: [Face; 4] = [Face::PosX, Face::NegX, Face::PosZ, Face::NegZ];

    /// Block delta for stepping across this face
    #[inline]
    pub const fn offset(self) -> (i32, i32, i32) {
        match self {
            Face::PosX => (1, 0, 0),
            Face::NegX => (-1, 0, 0),
            Face::PosY => (0, 1, 0),
            Face::NegY => (0, -1, 0),
            Face::PosZ => (0, 0, 1),
            Face::NegZ => (0, 0, -1),
        }
    }

    /// The face pointing the other way
    #[inline]
    pub const fn opposite(self) -> Face {
        match self {
            Face::PosX => Face::NegX,
            Face::NegX => Face::PosX,
            Face::PosY => Face::NegY,
            Face::NegY => Face::PosY,
            Face::PosZ => Face::NegZ,
            Face::NegZ => Face::PosZ,
        }
    }

    /// Outward normal as a float vector
    #[inline]
    pub fn normal(self) -> Vec3 {
        let (x, y, z) = self.offset();
        IVec3::new(x, y, z).as_vec3()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_WORLD_HEIGHT;

    #[test]
    fn local_pos_index_roundtrip() {
        for y in 0..DEFAULT_WORLD_HEIGHT as u16 {
            for z in 0..CHUNK_WIDTH as u8 {
                for x in 0..CHUNK_WIDTH as u8 {
                    let pos = LocalPos::new(x, y, z);
                    assert_eq!(pos, LocalPos::from_index(pos.to_index()));
                }
            }
        }
    }

    #[test]
    fn world_pos_chunk_local_roundtrip() {
        let world = WorldPos::new(100, 50, -200);
        let (chunk, local) = world.split();
        assert_eq!(world, WorldPos::from_chunk_local(chunk, local));
    }

    #[test]
    fn negative_world_pos_chunk() {
        let world = WorldPos::new(-1, 3, -17);
        let (chunk, local) = world.split();
        assert_eq!(chunk, ChunkPos::new(-1, -2));
        assert_eq!(local, LocalPos::new(15, 3, 15));
    }

    #[test]
    fn vec3_floors_toward_negative_infinity() {
        let pos = WorldPos::from(Vec3::new(-0.5, 10.9, 3.2));
        assert_eq!(pos, WorldPos::new(-1, 10, 3));
    }

    #[test]
    fn disk_is_nearest_first_and_bounded() {
        let center = ChunkPos::new(4, -2);
        let disk = center.disk(3);
        assert_eq!(disk[0], center);
        assert!(disk.iter().all(|p| center.within_radius(*p, 3)));
        assert!(disk
            .windows(2)
            .all(|w| center.distance_sq(w[0]) <= center.distance_sq(w[1])));
        assert!(!disk.contains(&center.offset(3, 3)));
        assert!(disk.contains(&center.offset(3, 0)));
    }

    #[test]
    fn neighborhood_is_sorted() {
        let hood = ChunkPos::new(0, 0).neighborhood();
        let mut sorted = hood;
        sorted.sort();
        assert_eq!(hood, sorted);
        assert!(hood.contains(&ChunkPos::new(-1, 1)));
    }

    #[test]
    fn border_detection() {
        let local = LocalPos::new(15, 7, 0);
        assert!(local.on_border(Face::PosX));
        assert!(local.on_border(Face::NegZ));
        assert!(!local.on_border(Face::NegX));
        assert!(!local.on_border(Face::PosY));
    }

    #[test]
    fn face_opposites() {
        for face in Face::ALL {
            assert_eq!(face.opposite().opposite(), face);
            let (x, y, z) = face.offset();
            let (ox, oy, oz) = face.opposite().offset();
            assert_eq!((x + ox, y + oy, z + oz), (0, 0, 0));
        }
    }
}
