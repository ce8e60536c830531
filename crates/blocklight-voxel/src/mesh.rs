//! Face-culled mesh generation for chunk columns.
//!
//! Emits one quad per visible block face. A face is visible when the cell
//! it looks into is air, or lets light through and holds a different block.
//! Faces looking into a chunk that is not loaded are skipped; the mesh is
//! rebuilt when that neighbour arrives. Each face carries the light level
//! of the cell it faces.

use crate::neighborhood::ChunkNeighborhood;
use blocklight_core::constants::MAX_LIGHT;
use blocklight_core::{BlockType, Face, LocalPos, WorldPos};
use bytemuck::{Pod, Zeroable};

/// Vertex layout produced by the mesher.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    /// Position in chunk-local coordinates.
    pub position: [f32; 3],
    /// Face normal (unit length).
    pub normal: [f32; 3],
    /// Base block color.
    pub color: [f32; 3],
    /// Light of the faced cell, 0.0-1.0.
    pub light: f32,
}

/// Triangle-list mesh for one chunk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkMesh {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl ChunkMesh {
    /// Number of quads.
    pub fn face_count(&self) -> usize {
        self.vertices.len() / 4
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Vertex data as raw bytes, ready for upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn memory_usage(&self) -> usize {
        self.vertices.capacity() * std::mem::size_of::<MeshVertex>()
            + self.indices.capacity() * std::mem::size_of::<u32>()
    }

    fn push_quad(&mut self, corner: [f32; 3], face: Face, color: [f32; 3], light: f32) {
        let base = self.vertices.len() as u32;
        let normal = face.normal().to_array();
        for offset in face_corners(face) {
            self.vertices.push(MeshVertex {
                position: [
                    corner[0] + offset[0],
                    corner[1] + offset[1],
                    corner[2] + offset[2],
                ],
                normal,
                color,
                light,
            });
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
}

/// Unit-cube corners for a face, counter-clockwise seen from outside.
const fn face_corners(face: Face) -> [[f32; 3]; 4] {
    match face {
        Face::PosX => [[1., 0., 0.], [1., 1., 0.], [1., 1., 1.], [1., 0., 1.]],
        Face::NegX => [[0., 0., 1.], [0., 1., 1.], [0., 1., 0.], [0., 0., 0.]],
        Face::PosY => [[0., 1., 0.], [0., 1., 1.], [1., 1., 1.], [1., 1., 0.]],
        Face::NegY => [[0., 0., 0.], [1., 0., 0.], [1., 0., 1.], [0., 0., 1.]],
        Face::PosZ => [[1., 0., 1.], [1., 1., 1.], [0., 1., 1.], [0., 0., 1.]],
        Face::NegZ => [[0., 0., 0.], [0., 1., 0.], [1., 1., 0.], [1., 0., 0.]],
    }
}

/// What a face looks into.
enum Facing {
    Cell(BlockType, u8),
    Sky,
    Hidden,
}

fn facing(region: &ChunkNeighborhood<'_>, pos: WorldPos) -> Facing {
    if pos.y >= region.height() as i32 {
        return Facing::Sky;
    }
    match (region.block(pos), region.final_light(pos)) {
        (Some(block), Some(light)) => Facing::Cell(block, light),
        _ => Facing::Hidden,
    }
}

#[inline]
fn face_visible(block: BlockType, neighbor: BlockType) -> bool {
    neighbor.is_air() || (!neighbor.block().is_opaque() && neighbor != block)
}

/// Build the mesh of the window's center chunk.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub fn build_mesh(region: &ChunkNeighborhood<'_>) -> ChunkMesh {
    let mut mesh = ChunkMesh::default();
    let Some(chunk) = region.chunk(region.center()) else {
        return mesh;
    };

    for index in 0..chunk.volume() {
        let block = chunk.block_at(index);
        if block.is_air() {
            continue;
        }
        let local = LocalPos::from_index(index);
        let pos = WorldPos::from_chunk_local(region.center(), local);
        let color = block.block().color_f32().to_array();
        let corner = [
            f32::from(local.x),
            f32::from(local.y),
            f32::from(local.z),
        ];
        for face in Face::ALL {
            let light = match facing(region, pos.step(face)) {
                Facing::Sky => MAX_LIGHT,
                Facing::Cell(neighbor, light) if face_visible(block, neighbor) => light,
                Facing::Cell(..) | Facing::Hidden => continue,
            };
            mesh.push_quad(corner, face, color, f32::from(light) / f32::from(MAX_LIGHT));
        }
    }
    mesh
}
