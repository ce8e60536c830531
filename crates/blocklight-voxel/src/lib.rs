//! Chunk storage, lighting and meshing for blocklight.
//!
//! Everything here is single-threaded and works on borrowed chunks. The
//! world crate decides which chunks are locked and handed in.

pub mod chunk;
pub mod light;
pub mod mesh;
pub mod neighborhood;

pub use chunk::{Chunk, ChunkPayload, DirtyFlags, LightChannel, ScheduledUpdate};
pub use light::{LightEngine, LightNode};
pub use mesh::{build_mesh, ChunkMesh, MeshVertex};
pub use neighborhood::ChunkNeighborhood;
