//! Chunk streaming, block updates and the block API for blocklight.
//!
//! [`ChunkManager`] owns the [`World`] and the background threads that build
//! and tick it. Everything else reaches blocks through a shared
//! `Arc<World>`.

pub mod build;
pub mod config;
pub mod generation;
pub mod main_thread;
pub mod manager;
pub mod persistence;
pub mod store;
pub mod tick;
pub mod world;

pub use build::{BuildOutcome, BuildPool, BuildTicket, HaloStamp};
pub use config::WorldConfig;
pub use generation::{TerrainConfig, TerrainGenerator};
pub use main_thread::MainThreadHandle;
pub use manager::{ChunkManager, StreamingStats, WorldReady, WorldReadySignal};
pub use persistence::{ChunkPersistence, DiskPersistence, MemoryPersistence, NoPersistence};
pub use store::{ChunkSlot, ChunkState, ChunkStore};
pub use tick::{FallingBlockRule, LeafDecayRule, TickRule, TickWorker};
pub use world::{EditOptions, World};

/// World seed for procedural generation.
pub type WorldSeed = u64;
