//! Chunk persistence backends.
//!
//! Build workers ask persistence for a chunk before generating it. Chunks
//! that were edited are written back when they are evicted and at shutdown.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use blocklight_core::{ChunkPos, Error, Result};
use blocklight_voxel::ChunkPayload;
use hashbrown::HashMap;
use parking_lot::Mutex;

/// Storage for edited chunks.
pub trait ChunkPersistence: Send + Sync {
    /// Load a stored chunk. `Ok(None)` means it was never saved.
    fn load(&self, pos: ChunkPos) -> Result<Option<ChunkPayload>>;

    /// Store a chunk, replacing any earlier copy.
    fn save(&self, payload: &ChunkPayload) -> Result<()>;
}

/// Persistence that stores nothing. Every chunk regenerates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPersistence;

impl ChunkPersistence for NoPersistence {
    fn load(&self, _pos: ChunkPos) -> Result<Option<ChunkPayload>> {
        Ok(None)
    }

    fn save(&self, _payload: &ChunkPayload) -> Result<()> {
        Ok(())
    }
}

/// In-memory persistence, mostly for tests and short sessions.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    chunks: Mutex<HashMap<ChunkPos, ChunkPayload>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.chunks.lock().contains_key(&pos)
    }
}

impl ChunkPersistence for MemoryPersistence {
    fn load(&self, pos: ChunkPos) -> Result<Option<ChunkPayload>> {
        Ok(self.chunks.lock().get(&pos).cloned())
    }

    fn save(&self, payload: &ChunkPayload) -> Result<()> {
        self.chunks.lock().insert(payload.pos, payload.clone());
        Ok(())
    }
}

/// One bincode file per chunk under a directory.
#[derive(Debug, Clone)]
pub struct DiskPersistence {
    dir: PathBuf,
}

impl DiskPersistence {
    /// Use `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, pos: ChunkPos) -> PathBuf {
        self.dir.join(format!("c.{}.{}.bin", pos.x, pos.z))
    }
}

impl ChunkPersistence for DiskPersistence {
    fn load(&self, pos: ChunkPos) -> Result<Option<ChunkPayload>> {
        let bytes = match fs::read(self.path_for(pos)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let payload: ChunkPayload =
            bincode::deserialize(&bytes).map_err(|e| Error::Serialization(e.to_string()))?;
        if payload.pos != pos {
            return Err(Error::InvalidData(format!(
                "file for {pos:?} holds chunk {:?}",
                payload.pos
            )));
        }
        Ok(Some(payload))
    }

    fn save(&self, payload: &ChunkPayload) -> Result<()> {
        let bytes =
            bincode::serialize(payload).map_err(|e| Error::Serialization(e.to_string()))?;
        // Readers only ever see a complete file.
        let path = self.path_for(payload.pos);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocklight_core::{BlockType, LocalPos};
    use blocklight_voxel::Chunk;

    fn edited_payload(pos: ChunkPos) -> ChunkPayload {
        let mut chunk = Chunk::new(pos, 16);
        chunk.set_block(LocalPos::new(4, 5, 6), BlockType::Planks);
        chunk.to_payload()
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "blocklight-{name}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryPersistence::new();
        let pos = ChunkPos::new(-3, 8);
        assert!(store.load(pos).unwrap().is_none());
        store.save(&edited_payload(pos)).unwrap();
        assert!(store.contains(pos));
        assert_eq!(store.load(pos).unwrap(), Some(edited_payload(pos)));
    }

    #[test]
    fn disk_store_roundtrip() {
        let dir = scratch_dir("disk");
        let store = DiskPersistence::open(&dir).unwrap();
        let pos = ChunkPos::new(-1, 2);
        assert!(store.load(pos).unwrap().is_none());

        store.save(&edited_payload(pos)).unwrap();
        let loaded = store.load(pos).unwrap().unwrap();
        let chunk = Chunk::from_payload(loaded).unwrap();
        assert_eq!(chunk.block(LocalPos::new(4, 5, 6)), BlockType::Planks);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = scratch_dir("corrupt");
        let store = DiskPersistence::open(&dir).unwrap();
        let pos = ChunkPos::new(0, 0);
        fs::write(store.path_for(pos), b"not a chunk").unwrap();
        assert!(store.load(pos).is_err());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn no_persistence_forgets() {
        let store = NoPersistence;
        store.save(&edited_payload(ChunkPos::new(0, 0))).unwrap();
        assert!(store.load(ChunkPos::new(0, 0)).unwrap().is_none());
    }
}
