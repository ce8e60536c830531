//! World and streaming configuration.

use std::path::PathBuf;
use std::time::Duration;

use blocklight_core::constants::DEFAULT_WORLD_HEIGHT;
use blocklight_core::{Error, Result, WorldPos};
use serde::{Deserialize, Serialize};

use crate::generation::TerrainConfig;

/// Configuration for the world and its background workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Blocks per chunk column.
    pub world_height: usize,
    /// Horizontal load radius in chunks (Euclidean disk).
    pub load_radius: i32,
    /// Number of build worker threads.
    pub build_threads: usize,
    /// Builds handed to workers at once; the rest wait in the priority queue.
    pub max_in_flight: usize,
    /// Milliseconds between block-update ticks.
    pub tick_interval_ms: u64,
    /// Dirty meshes rebuilt per late update.
    pub mesh_budget: usize,
    /// Chunk saves written per fixed update.
    pub save_budget: usize,
    /// Random cells per chunk re-checked by block rules each tick.
    pub random_ticks_per_chunk: u32,
    /// Last known viewer position. Used as the spawn when it lies inside
    /// the world height.
    pub saved_position: Option<WorldPos>,
    /// Directory for chunk files. `None` keeps chunks in memory only.
    pub save_dir: Option<PathBuf>,
    /// Terrain generator settings.
    pub terrain: TerrainConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            world_height: DEFAULT_WORLD_HEIGHT,
            load_radius: 6,
            build_threads: std::thread::available_parallelism()
                .map_or(2, |n| n.get().saturating_sub(1).clamp(1, 8)),
            max_in_flight: 16,
            tick_interval_ms: 50,
            mesh_budget: 8,
            save_budget: 4,
            random_ticks_per_chunk: 3,
            saved_position: None,
            save_dir: None,
            terrain: TerrainConfig::default(),
        }
    }
}

impl WorldConfig {
    /// Set the world seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.terrain.seed = seed;
        self
    }

    /// Set the load radius.
    #[must_use]
    pub fn with_load_radius(mut self, radius: i32) -> Self {
        self.load_radius = radius;
        self
    }

    /// Set the column height.
    #[must_use]
    pub fn with_world_height(mut self, height: usize) -> Self {
        self.world_height = height;
        self
    }

    /// Set the number of build threads.
    #[must_use]
    pub fn with_build_threads(mut self, threads: usize) -> Self {
        self.build_threads = threads;
        self
    }

    /// Set the tick interval.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the saved viewer position.
    #[must_use]
    pub fn with_saved_position(mut self, position: WorldPos) -> Self {
        self.saved_position = Some(position);
        self
    }

    /// Persist chunks under `dir`.
    #[must_use]
    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    /// Time between block-update ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Reject settings the world cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.world_height < 2 || self.world_height > usize::from(u16::MAX) {
            return Err(Error::InvalidData(format!(
                "world height {} out of range",
                self.world_height
            )));
        }
        if self.load_radius < 0 {
            return Err(Error::InvalidData(format!(
                "negative load radius {}",
                self.load_radius
            )));
        }
        if self.build_threads == 0 {
            return Err(Error::InvalidData("at least one build thread is required".into()));
        }
        if self.max_in_flight == 0 {
            return Err(Error::InvalidData("max_in_flight must be positive".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::InvalidData("tick interval must be positive".into()));
        }
        Ok(())
    }

    /// Starting viewpoint before the spawn is known. A saved position
    /// outside the world height is ignored.
    pub fn initial_viewpoint(&self) -> WorldPos {
        self.saved_position
            .filter(|pos| pos.in_height(self.world_height))
            .unwrap_or_else(|| WorldPos::new(0, self.world_height as i32 / 2, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        WorldConfig::default().validate().unwrap();
    }

    #[test]
    fn builders_apply() {
        let config = WorldConfig::default()
            .with_seed(9)
            .with_load_radius(2)
            .with_world_height(64)
            .with_build_threads(3)
            .with_tick_interval(Duration::from_millis(20));
        assert_eq!(config.terrain.seed, 9);
        assert_eq!(config.load_radius, 2);
        assert_eq!(config.world_height, 64);
        assert_eq!(config.build_threads, 3);
        assert_eq!(config.tick_interval(), Duration::from_millis(20));
        assert_eq!(config.initial_viewpoint(), WorldPos::new(0, 32, 0));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(WorldConfig::default().with_load_radius(-1).validate().is_err());
        assert!(WorldConfig::default().with_build_threads(0).validate().is_err());
        assert!(WorldConfig::default().with_world_height(1).validate().is_err());
    }

    #[test]
    fn saved_position_outside_height_is_ignored() {
        let config = WorldConfig::default()
            .with_world_height(64)
            .with_saved_position(WorldPos::new(40, 80, -3));
        assert_eq!(config.initial_viewpoint(), WorldPos::new(0, 32, 0));
        let config = config.with_saved_position(WorldPos::new(40, 20, -3));
        assert_eq!(config.initial_viewpoint(), WorldPos::new(40, 20, -3));
    }

    #[test]
    fn config_survives_bincode() {
        let config = WorldConfig::default().with_seed(5).with_load_radius(3);
        let bytes = bincode::serialize(&config).unwrap();
        let back: WorldConfig = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, config);
    }
}
