//! Chunk streaming around a moving viewpoint.
//!
//! The manager runs on the consumer thread. Each frame it diffs the wanted
//! disk of chunk positions against what is resident or building, feeds the
//! build pool nearest-first, publishes finished builds, evicts chunks that
//! left the radius and rebuilds stale meshes. Publishing and eviction only
//! happen here, so the store's map is written by a single thread.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use blocklight_core::{ChunkPos, Face, Result, WorldPos};
use blocklight_voxel::{build_mesh, Chunk, ChunkPayload, DirtyFlags, LightEngine};
use crossbeam::channel::{self, Receiver, Sender};
use hashbrown::{HashMap, HashSet};
use rayon::prelude::*;
use tracing::{debug, error, info, trace, warn};

use crate::build::{BuildContext, BuildOutcome, BuildPool, BuildTicket, HaloStamp};
use crate::config::WorldConfig;
use crate::generation::TerrainGenerator;
use crate::main_thread::{MainThreadHandle, MainThreadQueue};
use crate::persistence::{ChunkPersistence, DiskPersistence, MemoryPersistence};
use crate::store::{ChunkState, NeighborAccess};
use crate::tick::{default_rules, TickWorker};
use crate::world::World;

/// Priority entry for the chunk loading queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LoadPriority {
    pos: ChunkPos,
    /// Squared distance to the viewpoint chunk (lower = higher priority).
    distance_sq: i64,
}

impl PartialOrd for LoadPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LoadPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (closer chunks have higher priority)
        other
            .distance_sq
            .cmp(&self.distance_sq)
            .then_with(|| other.pos.cmp(&self.pos))
    }
}

/// Sent once when the initial neighbourhood is fully loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldReady {
    /// Where the viewer should appear.
    pub spawn: WorldPos,
}

/// Receiving end of the one-shot world-ready notification.
pub struct WorldReadySignal {
    rx: Receiver<WorldReady>,
}

impl WorldReadySignal {
    /// The notification, if it has arrived and was not taken yet.
    pub fn try_recv(&self) -> Option<WorldReady> {
        self.rx.try_recv().ok()
    }

    /// Block up to `timeout` for the notification.
    ///
    /// Something must keep calling [`ChunkManager::sync_update`] meanwhile.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<WorldReady> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Queue depths and counters for the streaming pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamingStats {
    /// Positions waiting to be handed to a build worker.
    pub queued: usize,
    /// Builds handed out and not yet collected.
    pub in_flight: usize,
    /// Finished builds waiting for the next drain.
    pub awaiting_publish: usize,
    /// Chunks in the store.
    pub loaded: usize,
    pub dirty_meshes: usize,
    pub pending_evictions: usize,
    pub pending_saves: usize,
    /// Chunks published since start.
    pub published: u64,
    /// Builds thrown away after cancellation.
    pub discarded: u64,
}

/// Owns the world, its workers and the load/unload policy.
pub struct ChunkManager {
    config: WorldConfig,
    world: Arc<World>,
    persistence: Arc<dyn ChunkPersistence>,
    builds: BuildPool,
    ticker: Option<TickWorker>,
    tasks: MainThreadQueue,
    load_queue: BinaryHeap<LoadPriority>,
    in_flight: HashMap<ChunkPos, Arc<BuildTicket>>,
    pending_evictions: HashSet<ChunkPos>,
    pending_saves: HashMap<ChunkPos, ChunkPayload>,
    viewpoint: WorldPos,
    /// Chunk and radius of the last load request.
    loaded_around: Option<(ChunkPos, i32)>,
    ready_tx: Option<Sender<WorldReady>>,
    initial_area: Vec<ChunkPos>,
    published: u64,
    discarded: u64,
    shut_down: bool,
}

impl ChunkManager {
    /// Start the world with persistence chosen by the config: chunk files
    /// under `save_dir`, or memory when none is set.
    pub fn start(config: WorldConfig) -> Result<(Self, WorldReadySignal)> {
        let persistence: Arc<dyn ChunkPersistence> = match &config.save_dir {
            Some(dir) => Arc::new(DiskPersistence::open(dir)?),
            None => Arc::new(MemoryPersistence::new()),
        };
        Self::start_with_persistence(config, persistence)
    }

    /// Start the world, spawning the build pool and the tick thread.
    pub fn start_with_persistence(
        config: WorldConfig,
        persistence: Arc<dyn ChunkPersistence>,
    ) -> Result<(Self, WorldReadySignal)> {
        config.validate()?;
        let world = Arc::new(World::new(config.world_height));
        let context = BuildContext {
            world: Arc::clone(&world),
            generator: TerrainGenerator::new(config.terrain.clone()),
            persistence: Arc::clone(&persistence),
        };
        let builds = BuildPool::spawn(config.build_threads, config.max_in_flight, context)?;
        let ticker = TickWorker::spawn(
            Arc::clone(&world),
            config.tick_interval(),
            default_rules(),
            config.random_ticks_per_chunk,
        )?;

        let viewpoint = config.initial_viewpoint();
        let initial_area = viewpoint.chunk_pos().disk(config.load_radius);
        let (ready_tx, ready_rx) = channel::bounded(1);
        info!(
            seed = config.terrain.seed,
            radius = config.load_radius,
            threads = config.build_threads,
            height = config.world_height,
            "world started"
        );

        let manager = Self {
            config,
            world,
            persistence,
            builds,
            ticker: Some(ticker),
            tasks: MainThreadQueue::new(),
            load_queue: BinaryHeap::new(),
            in_flight: HashMap::new(),
            pending_evictions: HashSet::new(),
            pending_saves: HashMap::new(),
            viewpoint,
            loaded_around: None,
            ready_tx: Some(ready_tx),
            initial_area,
            published: 0,
            discarded: 0,
            shut_down: false,
        };
        Ok((manager, WorldReadySignal { rx: ready_rx }))
    }

    /// The shared world handle.
    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Handle for posting work to [`Self::sync_late_update`].
    pub fn main_thread(&self) -> MainThreadHandle {
        self.tasks.handle()
    }

    pub fn viewpoint(&self) -> WorldPos {
        self.viewpoint
    }

    /// Move the viewpoint. Takes effect on the next [`Self::sync_update`].
    pub fn set_viewpoint(&mut self, viewpoint: WorldPos) {
        self.viewpoint = viewpoint;
    }

    /// Recompute the wanted set around `center` and queue what is missing.
    ///
    /// Builds and resident chunks outside the radius are cancelled or
    /// marked for eviction. Never blocks.
    pub fn request_load(&mut self, center: WorldPos, radius: i32) {
        let center = center.chunk_pos();
        self.loaded_around = Some((center, radius));

        self.in_flight.retain(|pos, ticket| {
            let keep = center.within_radius(*pos, radius);
            if !keep {
                ticket.cancel();
                trace!(?pos, "build cancelled");
            }
            keep
        });

        for pos in self.world.store().positions() {
            if center.within_radius(pos, radius) {
                self.pending_evictions.remove(&pos);
            } else {
                self.pending_evictions.insert(pos);
            }
        }

        self.load_queue.clear();
        let store = self.world.store();
        for pos in center.disk(radius) {
            if !store.contains(pos) && !self.in_flight.contains_key(&pos) {
                self.load_queue.push(LoadPriority {
                    pos,
                    distance_sq: center.distance_sq(pos),
                });
            }
        }

        self.submit_pending_work();
    }

    /// Hand queued positions to the build pool, nearest first.
    fn submit_pending_work(&mut self) {
        while self.in_flight.len() < self.config.max_in_flight {
            let Some(entry) = self.load_queue.pop() else {
                break;
            };
            if self.world.store().contains(entry.pos) || self.in_flight.contains_key(&entry.pos)
            {
                continue;
            }
            // The build must see the latest edits of an evicted chunk.
            if let Some(payload) = self.pending_saves.remove(&entry.pos) {
                self.write_save(&payload);
            }
            let ticket = Arc::new(BuildTicket::new(entry.pos));
            if !self.builds.submit(Arc::clone(&ticket)) {
                self.load_queue.push(entry);
                break;
            }
            self.in_flight.insert(entry.pos, ticket);
        }
    }

    /// Publish every finished build. Returns how many chunks became ready.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn drain_completions(&mut self) -> usize {
        let mut published = 0;
        while let Some(outcome) = self.builds.try_recv() {
            match outcome {
                BuildOutcome::Cancelled { ticket } => self.discard(&ticket),
                BuildOutcome::Finished {
                    ticket,
                    chunk,
                    halo,
                    lit_against,
                } => {
                    let pos = ticket.pos();
                    let current = self
                        .in_flight
                        .get(&pos)
                        .is_some_and(|t| Arc::ptr_eq(t, &ticket));
                    if !current || ticket.is_cancelled() {
                        self.discard(&ticket);
                        continue;
                    }
                    self.in_flight.remove(&pos);
                    if self.world.store().publish(chunk).is_err() {
                        debug_assert!(false, "chunk {pos:?} published twice");
                        error!(?pos, "chunk published twice");
                        ticket.set_state(ChunkState::Unloaded);
                        continue;
                    }
                    ticket.set_state(ChunkState::Ready);
                    self.join_neighbors(pos, &halo, &lit_against);
                    self.published += 1;
                    published += 1;
                    debug!(?pos, "chunk ready");
                }
            }
        }
        if published > 0 {
            self.submit_pending_work();
        }
        published
    }

    fn discard(&mut self, ticket: &Arc<BuildTicket>) {
        let pos = ticket.pos();
        if self
            .in_flight
            .get(&pos)
            .is_some_and(|t| Arc::ptr_eq(t, ticket))
        {
            self.in_flight.remove(&pos);
        }
        ticket.set_state(ChunkState::Unloaded);
        self.discarded += 1;
        trace!(?pos, "build discarded");
    }

    /// Settle light across the new chunk's borders and flag the meshes that
    /// now see a different neighbour.
    ///
    /// A neighbour the build read light from may have changed or left since.
    /// The chunk is then relit against the neighbours as they are now, which
    /// drops light whose source is gone.
    fn join_neighbors(&self, pos: ChunkPos, halo: &[ChunkPos], lit_against: &[HaloStamp]) {
        let store = self.world.store();
        let same_slots = lit_against
            .iter()
            .all(|stamp| store.get_ready(stamp.pos).is_some_and(|slot| stamp.is_slot(&slot)));
        self.world.with_region(pos, NeighborAccess::Write, |region| {
            let unchanged = same_slots
                && lit_against.iter().all(|stamp| {
                    region.chunk(stamp.pos).map(Chunk::revision) == Some(stamp.revision)
                });
            if !unchanged {
                debug!(?pos, "neighbours changed during build, relighting");
                LightEngine::light_new_chunk(region);
            }
            LightEngine::stitch_borders(region);
            let mut stale = region.take_touched();
            for neighbor in pos.neighbors() {
                if region.chunk(neighbor).is_none() {
                    continue;
                }
                stale.push(neighbor);
                // Meshed without this neighbour, so its border faces are wrong.
                if !halo.contains(&neighbor) {
                    stale.push(pos);
                }
            }
            region.mark_dirty(&stale, DirtyFlags::MESH);
        });
    }

    /// Remove chunks marked for eviction, queueing saves for edited ones.
    ///
    /// Light the chunk sent into its ready neighbours is taken back and their
    /// meshes are flagged, since faces toward the gap changed.
    pub fn evict_out_of_radius(&mut self) -> usize {
        let mut positions: Vec<_> = self.pending_evictions.drain().collect();
        positions.sort_unstable();
        let store = self.world.store();
        let mut evicted = 0;
        for pos in positions {
            let Some(slot) = store.get(pos) else {
                continue;
            };
            slot.set_state(ChunkState::Unloading);
            store.remove(pos);
            // Waits for edits and ticks already holding the chunk.
            let chunk = slot.write();
            if chunk.dirty().contains(DirtyFlags::SAVE) {
                self.pending_saves.insert(pos, chunk.to_payload());
            }
            let edges: Vec<_> = Face::HORIZONTAL
                .into_iter()
                .zip(pos.neighbors())
                .filter(|(_, neighbor)| store.get_ready(*neighbor).is_some())
                .map(|(face, neighbor)| (neighbor, LightEngine::edge_light(&chunk, face)))
                .collect();
            drop(chunk);
            slot.set_state(ChunkState::Unloaded);

            for (neighbor, edge) in edges {
                self.world.with_region(neighbor, NeighborAccess::Write, |region| {
                    LightEngine::retract_edge(region, edge);
                    let mut stale = region.take_touched();
                    stale.push(neighbor);
                    region.mark_dirty(&stale, DirtyFlags::MESH);
                });
            }
            evicted += 1;
            debug!(?pos, "chunk evicted");
        }
        evicted
    }

    /// Rebuild up to `budget` stale meshes, nearest the viewpoint first.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn rebuild_dirty_meshes(&mut self, budget: usize) -> usize {
        let center = self.viewpoint.chunk_pos();
        let mut dirty = self.world.store().dirty_positions(DirtyFlags::MESH);
        dirty.sort_by_key(|pos| (center.distance_sq(*pos), *pos));

        let mut rebuilt = 0;
        for pos in dirty.into_iter().take(budget) {
            let done = self.world.with_region(pos, NeighborAccess::Read, |region| {
                let mesh = build_mesh(region);
                if let Some(chunk) = region.chunk_mut(pos) {
                    chunk.set_mesh(mesh);
                }
            });
            if done.is_some() {
                rebuilt += 1;
            }
        }
        rebuilt
    }

    /// Write up to `budget` queued saves.
    pub fn flush_saves(&mut self, budget: usize) -> usize {
        let positions: Vec<_> = self.pending_saves.keys().copied().take(budget).collect();
        for pos in &positions {
            if let Some(payload) = self.pending_saves.remove(pos) {
                self.write_save(&payload);
            }
        }
        positions.len()
    }

    fn write_save(&self, payload: &ChunkPayload) {
        match self.persistence.save(payload) {
            Ok(()) => trace!(pos = ?payload.pos, "chunk saved"),
            Err(err) => warn!(pos = ?payload.pos, %err, "failed to save chunk"),
        }
    }

    /// Send the world-ready notification once the initial area is loaded.
    fn check_world_ready(&mut self) {
        if self.ready_tx.is_none() {
            return;
        }
        let store = self.world.store();
        if !self
            .initial_area
            .iter()
            .all(|pos| store.get_ready(*pos).is_some())
        {
            return;
        }
        let spawn = self.world.resolve_spawn(self.config.saved_position);
        if let Some(tx) = self.ready_tx.take() {
            let _ = tx.try_send(WorldReady { spawn });
        }
        info!(?spawn, chunks = self.initial_area.len(), "world ready");
    }

    /// Frame step one: follow the viewpoint and publish finished builds.
    pub fn sync_update(&mut self) {
        let wanted = (self.viewpoint.chunk_pos(), self.config.load_radius);
        if self.loaded_around == Some(wanted) {
            self.submit_pending_work();
        } else {
            self.request_load(self.viewpoint, self.config.load_radius);
        }
        self.drain_completions();
        self.check_world_ready();
    }

    /// Frame step two: evict, remesh and run posted tasks.
    pub fn sync_late_update(&mut self) {
        self.evict_out_of_radius();
        self.rebuild_dirty_meshes(self.config.mesh_budget);
        self.tasks.run_pending(&self.world);
    }

    /// Frame step three: write queued saves.
    pub fn sync_fixed_update(&mut self) {
        self.flush_saves(self.config.save_budget);
    }

    pub fn stats(&self) -> StreamingStats {
        StreamingStats {
            queued: self.load_queue.len(),
            in_flight: self.in_flight.len(),
            awaiting_publish: self.builds.pending_outcomes(),
            loaded: self.world.store().len(),
            dirty_meshes: self.world.store().dirty_positions(DirtyFlags::MESH).len(),
            pending_evictions: self.pending_evictions.len(),
            pending_saves: self.pending_saves.len(),
            published: self.published,
            discarded: self.discarded,
        }
    }

    /// Stop the workers and save every edited chunk.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if let Some(mut ticker) = self.ticker.take() {
            ticker.shutdown();
        }
        for ticket in self.in_flight.values() {
            ticket.cancel();
        }
        self.builds.shutdown();
        self.in_flight.clear();
        self.load_queue.clear();

        let mut payloads: Vec<ChunkPayload> = self.pending_saves.drain().map(|(_, p)| p).collect();
        let slots = self.world.store().ready_slots();
        payloads.par_extend(slots.par_iter().filter_map(|slot| {
            let chunk = slot.read();
            chunk
                .dirty()
                .contains(DirtyFlags::SAVE)
                .then(|| chunk.to_payload())
        }));
        let persistence = &self.persistence;
        payloads.par_iter().for_each(|payload| {
            if let Err(err) = persistence.save(payload) {
                warn!(pos = ?payload.pos, %err, "failed to save chunk");
            }
        });
        info!(saved = payloads.len(), "world shut down");
    }
}

impl Drop for ChunkManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::build_chunk;
    use crate::world::EditOptions;
    use blocklight_core::BlockType;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use std::thread;
    use std::time::Instant;

    const H: usize = 64;

    fn config(radius: i32, threads: usize) -> WorldConfig {
        let mut config = WorldConfig::default()
            .with_seed(11)
            .with_world_height(H)
            .with_load_radius(radius)
            .with_build_threads(threads)
            .with_tick_interval(Duration::from_millis(5));
        // Random leaf decay would add mesh invalidations of its own.
        config.random_ticks_per_chunk = 0;
        config
    }

    fn start(config: WorldConfig) -> (ChunkManager, WorldReadySignal, Arc<MemoryPersistence>) {
        let memory = Arc::new(MemoryPersistence::new());
        let persistence: Arc<dyn ChunkPersistence> = memory.clone();
        let (manager, ready) = ChunkManager::start_with_persistence(config, persistence).unwrap();
        (manager, ready, memory)
    }

    /// Run frames until `done` holds or the deadline passes.
    fn pump(manager: &mut ChunkManager, mut done: impl FnMut(&mut ChunkManager) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            manager.sync_update();
            manager.sync_late_update();
            manager.sync_fixed_update();
            if done(manager) {
                return;
            }
            assert!(Instant::now() < deadline, "timed out: {:?}", manager.stats());
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn invalidations(manager: &ChunkManager, pos: ChunkPos) -> u64 {
        manager
            .world()
            .store()
            .with_chunk(pos, Chunk::mesh_invalidations)
            .unwrap()
    }

    #[test]
    fn load_queue_pops_nearest_first() {
        let center = ChunkPos::new(0, 0);
        let mut heap: BinaryHeap<_> = [(3, 0), (0, 1), (-2, -2), (1, 0), (0, 0)]
            .into_iter()
            .map(|(x, z)| {
                let pos = ChunkPos::new(x, z);
                LoadPriority {
                    pos,
                    distance_sq: center.distance_sq(pos),
                }
            })
            .collect();
        let order: Vec<_> = std::iter::from_fn(|| heap.pop()).map(|e| e.pos).collect();
        assert_eq!(
            order,
            vec![
                ChunkPos::new(0, 0),
                ChunkPos::new(0, 1),
                ChunkPos::new(1, 0),
                ChunkPos::new(-2, -2),
                ChunkPos::new(3, 0),
            ]
        );
    }

    #[test]
    fn initial_area_loads_and_signals_once() {
        let (mut manager, ready, _) = start(config(1, 2));
        let mut signal = None;
        pump(&mut manager, |_| {
            signal = ready.try_recv();
            signal.is_some()
        });
        let signal = signal.unwrap();

        for pos in ChunkPos::new(0, 0).disk(1) {
            assert!(manager.world().store().get_ready(pos).is_some(), "{pos:?} missing");
        }
        let ground = manager.world().top_non_air(0, 0).unwrap();
        assert_eq!(signal.spawn, WorldPos::new(0, (ground + 5).min(H as i32 - 1), 0));

        manager.sync_update();
        assert!(ready.try_recv().is_none());
        let stats = manager.stats();
        assert_eq!(stats.loaded, 5);
        assert_eq!(stats.published, 5);
        assert_eq!(stats.in_flight, 0);
    }

    #[test]
    fn saved_spawn_is_kept() {
        let saved = WorldPos::new(3, 40, 5);
        let (mut manager, ready, _) = start(config(0, 1).with_saved_position(saved));
        let mut signal = None;
        pump(&mut manager, |_| {
            signal = ready.try_recv();
            signal.is_some()
        });
        assert_eq!(signal.map(|s| s.spawn), Some(saved));
    }

    #[test]
    fn new_neighbors_each_flag_the_center_mesh_once() {
        let (mut manager, _ready, _) = start(config(0, 2));
        let origin = ChunkPos::new(0, 0);
        pump(&mut manager, |m| m.world().store().get_ready(origin).is_some());
        // Let the first mesh settle.
        pump(&mut manager, |m| m.stats().dirty_meshes == 0);
        let before = invalidations(&manager, origin);

        let mut config = manager.config().clone();
        config.load_radius = 1;
        manager.config = config;
        pump(&mut manager, |m| m.stats().published == 5);
        assert_eq!(invalidations(&manager, origin), before + 4);
    }

    #[test]
    fn edits_survive_eviction_and_reload() {
        let (mut manager, _ready, memory) = start(config(0, 1));
        let origin = ChunkPos::new(0, 0);
        pump(&mut manager, |m| m.world().store().get_ready(origin).is_some());

        let pos = WorldPos::new(5, H as i32 - 2, 9);
        assert!(manager.world().set_block_type(
            pos,
            BlockType::Planks,
            0,
            EditOptions::default()
        ));

        manager.set_viewpoint(WorldPos::new(16 * 40, 10, 0));
        pump(&mut manager, |m| {
            !m.world().store().contains(origin) && m.stats().pending_saves == 0
        });
        assert!(memory.contains(origin));
        assert_eq!(manager.world().block_type(pos), BlockType::Air);

        manager.set_viewpoint(WorldPos::new(0, 10, 0));
        pump(&mut manager, |m| m.world().store().get_ready(origin).is_some());
        assert_eq!(manager.world().block_type(pos), BlockType::Planks);
    }

    #[test]
    fn light_from_a_lamp_removed_mid_build_does_not_return() {
        let (manager, _ready, _) = start(config(0, 1));
        let origin = ChunkPos::new(0, 0);
        let lamp = WorldPos::new(16, 8, 5);
        let edge = WorldPos::new(15, 8, 5);
        manager
            .world()
            .store()
            .publish(Chunk::new(ChunkPos::new(1, 0), H))
            .unwrap();
        assert!(manager.world().set_block_type(
            lamp,
            BlockType::Glowstone,
            0,
            EditOptions::default().without_ticks()
        ));

        let memory = Arc::new(MemoryPersistence::new());
        memory.save(&Chunk::new(origin, H).to_payload()).unwrap();
        let context = BuildContext {
            world: Arc::clone(manager.world()),
            generator: TerrainGenerator::with_seed(1),
            persistence: memory,
        };
        let BuildOutcome::Finished {
            chunk,
            halo,
            lit_against,
            ..
        } = build_chunk(&context, Arc::new(BuildTicket::new(origin)))
        else {
            panic!("build was cancelled");
        };
        assert_eq!(chunk.block_light(edge.local_pos()), 14);
        assert_eq!(lit_against.len(), 1);

        assert!(manager.world().set_block_type(
            lamp,
            BlockType::Air,
            0,
            EditOptions::default().without_ticks()
        ));
        manager.world().store().publish(chunk).unwrap();
        manager.join_neighbors(origin, &halo, &lit_against);

        assert_eq!(manager.world().block_light(edge), 0);
        assert_eq!(manager.world().block_light(lamp), 0);
        assert_eq!(manager.world().block_light(WorldPos::new(17, 8, 5)), 0);
    }

    #[test]
    fn eviction_retracts_light_and_flags_neighbor_mesh() {
        let (mut manager, _ready, _) = start(config(0, 1));
        let west = ChunkPos::new(10, 0);
        let east = ChunkPos::new(11, 0);
        for pos in [west, east] {
            manager.world().store().publish(Chunk::new(pos, H)).unwrap();
        }
        let lamp = WorldPos::new(175, 10, 5);
        let across = WorldPos::new(176, 10, 5);
        assert!(manager.world().set_block_type(
            lamp,
            BlockType::Glowstone,
            0,
            EditOptions::default().without_ticks()
        ));
        assert_eq!(manager.world().block_light(across), 14);
        let before = invalidations(&manager, east);

        manager.pending_evictions.insert(west);
        assert_eq!(manager.evict_out_of_radius(), 1);

        assert!(!manager.world().store().contains(west));
        assert_eq!(manager.world().block_light(across), 0);
        assert_eq!(manager.world().block_light(WorldPos::new(180, 10, 5)), 0);
        assert_eq!(invalidations(&manager, east), before + 1);
        let flagged = manager
            .world()
            .store()
            .with_chunk(east, |chunk| chunk.dirty().contains(DirtyFlags::MESH))
            .unwrap();
        assert!(flagged);
    }

    #[test]
    fn eviction_during_lighting_cancels_the_build() {
        let (mut manager, _ready, _) = start(config(0, 1));
        let origin = ChunkPos::new(0, 0);
        let east = manager
            .world()
            .store()
            .publish(Chunk::new(ChunkPos::new(1, 0), H))
            .unwrap();
        let guard = east.write();

        manager.request_load(WorldPos::new(0, 10, 0), 0);
        let ticket = Arc::clone(&manager.in_flight[&origin]);
        let deadline = Instant::now() + Duration::from_secs(30);
        while ticket.state() != ChunkState::Lighting {
            assert!(Instant::now() < deadline, "build never reached lighting");
            thread::sleep(Duration::from_millis(1));
        }

        manager.request_load(WorldPos::new(16 * 50, 10, 0), 0);
        assert!(ticket.is_cancelled());
        assert!(!manager.in_flight.contains_key(&origin));

        // The coordinate can be requested again right away.
        manager.request_load(WorldPos::new(0, 10, 0), 0);
        let fresh = Arc::clone(&manager.in_flight[&origin]);
        assert!(!Arc::ptr_eq(&fresh, &ticket));

        drop(guard);
        let deadline = Instant::now() + Duration::from_secs(30);
        while !(ticket.state() == ChunkState::Unloaded && fresh.state() == ChunkState::Ready) {
            assert!(Instant::now() < deadline, "builds never settled");
            manager.drain_completions();
            thread::sleep(Duration::from_millis(1));
        }
        assert!(manager.world().store().get_ready(origin).is_some());
        assert!(manager.stats().discarded >= 1);
        assert_eq!(manager.stats().published, 1);
    }

    #[test]
    fn posted_tasks_run_in_late_update() {
        let (mut manager, _ready, _) = start(config(0, 1));
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let handle = manager.main_thread();
        thread::spawn(move || {
            handle.post(move |world| {
                assert_eq!(world.height(), H);
                flag.store(true, AtomicOrdering::SeqCst);
            })
        })
        .join()
        .unwrap();

        manager.sync_update();
        assert!(!ran.load(AtomicOrdering::SeqCst));
        manager.sync_late_update();
        assert!(ran.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn shutdown_saves_edited_chunks() {
        let (mut manager, _ready, memory) = start(config(0, 1));
        let origin = ChunkPos::new(0, 0);
        pump(&mut manager, |m| m.world().store().get_ready(origin).is_some());
        manager.world().set_block_type(
            WorldPos::new(1, H as i32 - 2, 1),
            BlockType::Glass,
            0,
            EditOptions::default(),
        );
        manager.shutdown();
        assert!(memory.contains(origin));
        manager.shutdown();
    }
}
