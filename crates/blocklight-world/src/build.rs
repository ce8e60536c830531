//! Background chunk builds.
//!
//! A fixed pool of named threads pulls [`BuildTicket`]s from a channel,
//! produces a lit and meshed [`Chunk`] for each and sends it back on the
//! completion channel. Each build runs generate, light and mesh in turn and
//! checks its ticket's cancellation flag between phases.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use blocklight_core::{ChunkPos, Result};
use blocklight_voxel::{build_mesh, Chunk, LightEngine};
use crossbeam::channel::{self, Receiver, Sender};
use tracing::{trace, warn};

use crate::generation::TerrainGenerator;
use crate::persistence::ChunkPersistence;
use crate::store::{AtomicChunkState, ChunkSlot, ChunkState, NeighborAccess, NeighborhoodLock};
use crate::world::World;

/// One requested chunk build, shared by the manager and the worker running it.
#[derive(Debug)]
pub struct BuildTicket {
    pos: ChunkPos,
    state: AtomicChunkState,
    cancelled: AtomicBool,
}

impl BuildTicket {
    pub fn new(pos: ChunkPos) -> Self {
        Self {
            pos,
            state: AtomicChunkState::new(ChunkState::Queued),
            cancelled: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// Phase the build is in.
    #[inline]
    pub fn state(&self) -> ChunkState {
        self.state.load()
    }

    pub(crate) fn set_state(&self, state: ChunkState) {
        self.state.store(state);
    }

    /// Ask the worker to drop this build at its next phase boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// A neighbour a build took light from, as it was at the time.
#[derive(Debug, Clone)]
pub struct HaloStamp {
    pub pos: ChunkPos,
    slot: Weak<ChunkSlot>,
    pub revision: u64,
}

impl HaloStamp {
    /// True if `slot` is the very chunk this stamp was taken from.
    pub fn is_slot(&self, slot: &Arc<ChunkSlot>) -> bool {
        std::ptr::eq(self.slot.as_ptr(), Arc::as_ptr(slot))
    }
}

/// Result of one build, sent back to the manager.
pub enum BuildOutcome {
    /// The chunk is lit and meshed.
    Finished {
        ticket: Arc<BuildTicket>,
        chunk: Chunk,
        /// Neighbours that were present while the mesh was built.
        halo: Vec<ChunkPos>,
        /// Neighbours the light was computed against.
        lit_against: Vec<HaloStamp>,
    },
    /// The ticket was cancelled before the build completed.
    Cancelled { ticket: Arc<BuildTicket> },
}

impl BuildOutcome {
    pub fn ticket(&self) -> &Arc<BuildTicket> {
        match self {
            Self::Finished { ticket, .. } | Self::Cancelled { ticket } => ticket,
        }
    }
}

impl std::fmt::Debug for BuildOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Finished {
                ticket,
                halo,
                lit_against,
                ..
            } => f
                .debug_struct("Finished")
                .field("pos", &ticket.pos())
                .field("halo", halo)
                .field("lit_against", lit_against)
                .field("chunk", &"<Chunk>")
                .finish(),
            Self::Cancelled { ticket } => f
                .debug_struct("Cancelled")
                .field("pos", &ticket.pos())
                .finish(),
        }
    }
}

/// Everything a build worker needs.
#[derive(Clone)]
pub struct BuildContext {
    pub world: Arc<World>,
    pub generator: TerrainGenerator,
    pub persistence: Arc<dyn ChunkPersistence>,
}

/// Work request sent to the build threads.
enum BuildRequest {
    Build(Arc<BuildTicket>),
    Shutdown,
}

/// Handle to the pool of build threads.
pub struct BuildPool {
    request_tx: Sender<BuildRequest>,
    request_rx: Receiver<BuildRequest>,
    outcome_rx: Receiver<BuildOutcome>,
    threads: Vec<JoinHandle<()>>,
}

impl BuildPool {
    /// Spawn `threads` workers accepting up to `capacity` queued tickets.
    pub fn spawn(threads: usize, capacity: usize, context: BuildContext) -> Result<Self> {
        let (request_tx, request_rx) = channel::bounded::<BuildRequest>(capacity.max(1));
        let (outcome_tx, outcome_rx) = channel::unbounded::<BuildOutcome>();

        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads.max(1) {
            let context = context.clone();
            let request_rx = request_rx.clone();
            let outcome_tx = outcome_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("chunk-build-{index}"))
                .spawn(move || Self::worker_loop(&context, &request_rx, &outcome_tx))?;
            handles.push(handle);
        }

        Ok(Self {
            request_tx,
            request_rx,
            outcome_rx,
            threads: handles,
        })
    }

    /// Blocks waiting for tickets and builds them one at a time.
    fn worker_loop(
        context: &BuildContext,
        request_rx: &Receiver<BuildRequest>,
        outcome_tx: &Sender<BuildOutcome>,
    ) {
        loop {
            match request_rx.recv() {
                Ok(BuildRequest::Build(ticket)) => {
                    let outcome = build_chunk(context, ticket);
                    if outcome_tx.send(outcome).is_err() {
                        return;
                    }
                }
                Ok(BuildRequest::Shutdown) | Err(_) => return,
            }
        }
    }

    /// Queue a ticket without blocking. Returns false if the queue is full.
    pub fn submit(&self, ticket: Arc<BuildTicket>) -> bool {
        self.request_tx.try_send(BuildRequest::Build(ticket)).is_ok()
    }

    /// Take one finished build if any is waiting.
    pub fn try_recv(&self) -> Option<BuildOutcome> {
        self.outcome_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for a finished build.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<BuildOutcome> {
        self.outcome_rx.recv_timeout(timeout).ok()
    }

    /// Finished builds not yet collected.
    pub fn pending_outcomes(&self) -> usize {
        self.outcome_rx.len()
    }

    /// Tickets waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.request_tx.len()
    }

    /// Stop every worker and wait for them to exit. Builds already running
    /// finish first.
    pub fn shutdown(&mut self) {
        // Queued tickets are dropped so shutdown is not stuck behind them.
        while let Ok(request) = self.request_rx.try_recv() {
            if let BuildRequest::Build(ticket) = request {
                ticket.cancel();
            }
        }
        for _ in 0..self.threads.len() {
            let _ = self.request_tx.send(BuildRequest::Shutdown);
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl Drop for BuildPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Build one chunk: load or generate, light against the present
/// neighbours, then mesh.
///
/// Stored light is never trusted: part of it may have come from neighbours
/// that changed since the save, so restored chunks are relit like new ones.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub fn build_chunk(context: &BuildContext, ticket: Arc<BuildTicket>) -> BuildOutcome {
    let pos = ticket.pos();
    let height = context.world.height();
    if ticket.is_cancelled() {
        return BuildOutcome::Cancelled { ticket };
    }

    ticket.set_state(ChunkState::Generating);
    let (mut chunk, from_storage) = match load_stored(context, pos) {
        Some(chunk) => (chunk, true),
        None => (context.generator.generate_chunk(pos, height), false),
    };
    if ticket.is_cancelled() {
        return BuildOutcome::Cancelled { ticket };
    }

    ticket.set_state(ChunkState::Lighting);
    let lit_against = {
        let slots = context.world.store().neighborhood(pos);
        let mut lock = NeighborhoodLock::acquire(&slots, pos, NeighborAccess::Read);
        let mut region = lock.region(height);
        let stamps: Vec<HaloStamp> = slots
            .iter()
            .filter(|slot| slot.pos() != pos)
            .filter_map(|slot| {
                let revision = region.chunk(slot.pos())?.revision();
                Some(HaloStamp {
                    pos: slot.pos(),
                    slot: Arc::downgrade(slot),
                    revision,
                })
            })
            .collect();
        region.insert_mut(&mut chunk);
        LightEngine::light_new_chunk(&mut region);
        stamps
    };
    if ticket.is_cancelled() {
        return BuildOutcome::Cancelled { ticket };
    }

    ticket.set_state(ChunkState::Meshing);
    let (mesh, halo) = {
        let slots = context.world.store().neighborhood(pos);
        let mut lock = NeighborhoodLock::acquire(&slots, pos, NeighborAccess::Read);
        let mut region = lock.region(height);
        region.insert_mut(&mut chunk);
        let halo: Vec<ChunkPos> = region.loaded().into_iter().filter(|p| *p != pos).collect();
        (build_mesh(&region), halo)
    };
    chunk.set_mesh(mesh);
    if ticket.is_cancelled() {
        return BuildOutcome::Cancelled { ticket };
    }

    trace!(?pos, from_storage, faces = chunk.mesh().face_count(), "chunk built");
    BuildOutcome::Finished {
        ticket,
        chunk,
        halo,
        lit_against,
    }
}

fn load_stored(context: &BuildContext, pos: ChunkPos) -> Option<Chunk> {
    let payload = match context.persistence.load(pos) {
        Ok(payload) => payload?,
        Err(err) => {
            warn!(?pos, %err, "failed to load stored chunk, regenerating");
            return None;
        }
    };
    if payload.height != context.world.height() {
        warn!(?pos, stored = payload.height, "stored chunk has a different height, regenerating");
        return None;
    }
    match Chunk::from_payload(payload) {
        Ok(chunk) => Some(chunk),
        Err(err) => {
            warn!(?pos, %err, "stored chunk is corrupt, regenerating");
            None
        }
    }
}
