//! Fixed-rate block updates.
//!
//! The tick thread wakes on a fixed period, advances the world clock and
//! collects every scheduled update that came due in a ready chunk. Each due
//! cell is offered to the [`TickRule`]s in order; a rule that fires edits the
//! world through the normal edit path, which in turn schedules the cell's
//! neighbours so effects cascade over the following ticks.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use blocklight_core::constants::CHUNK_WIDTH;
use blocklight_core::{BlockType, Face, LocalPos, Result, WorldPos};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use hashbrown::HashSet;
use tracing::{debug, trace};

use crate::world::{EditOptions, World};

/// A block-update behaviour.
pub trait TickRule: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// True if the rule may act on `block`.
    fn applies_to(&self, block: BlockType) -> bool;

    /// Act on the cell at `pos`. Returns true if the world changed.
    fn apply(&self, world: &World, pos: WorldPos, block: BlockType) -> bool;
}

/// Sand and gravel drop into air or water below them.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallingBlockRule;

impl TickRule for FallingBlockRule {
    fn name(&self) -> &'static str {
        "falling"
    }

    fn applies_to(&self, block: BlockType) -> bool {
        block.block().falls
    }

    fn apply(&self, world: &World, pos: WorldPos, block: BlockType) -> bool {
        let below = pos.step(Face::NegY);
        if !below.in_height(world.height()) || !world.is_loaded(below) {
            return false;
        }
        if !matches!(world.block_type(below), BlockType::Air | BlockType::Water) {
            return false;
        }
        let state = world.block_state(pos);
        world.set_block_type(below, block, state, EditOptions::default())
            && world.set_block_type(pos, BlockType::Air, 0, EditOptions::default())
    }
}

/// Leaves with no log reachable through leaves within `reach` steps rot away.
#[derive(Debug, Clone, Copy)]
pub struct LeafDecayRule {
    pub reach: u32,
}

impl Default for LeafDecayRule {
    fn default() -> Self {
        Self { reach: 4 }
    }
}

impl LeafDecayRule {
    /// Breadth-first search through leaves for a log.
    fn supported(&self, world: &World, start: WorldPos) -> bool {
        let mut seen = HashSet::new();
        seen.insert(start);
        let mut frontier = vec![start];
        for _ in 0..self.reach {
            let mut next = Vec::new();
            for pos in frontier {
                for face in Face::ALL {
                    let neighbor = pos.step(face);
                    if !seen.insert(neighbor) {
                        continue;
                    }
                    match world.block_type(neighbor) {
                        BlockType::Log => return true,
                        BlockType::Leaves => next.push(neighbor),
                        _ => {}
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        false
    }
}

impl TickRule for LeafDecayRule {
    fn name(&self) -> &'static str {
        "leaf-decay"
    }

    fn applies_to(&self, block: BlockType) -> bool {
        block == BlockType::Leaves
    }

    fn apply(&self, world: &World, pos: WorldPos, _block: BlockType) -> bool {
        if self.supported(world, pos) {
            return false;
        }
        world.set_block_type(pos, BlockType::Air, 0, EditOptions::default())
    }
}

/// The rules every world runs.
pub fn default_rules() -> Vec<Box<dyn TickRule>> {
    vec![Box::new(FallingBlockRule), Box::new(LeafDecayRule::default())]
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Cells offered to the rules.
    pub updates: usize,
    /// Rule applications that changed the world.
    pub changes: usize,
}

/// Run a single tick on the calling thread.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub fn run_tick(world: &World, rules: &[Box<dyn TickRule>], random_per_chunk: u32) -> TickReport {
    let tick = world.advance_tick();
    let height = world.height();

    let mut due = Vec::new();
    for slot in world.store().ready_slots() {
        let pos = slot.pos();
        let mut chunk = slot.write();
        if !slot.is_ready() {
            continue;
        }
        due.extend(
            chunk
                .take_due_updates(tick)
                .into_iter()
                .map(|update| WorldPos::from_chunk_local(pos, update.local)),
        );
        drop(chunk);

        for i in 0..random_per_chunk {
            let local = random_cell(tick, pos.x, pos.z, i, height);
            due.push(WorldPos::from_chunk_local(pos, local));
        }
    }

    let mut report = TickReport {
        tick,
        updates: due.len(),
        changes: 0,
    };
    for pos in due {
        let block = world.block_type(pos);
        for rule in rules {
            if rule.applies_to(block) && rule.apply(world, pos, block) {
                trace!(rule = rule.name(), ?pos, ?block, "block updated");
                report.changes += 1;
                break;
            }
        }
    }
    report
}

/// Deterministic cell pick for random ticks.
fn random_cell(tick: u64, x: i32, z: i32, index: u32, height: usize) -> LocalPos {
    let mut h = tick.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ ((u64::from(x as u32) << 32) | u64::from(z as u32)).wrapping_mul(0xD1B5_4A32_D192_ED03)
        ^ u64::from(index);
    h = (h ^ (h >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    h = (h ^ (h >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    h ^= h >> 31;
    let width = CHUNK_WIDTH as u64;
    LocalPos::new(
        (h % width) as u8,
        ((h >> 16) % height as u64) as u16,
        ((h >> 8) % width) as u8,
    )
}

/// Handle to the tick thread.
pub struct TickWorker {
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl TickWorker {
    /// Start ticking `world` every `period`.
    pub fn spawn(
        world: Arc<World>,
        period: Duration,
        rules: Vec<Box<dyn TickRule>>,
        random_per_chunk: u32,
    ) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("tick-worker".to_string())
            .spawn(move || {
                let mut next = Instant::now() + period;
                loop {
                    let wait = next.saturating_duration_since(Instant::now());
                    match shutdown_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            let report = run_tick(&world, &rules, random_per_chunk);
                            if report.changes > 0 {
                                debug!(
                                    tick = report.tick,
                                    updates = report.updates,
                                    changes = report.changes,
                                    "tick"
                                );
                            }
                            next += period;
                            // Missed ticks are dropped.
                            let now = Instant::now();
                            if next < now {
                                next = now + period;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            })?;

        Ok(Self {
            shutdown_tx,
            thread: Some(thread),
        })
    }

    /// Stop the thread after its current tick.
    pub fn shutdown(&mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TickWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
