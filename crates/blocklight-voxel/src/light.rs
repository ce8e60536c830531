//! Dual-channel BFS light propagation.
//!
//! Block light and sky light are independent 0-15 fields. Both spread with
//! the same rule: entering a cell costs `max(1, opacity)`, except sky light
//! moving straight down, which costs only the destination's opacity. A
//! column open to the sky therefore stays at full brightness all the way
//! down to the first opaque block.
//!
//! The world above the top of a column is a constant sky source of
//! [`MAX_LIGHT`]. Every settled light field is the unique fixpoint of those
//! rules over the sources, which is what makes incremental updates
//! reversible: placing a block and then removing it restores the exact
//! previous field.

use crate::chunk::{Chunk, LightChannel};
use crate::neighborhood::ChunkNeighborhood;
use blocklight_core::constants::{CHUNK_WIDTH, MAX_LIGHT};
use blocklight_core::{BlockType, Face, LocalPos, WorldPos};
use std::collections::VecDeque;

/// Light propagation queue entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LightNode {
    pub pos: WorldPos,
    pub level: u8,
}

impl LightNode {
    #[inline]
    pub const fn new(pos: WorldPos, level: u8) -> Self {
        Self { pos, level }
    }
}

/// Stateless light solver over a [`ChunkNeighborhood`].
pub struct LightEngine;

impl LightEngine {
    /// Light lost moving across `face` into a cell holding `dest`.
    #[inline]
    pub fn attenuation(channel: LightChannel, face: Face, dest: BlockType) -> u8 {
        let opacity = dest.light_opacity();
        if channel == LightChannel::Sky && face == Face::NegY {
            opacity
        } else {
            opacity.max(1)
        }
    }

    /// Light a cell produces on its own, ignoring its neighbours.
    #[inline]
    pub fn source_level(channel: LightChannel, block: BlockType, y: i32, height: usize) -> u8 {
        match channel {
            LightChannel::Block => block.light_value(),
            LightChannel::Sky if y == height as i32 - 1 => {
                MAX_LIGHT.saturating_sub(block.light_opacity())
            }
            LightChannel::Sky => 0,
        }
    }

    /// Spread light outward from `seeds`, raising any neighbour that can be
    /// made brighter. Seeds are read at their stored level when present.
    ///
    /// Returns the number of nodes processed.
    pub fn propagate(
        region: &mut ChunkNeighborhood<'_>,
        channel: LightChannel,
        seeds: impl IntoIterator<Item = LightNode>,
    ) -> usize {
        let mut queue: VecDeque<LightNode> = seeds.into_iter().collect();
        let mut processed = 0;

        while let Some(node) = queue.pop_front() {
            processed += 1;
            let level = region.light(channel, node.pos).unwrap_or(node.level);
            if level == 0 {
                continue;
            }
            for face in Face::ALL {
                let next = node.pos.step(face);
                let Some(block) = region.block(next) else {
                    continue;
                };
                let reduce = Self::attenuation(channel, face, block);
                if reduce >= level {
                    continue;
                }
                let candidate = level - reduce;
                let current = region.light(channel, next).unwrap_or(MAX_LIGHT);
                if candidate > current && region.set_light(channel, next, candidate) {
                    queue.push_back(LightNode::new(next, candidate));
                }
            }
        }
        processed
    }

    /// Remove light that depended on `seeds`.
    ///
    /// Each seed carries the level its cell held before the change; the
    /// cell itself must already hold its new intrinsic level. Neighbours
    /// whose level equals exactly what the seed would have given them are
    /// zeroed and followed. Brighter neighbours are independently lit and
    /// become sources for re-propagation, which then refills the darkened
    /// area.
    pub fn remove(
        region: &mut ChunkNeighborhood<'_>,
        channel: LightChannel,
        seeds: impl IntoIterator<Item = LightNode>,
    ) -> usize {
        let height = region.height();
        let mut queue: VecDeque<LightNode> = VecDeque::new();
        let mut relight: Vec<LightNode> = Vec::new();

        for seed in seeds {
            if let Some(current) = region.light(channel, seed.pos) {
                if current > 0 {
                    relight.push(LightNode::new(seed.pos, current));
                }
            }
            queue.push_back(seed);
        }

        let mut processed = 0;
        while let Some(node) = queue.pop_front() {
            processed += 1;
            for face in Face::ALL {
                let next = node.pos.step(face);
                let Some(block) = region.block(next) else {
                    continue;
                };
                let Some(level) = region.light(channel, next) else {
                    continue;
                };
                if level == 0 {
                    continue;
                }
                let expected = node
                    .level
                    .saturating_sub(Self::attenuation(channel, face, block));
                if level == expected && region.is_writable(next) {
                    let source = Self::source_level(channel, block, next.y, height);
                    region.set_light(channel, next, source);
                    queue.push_back(LightNode::new(next, level));
                    if source > 0 {
                        relight.push(LightNode::new(next, source));
                    }
                } else {
                    relight.push(LightNode::new(next, level));
                }
            }
        }

        processed + Self::propagate(region, channel, relight)
    }

    /// Bring one cell back to a settled state after its block changed.
    ///
    /// Brightening only propagates; darkening runs removal from the cell
    /// with its previous level.
    pub fn relight_cell(
        region: &mut ChunkNeighborhood<'_>,
        channel: LightChannel,
        pos: WorldPos,
    ) -> usize {
        let (Some(block), Some(old)) = (region.block(pos), region.light(channel, pos)) else {
            return 0;
        };
        let source = Self::source_level(channel, block, pos.y, region.height());

        let mut best = source;
        for face in Face::ALL {
            let from = pos.step(face);
            if let Some(level) = region.light(channel, from) {
                let reduce = Self::attenuation(channel, face.opposite(), block);
                best = best.max(level.saturating_sub(reduce));
            }
        }

        if best > old {
            region.set_light(channel, pos, best);
            Self::propagate(region, channel, [LightNode::new(pos, best)])
        } else if best < old {
            region.set_light(channel, pos, source);
            Self::remove(region, channel, [LightNode::new(pos, old)])
        } else {
            0
        }
    }

    /// Force the light at `pos` to `level` and settle the field.
    ///
    /// The field stays authoritative: a lowered cell that neighbours still
    /// light will be refilled.
    pub fn set_level(
        region: &mut ChunkNeighborhood<'_>,
        channel: LightChannel,
        pos: WorldPos,
        level: u8,
    ) -> usize {
        let level = level.min(MAX_LIGHT);
        let Some(old) = region.light(channel, pos) else {
            return 0;
        };
        if !region.set_light(channel, pos, level) {
            return 0;
        }
        match level.cmp(&old) {
            std::cmp::Ordering::Greater => {
                Self::propagate(region, channel, [LightNode::new(pos, level)])
            }
            std::cmp::Ordering::Less => Self::remove(region, channel, [LightNode::new(pos, old)]),
            std::cmp::Ordering::Equal => 0,
        }
    }

    /// Light a freshly generated center chunk from scratch.
    ///
    /// Casts sky light down every column, seeds emissive blocks, then pulls
    /// light in across the four borders from any loaded neighbours.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn light_new_chunk(region: &mut ChunkNeighborhood<'_>) -> usize {
        let center = region.center();
        let height = region.height();
        let Some(chunk) = region.chunk_mut(center) else {
            return 0;
        };
        chunk.clear_light();

        let mut sky_seeds = Vec::new();
        let mut block_seeds = Vec::new();
        for z in 0..CHUNK_WIDTH as u8 {
            for x in 0..CHUNK_WIDTH as u8 {
                let mut level = MAX_LIGHT;
                for y in (0..height as u16).rev() {
                    let local = LocalPos::new(x, y, z);
                    level = level.saturating_sub(chunk.block(local).light_opacity());
                    if level == 0 {
                        break;
                    }
                    chunk.set_light(LightChannel::Sky, local, level);
                    sky_seeds.push(LightNode::new(WorldPos::from_chunk_local(center, local), level));
                }
            }
        }
        for index in 0..chunk.volume() {
            let emit = chunk.block_at(index).light_value();
            if emit > 0 {
                chunk.set_light_at(LightChannel::Block, index, emit);
                let world = WorldPos::from_chunk_local(center, LocalPos::from_index(index));
                block_seeds.push(LightNode::new(world, emit));
            }
        }
        region.touch(center);

        let mut processed = Self::propagate(region, LightChannel::Sky, sky_seeds);
        processed += Self::propagate(region, LightChannel::Block, block_seeds);
        processed + Self::pull_halo(region)
    }

    /// Seed propagation from neighbour cells bordering the center chunk.
    pub fn pull_halo(region: &mut ChunkNeighborhood<'_>) -> usize {
        let mut processed = 0;
        for channel in LightChannel::ALL {
            let seeds = Self::border_cells(region, true)
                .into_iter()
                .filter_map(|pos| {
                    let level = region.light(channel, pos)?;
                    (level > 1).then_some(LightNode::new(pos, level))
                })
                .collect::<Vec<_>>();
            processed += Self::propagate(region, channel, seeds);
        }
        processed
    }

    /// Reconcile light across every border of the center chunk, in both
    /// directions. Used when a chunk joins neighbours that were lit
    /// without it.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn stitch_borders(region: &mut ChunkNeighborhood<'_>) -> usize {
        let mut processed = 0;
        for channel in LightChannel::ALL {
            let mut cells = Self::border_cells(region, false);
            cells.extend(Self::border_cells(region, true));
            let seeds = cells
                .into_iter()
                .filter_map(|pos| {
                    let level = region.light(channel, pos)?;
                    (level > 1).then_some(LightNode::new(pos, level))
                })
                .collect::<Vec<_>>();
            processed += Self::propagate(region, channel, seeds);
        }
        processed
    }

    /// Lit cells of `chunk` along its `face` side, as `[block, sky]` seeds.
    pub fn edge_light(chunk: &Chunk, face: Face) -> [Vec<LightNode>; 2] {
        let last = CHUNK_WIDTH as u8 - 1;
        let mut out = [Vec::new(), Vec::new()];
        for y in 0..chunk.height() as u16 {
            for i in 0..CHUNK_WIDTH as u8 {
                let local = match face {
                    Face::PosX => LocalPos::new(last, y, i),
                    Face::NegX => LocalPos::new(0, y, i),
                    Face::PosZ => LocalPos::new(i, y, last),
                    Face::NegZ => LocalPos::new(i, y, 0),
                    Face::PosY | Face::NegY => return out,
                };
                let pos = WorldPos::from_chunk_local(chunk.pos(), local);
                for (seeds, channel) in out.iter_mut().zip(LightChannel::ALL) {
                    let level = chunk.light(channel, local);
                    if level > 0 {
                        seeds.push(LightNode::new(pos, level));
                    }
                }
            }
        }
        out
    }

    /// Take back light that entered the region from a chunk that has left
    /// it. `edge` is what [`Self::edge_light`] captured on the departed
    /// chunk's side facing the region.
    pub fn retract_edge(region: &mut ChunkNeighborhood<'_>, edge: [Vec<LightNode>; 2]) -> usize {
        LightChannel::ALL
            .into_iter()
            .zip(edge)
            .map(|(channel, seeds)| Self::remove(region, channel, seeds))
            .sum()
    }

    /// Cells along the four vertical borders of the center chunk.
    /// With `outside`, the neighbour-side cells facing the center instead.
    fn border_cells(region: &ChunkNeighborhood<'_>, outside: bool) -> Vec<WorldPos> {
        let origin = region.center_origin();
        let width = CHUNK_WIDTH as i32;
        let (lo, hi) = if outside { (-1, width) } else { (0, width - 1) };
        let mut out = Vec::with_capacity(4 * CHUNK_WIDTH * region.height());
        for y in 0..region.height() as i32 {
            for i in 0..width {
                out.push(origin.offset(lo, y, i));
                out.push(origin.offset(hi, y, i));
                out.push(origin.offset(i, y, lo));
                out.push(origin.offset(i, y, hi));
            }
        }
        out
    }
}
