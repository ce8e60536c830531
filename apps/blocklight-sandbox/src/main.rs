//! Blocklight sandbox
//!
//! Streams a world around a viewer walking in a circle, places a few light
//! sources once the world is ready and logs streaming statistics. Runs
//! headless at a fixed frame rate.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p blocklight-sandbox -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--seed <N>`: World generation seed (default: 42)
//! - `--radius <N>`: Chunk load radius (default: 4)
//! - `--threads <N>`: Build worker threads (default: cores - 1)
//! - `--frames <N>`: Frames to run after the world is ready (default: 600)
//! - `--save-dir <DIR>`: Persist edited chunks under DIR
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod args;

use std::f32::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use blocklight_core::{BlockType, WorldPos};
use blocklight_world::{ChunkManager, EditOptions, WorldConfig, WorldReady};
use glam::Vec3;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
#[cfg(feature = "profiling-tracy")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::args::SandboxArgs;

const FRAME_TIME: Duration = Duration::from_millis(16);
const LOAD_TIMEOUT: Duration = Duration::from_secs(120);
const WALK_RADIUS: f32 = 48.0;
const STATS_EVERY: u32 = 120;

fn main() -> anyhow::Result<()> {
    let args = SandboxArgs::from_args();
    if args.help {
        print_help();
        return Ok(());
    }
    init_logging();

    let mut config = WorldConfig::default()
        .with_seed(args.seed)
        .with_load_radius(args.radius);
    if let Some(threads) = args.threads {
        config = config.with_build_threads(threads);
    }
    if let Some(dir) = &args.save_dir {
        config = config.with_save_dir(dir);
    }

    let (mut manager, ready) = ChunkManager::start(config).context("failed to start world")?;

    let started = Instant::now();
    let spawn = loop {
        run_frame(&mut manager);
        if let Some(WorldReady { spawn }) = ready.try_recv() {
            break spawn;
        }
        if started.elapsed() > LOAD_TIMEOUT {
            anyhow::bail!("world not ready after {LOAD_TIMEOUT:?}: {:?}", manager.stats());
        }
        thread::sleep(FRAME_TIME);
    };
    info!(?spawn, elapsed = ?started.elapsed(), "spawned");

    place_lights(&manager, spawn);

    let center = spawn.center();
    for frame in 0..args.frames {
        let angle = TAU * frame as f32 / args.frames.max(1) as f32;
        let eye = center + Vec3::new(angle.cos(), 0.0, angle.sin()) * WALK_RADIUS;
        manager.set_viewpoint(WorldPos::from(eye));
        run_frame(&mut manager);

        if frame % STATS_EVERY == 0 {
            let stats = manager.stats();
            info!(
                frame,
                loaded = stats.loaded,
                queued = stats.queued,
                in_flight = stats.in_flight,
                dirty_meshes = stats.dirty_meshes,
                pending_saves = stats.pending_saves,
                tick = manager.world().current_tick(),
                "streaming"
            );
        }
        thread::sleep(FRAME_TIME);
    }

    let stats = manager.stats();
    info!(
        published = stats.published,
        discarded = stats.discarded,
        memory_kib = manager.world().store().memory_usage() / 1024,
        "done"
    );
    manager.shutdown();
    Ok(())
}

fn run_frame(manager: &mut ChunkManager) {
    manager.sync_update();
    manager.sync_late_update();
    manager.sync_fixed_update();
}

/// A torch on the ground at spawn, a glass pane above it and a glowstone
/// lamp posted through the main-thread queue.
fn place_lights(manager: &ChunkManager, spawn: WorldPos) {
    let world = manager.world();
    let Some(ground) = world.top_non_air(spawn.x, spawn.z) else {
        warn!(?spawn, "spawn column not loaded");
        return;
    };
    let torch = WorldPos::new(spawn.x, ground + 1, spawn.z);
    if world.set_block_type(torch, BlockType::Torch, 0, EditOptions::default()) {
        info!(
            ?torch,
            level = world.block_light(torch),
            next = world.block_light(torch.offset(1, 0, 0)),
            "torch placed"
        );
    }
    world.set_block_type(
        torch.offset(0, 3, 0),
        BlockType::Glass,
        0,
        EditOptions::default(),
    );

    let lamp = torch.offset(6, 0, 0);
    manager.main_thread().post(move |world| {
        if world.set_block_type(lamp, BlockType::Glowstone, 0, EditOptions::default()) {
            info!(?lamp, light = world.final_light_level(lamp.offset(0, 1, 0)), "lamp placed");
        }
    });
}

fn init_logging() {
    #[cfg(feature = "profiling-tracy")]
    {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,blocklight_world=trace,blocklight_voxel=trace,blocklight_sandbox=trace")
        });
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_tracy::TracyLayer::default())
            .init();
    }
    #[cfg(not(feature = "profiling-tracy"))]
    {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }
}

fn print_help() {
    eprintln!(
        "Blocklight sandbox

Streams a voxel world around a walking viewer, places light sources and
logs streaming statistics.

USAGE:
    blocklight-sandbox [OPTIONS]

OPTIONS:
    --seed <N>          World generation seed [default: 42]
    --radius <N>        Chunk load radius [default: 4]
    --threads <N>       Build worker threads [default: cores - 1]
    --frames <N>        Frames to run once the world is ready [default: 600]
    --save-dir <DIR>    Persist edited chunks under DIR
    -h, --help          Print this help message

ENVIRONMENT:
    RUST_LOG            Log filter (e.g. info, blocklight_world=debug)"
    );
}
