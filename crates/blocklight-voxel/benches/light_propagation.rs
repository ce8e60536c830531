//! Light propagation benchmarks.
//!
//! Run with: `cargo bench --package blocklight-voxel`

use blocklight_core::constants::DEFAULT_WORLD_HEIGHT;
use blocklight_core::{BlockType, ChunkPos, LocalPos, WorldPos};
use blocklight_voxel::{build_mesh, Chunk, ChunkNeighborhood, LightChannel, LightEngine};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Stone below `ground`, air above, with a few glowstone pockets.
fn terrain_chunk(pos: ChunkPos, ground: u16) -> Chunk {
    let mut chunk = Chunk::new(pos, DEFAULT_WORLD_HEIGHT);
    for z in 0..16 {
        for x in 0..16 {
            for y in 0..ground {
                chunk.set_block(LocalPos::new(x, y, z), BlockType::Stone);
            }
        }
    }
    for (x, z) in [(3, 3), (12, 4), (7, 11)] {
        chunk.set_block(LocalPos::new(x, ground - 3, z), BlockType::Glowstone);
        chunk.set_block(LocalPos::new(x, ground - 2, z), BlockType::Air);
    }
    chunk
}

fn bench_light_new_chunk(c: &mut Criterion) {
    let mut group = c.benchmark_group("light_new_chunk");
    for ground in [16u16, 64, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(ground), &ground, |b, &ground| {
            let mut chunk = terrain_chunk(ChunkPos::new(0, 0), ground);
            b.iter(|| {
                let mut region = ChunkNeighborhood::new(ChunkPos::new(0, 0), DEFAULT_WORLD_HEIGHT);
                region.insert_mut(&mut chunk);
                black_box(LightEngine::light_new_chunk(&mut region))
            });
        });
    }
    group.finish();
}

fn bench_place_and_remove(c: &mut Criterion) {
    let pos = ChunkPos::new(0, 0);
    let mut chunk = terrain_chunk(pos, 64);
    {
        let mut region = ChunkNeighborhood::new(pos, DEFAULT_WORLD_HEIGHT);
        region.insert_mut(&mut chunk);
        LightEngine::light_new_chunk(&mut region);
    }
    let target = WorldPos::new(8, 70, 8);

    c.bench_function("place_and_remove_stone", |b| {
        b.iter(|| {
            for block in [BlockType::Stone, BlockType::Air] {
                chunk.set_block(target.local_pos(), block);
                let mut region = ChunkNeighborhood::new(pos, DEFAULT_WORLD_HEIGHT);
                region.insert_mut(&mut chunk);
                for channel in LightChannel::ALL {
                    black_box(LightEngine::relight_cell(&mut region, channel, target));
                }
            }
        });
    });
}

fn bench_mesh(c: &mut Criterion) {
    let pos = ChunkPos::new(0, 0);
    let mut chunk = terrain_chunk(pos, 64);
    let mut region = ChunkNeighborhood::new(pos, DEFAULT_WORLD_HEIGHT);
    region.insert_mut(&mut chunk);
    LightEngine::light_new_chunk(&mut region);

    c.bench_function("build_mesh", |b| b.iter(|| black_box(build_mesh(&region))));
}

criterion_group!(
    benches,
    bench_light_new_chunk,
    bench_place_and_remove,
    bench_mesh
);
criterion_main!(benches);
