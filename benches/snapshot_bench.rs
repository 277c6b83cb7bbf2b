//! Benchmarks for the per-tick hot paths.
//!
//! Run with: cargo bench --bench snapshot_bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;

use gommo_server::game::snapshot::{build_world_update, build_world_update_uncached};
use gommo_server::game::{Direction, EntityId, Position, Simulation, WorldSettings};

/// A populated simulation plus the players in it
fn crowd(players: usize, creatures: usize) -> (Simulation, Vec<EntityId>) {
    let mut sim = Simulation::new(WorldSettings::default());
    let mut rng = StdRng::seed_from_u64(7);
    let side = (players as f64).sqrt().ceil() as i64;

    let mut ids = Vec::with_capacity(players);
    for n in 0..players as i64 {
        let pos = Position::from_offset((n % side) * 60 - side * 30, (n / side) * 60 - side * 30);
        ids.push(sim.insert_player_at(None, pos));
    }
    for _ in 0..creatures {
        let _ = sim.spawn_creature(&mut rng, 2_000);
    }
    (sim, ids)
}

fn benchmark_snapshot(c: &mut Criterion) {
    let (mut sim, players) = crowd(1_000, 500);
    sim.advance_tick();

    let mut group = c.benchmark_group("world_update");
    group.throughput(Throughput::Elements(players.len() as u64));

    group.bench_function("cached_1000_viewers", |b| {
        b.iter(|| {
            for &viewer in &players {
                black_box(build_world_update(&sim, viewer, 2));
            }
        });
    });

    group.bench_function("uncached_1000_viewers", |b| {
        b.iter(|| {
            for &viewer in &players {
                black_box(build_world_update_uncached(&sim, viewer, 2));
            }
        });
    });

    group.finish();
}

fn benchmark_mutation_phase(c: &mut Criterion) {
    let (mut sim, players) = crowd(1_000, 500);
    for (n, &id) in players.iter().enumerate() {
        let _ = sim.set_move_direction(id, Direction::COMPASS[n % 8]);
    }

    let mut group = c.benchmark_group("mutation_phase");
    group.sample_size(20);
    group.bench_function("1500_entities", |b| {
        b.iter(|| {
            sim.advance_tick();
            black_box(sim.run_mutation_phase());
        });
    });
    group.finish();
}

criterion_group!(benches, benchmark_snapshot, benchmark_mutation_phase);
criterion_main!(benches);
