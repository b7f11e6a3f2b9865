//! Benchmarks for the hot paths of the atmosphere tick: the per-edge
//! share kernel, the reaction scan, and a full tick over a busy room.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use hecs::World;
use thinair_core::constants::T20C;
use thinair_core::prelude::*;

fn bench_share_kernel(c: &mut Criterion) {
    let ctx = SimContext::builtin().expect("builtin prototypes");
    let full = ctx
        .gases
        .preset_mixture("station_standard", 2500.0)
        .expect("station_standard preset");
    let empty = GasMixture::new(2500.0);

    c.bench_function("share_full_into_empty", |b| {
        b.iter_batched(
            || (full.clone(), empty.clone()),
            |(mut a, mut b_side)| black_box(a.share(&mut b_side, 4, &ctx.gases)),
            BatchSize::SmallInput,
        )
    });
}

fn bench_reaction_scan(c: &mut Criterion) {
    let ctx = SimContext::builtin().expect("builtin prototypes");
    let mut burning = ctx
        .gases
        .preset_mixture("station_standard", 2500.0)
        .expect("station_standard preset");
    burning.set_moles(GasId::Phoron, 15.0);
    burning.set_temperature(900.0);

    c.bench_function("react_phoron_fire", |b| {
        b.iter_batched(
            || burning.clone(),
            |mut mix| black_box(ctx.reactions.react(&mut mix, &ctx.gases).count()),
            BatchSize::SmallInput,
        )
    });

    let mut inert = ctx
        .gases
        .preset_mixture("station_standard", 2500.0)
        .expect("station_standard preset");
    inert.set_temperature(T20C);
    c.bench_function("react_no_reactions", |b| {
        b.iter_batched(
            || inert.clone(),
            |mut mix| black_box(ctx.reactions.react(&mut mix, &ctx.gases).count()),
            BatchSize::SmallInput,
        )
    });
}

fn bench_active_room_tick(c: &mut Criterion) {
    let mut world = World::new();
    let mut system = AtmosphereSystem::builtin().expect("builtin prototypes");
    let mut grid = GridAtmosphere::new();
    for x in 0..20 {
        for y in 0..20 {
            let profile = if x == 0 || y == 0 || x == 19 || y == 19 {
                TileProfile::wall()
            } else {
                TileProfile::open_filled("station_standard")
            };
            grid.set_tile(TileCoords::new(x, y), profile);
        }
    }
    let grid = world.spawn((grid,));
    system.run_full_tick(&mut world);

    let mut slug = GasMixture::new(1000.0);
    slug.set_moles(GasId::Oxygen, 30.0);
    slug.set_temperature(320.0);

    // Steady state: every iteration disturbs the center and runs one full
    // tick, so the active set never collapses to zero.
    c.bench_function("tick_20x20_disturbed", |b| {
        b.iter(|| {
            system
                .merge_into_tile(&world, grid, TileCoords::new(10, 10), &slug)
                .expect("grid exists");
            system.run_full_tick(&mut world);
        })
    });
}

criterion_group!(
    benches,
    bench_share_kernel,
    bench_reaction_scan,
    bench_active_room_tick
);
criterion_main!(benches);
