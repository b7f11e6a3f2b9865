//! Integration tests for full atmosphere ticks through the public surface.
//!
//! Exercises: host edits → revalidation → diffusion → excited groups
//! → room equalization → depressurization → combustion, all driven the
//! way an embedding game would drive them: a `hecs` world of grid
//! entities and one `AtmosphereSystem`.

use hecs::{Entity, World};
use thinair_core::constants::{ONE_ATMOSPHERE, T20C};
use thinair_core::prelude::*;

// ── Helpers ────────────────────────────────────────────────────────────

/// A sealed rectangular room: walls on the border, standard air inside.
fn room_grid(width: i32, height: i32) -> GridAtmosphere {
    let mut grid = GridAtmosphere::new();
    for x in 0..width {
        for y in 0..height {
            let profile = if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
                TileProfile::wall()
            } else {
                TileProfile::open_filled("station_standard")
            };
            grid.set_tile(TileCoords::new(x, y), profile);
        }
    }
    grid
}

fn spawn_room(world: &mut World, width: i32, height: i32) -> Entity {
    world.spawn((room_grid(width, height),))
}

/// Total gas on a grid, summed in f64 so the assertion noise floor
/// stays well below the simulation's own.
fn grid_total_moles(system: &AtmosphereSystem, world: &World, grid: Entity) -> f64 {
    let atmosphere = system
        .simulated_grid_atmosphere(world, grid)
        .expect("grid should be simulated");
    atmosphere
        .tiles()
        .map(|tile| tile.mixture().total_moles() as f64)
        .sum()
}

fn run_ticks(system: &mut AtmosphereSystem, world: &mut World, ticks: usize) {
    for _ in 0..ticks {
        system.run_full_tick(world);
    }
}

// ── Room construction ──────────────────────────────────────────────────

#[test]
fn fresh_room_reaches_standard_pressure() {
    let mut world = World::new();
    let mut system = AtmosphereSystem::builtin().unwrap();
    let grid = spawn_room(&mut world, 5, 5);
    run_ticks(&mut system, &mut world, 3);

    for x in 1..4 {
        for y in 1..4 {
            let mixture = system.tile_mixture(&world, grid, TileCoords::new(x, y));
            assert!(
                (mixture.pressure() - ONE_ATMOSPHERE).abs() < 1.0,
                "tile ({}, {}) at {:.2} kPa",
                x,
                y,
                mixture.pressure()
            );
            assert!(
                (mixture.temperature() - T20C).abs() < 0.5,
                "tile ({}, {}) at {:.2} K",
                x,
                y,
                mixture.temperature()
            );
        }
    }
}

#[test]
fn sealed_room_conserves_mass_and_goes_quiet() {
    let mut world = World::new();
    let mut system = AtmosphereSystem::builtin().unwrap();
    let grid = spawn_room(&mut world, 6, 6);
    system.run_full_tick(&mut world);
    let start = grid_total_moles(&system, &world, grid);

    run_ticks(&mut system, &mut world, 60);
    let end = grid_total_moles(&system, &world, grid);

    assert!(
        (end - start).abs() < 0.01,
        "sealed room leaked: {:.4} → {:.4}",
        start,
        end
    );
    assert_eq!(
        system.active_tiles(&world),
        0,
        "uniform sealed room should sleep"
    );
    let atmosphere = system.simulated_grid_atmosphere(&world, grid).unwrap();
    assert_eq!(atmosphere.excited_group_count(), 0);
}

// ── Diffusion and equalization ─────────────────────────────────────────

#[test]
fn opened_door_equalizes_two_rooms() {
    // Filled room | dividing wall at x=3 | empty room, all behind walls.
    let mut world = World::new();
    let mut system = AtmosphereSystem::builtin().unwrap();
    let mut grid = GridAtmosphere::new();
    for x in 0..7 {
        for y in 0..3 {
            let profile = if x == 0 || x == 3 || x == 6 || y == 0 || y == 2 {
                TileProfile::wall()
            } else if x < 3 {
                TileProfile::open_filled("station_standard")
            } else {
                TileProfile::open()
            };
            grid.set_tile(TileCoords::new(x, y), profile);
        }
    }
    let grid = world.spawn((grid,));
    run_ticks(&mut system, &mut world, 3);

    let sealed_side = system.tile_mixture(&world, grid, TileCoords::new(1, 1));
    assert!(sealed_side.pressure() > ONE_ATMOSPHERE - 1.0);
    let empty_side = system.tile_mixture(&world, grid, TileCoords::new(5, 1));
    assert_eq!(empty_side.total_moles(), 0.0);

    // Swing the door open.
    {
        let mut atmosphere = system.simulated_grid_atmosphere_mut(&world, grid).unwrap();
        atmosphere.set_tile(TileCoords::new(3, 1), TileProfile::open());
    }
    run_ticks(&mut system, &mut world, 4);

    let left = system.tile_mixture(&world, grid, TileCoords::new(1, 1));
    let right = system.tile_mixture(&world, grid, TileCoords::new(5, 1));
    assert!(
        (left.pressure() - right.pressure()).abs() < 1.0,
        "rooms did not equalize: {:.2} vs {:.2} kPa",
        left.pressure(),
        right.pressure()
    );
    assert!(right.total_moles() > 10.0, "no air made it across the door");
}

#[test]
fn diffusion_alone_still_levels_out() {
    // Same layout, equalization switched off: plain sharing has to do it.
    let mut world = World::new();
    let mut system = AtmosphereSystem::builtin().unwrap();
    let mut config = system.config().clone();
    config.monstermos_equalization = false;
    system.set_config(config);

    let mut grid = GridAtmosphere::new();
    for x in 0..5 {
        for y in 0..3 {
            let profile = if x == 0 || x == 4 || y == 0 || y == 2 {
                TileProfile::wall()
            } else if x == 1 {
                TileProfile::open_filled("station_standard")
            } else {
                TileProfile::open()
            };
            grid.set_tile(TileCoords::new(x, y), profile);
        }
    }
    let grid = world.spawn((grid,));
    run_ticks(&mut system, &mut world, 120);

    let near = system.tile_mixture(&world, grid, TileCoords::new(1, 1));
    let far = system.tile_mixture(&world, grid, TileCoords::new(3, 1));
    assert!(
        (near.total_moles() - far.total_moles()).abs() < 1.0,
        "sharing stalled: {:.2} vs {:.2} mol",
        near.total_moles(),
        far.total_moles()
    );
}

// ── Breach behavior ────────────────────────────────────────────────────

#[test]
fn hull_breach_empties_the_room() {
    let mut world = World::new();
    let mut system = AtmosphereSystem::builtin().unwrap();
    let mut config = system.config().clone();
    config.space_wind = true;
    system.set_config(config);

    let grid = spawn_room(&mut world, 5, 5);
    run_ticks(&mut system, &mut world, 2);
    {
        let mut atmosphere = system.simulated_grid_atmosphere_mut(&world, grid).unwrap();
        atmosphere.take_pressure_events();
        // Knock a hole in the south wall; (2, -1) is open space.
        atmosphere.set_tile(TileCoords::new(2, 0), TileProfile::open());
    }
    system.run_full_tick(&mut world);

    let events = {
        let mut atmosphere = system.simulated_grid_atmosphere_mut(&world, grid).unwrap();
        atmosphere.take_pressure_events()
    };
    assert!(!events.is_empty(), "a breach should report pressure shoves");
    assert!(
        events.iter().any(|e| e.pressure_difference > 50.0),
        "no strong shove near the breach"
    );
    assert!(
        events.iter().all(|e| e.direction.is_some()),
        "breach winds should be directional"
    );

    run_ticks(&mut system, &mut world, 3);
    for x in 1..4 {
        for y in 1..4 {
            let mixture = system.tile_mixture(&world, grid, TileCoords::new(x, y));
            assert!(
                mixture.total_moles() < 0.01,
                "tile ({}, {}) kept {:.4} mol after venting",
                x,
                y,
                mixture.total_moles()
            );
        }
    }
}

#[test]
fn grids_vent_independently() {
    let mut world = World::new();
    let mut system = AtmosphereSystem::builtin().unwrap();
    let sealed = spawn_room(&mut world, 4, 4);
    let breached = spawn_room(&mut world, 4, 4);
    run_ticks(&mut system, &mut world, 2);
    let sealed_start = grid_total_moles(&system, &world, sealed);

    {
        let mut atmosphere = system
            .simulated_grid_atmosphere_mut(&world, breached)
            .unwrap();
        atmosphere.set_tile(TileCoords::new(1, 0), TileProfile::open());
    }
    run_ticks(&mut system, &mut world, 5);

    assert!(
        grid_total_moles(&system, &world, breached) < 0.1,
        "breached grid still holds air"
    );
    let sealed_end = grid_total_moles(&system, &world, sealed);
    assert!(
        (sealed_end - sealed_start).abs() < 0.01,
        "sealed grid lost air to a breach on another grid"
    );
}

// ── Combustion ─────────────────────────────────────────────────────────

#[test]
fn phoron_fire_burns_in_sealed_cell() {
    let mut world = World::new();
    let mut system = AtmosphereSystem::builtin().unwrap();
    let grid = {
        let mut grid = GridAtmosphere::new();
        for x in 0..3 {
            for y in 0..3 {
                let profile = if x == 1 && y == 1 {
                    TileProfile::open_filled("station_standard")
                } else {
                    TileProfile::wall()
                };
                grid.set_tile(TileCoords::new(x, y), profile);
            }
        }
        world.spawn((grid,))
    };
    system.run_full_tick(&mut world);

    let coords = TileCoords::new(1, 1);
    let mut torch = GasMixture::new(70.0);
    torch.set_moles(GasId::Phoron, 10.0);
    torch.set_temperature(1200.0);
    assert!(system.merge_into_tile(&world, grid, coords, &torch).unwrap());
    run_ticks(&mut system, &mut world, 10);

    let mixture = system.tile_mixture(&world, grid, coords);
    assert!(
        mixture.moles(GasId::CarbonDioxide) > 0.0,
        "combustion produced no CO2"
    );
    assert!(
        mixture.moles(GasId::Phoron) < 10.0,
        "no phoron was consumed"
    );
    assert!(
        mixture.temperature() > 400.0,
        "fire failed to heat the cell: {:.1} K",
        mixture.temperature()
    );
}

// ── Determinism ────────────────────────────────────────────────────────

#[test]
fn identical_worlds_stay_identical() {
    let build = || {
        let mut world = World::new();
        let mut system = AtmosphereSystem::builtin().unwrap();
        let grid = spawn_room(&mut world, 8, 8);
        system.run_full_tick(&mut world);
        let mut slug = GasMixture::new(1000.0);
        slug.set_moles(GasId::Oxygen, 40.0);
        slug.set_temperature(360.0);
        system
            .merge_into_tile(&world, grid, TileCoords::new(1, 1), &slug)
            .unwrap();
        (world, system, grid)
    };

    let (mut world_a, mut system_a, grid_a) = build();
    let (mut world_b, mut system_b, grid_b) = build();
    run_ticks(&mut system_a, &mut world_a, 12);
    run_ticks(&mut system_b, &mut world_b, 12);

    let a = system_a.simulated_grid_atmosphere(&world_a, grid_a).unwrap();
    let b = system_b.simulated_grid_atmosphere(&world_b, grid_b).unwrap();
    for x in 0..8 {
        for y in 0..8 {
            let coords = TileCoords::new(x, y);
            match (a.tile_mixture(coords), b.tile_mixture(coords)) {
                (Some(left), Some(right)) => {
                    assert_eq!(
                        left.total_moles(),
                        right.total_moles(),
                        "divergence at ({}, {})",
                        x,
                        y
                    );
                    assert_eq!(left.temperature(), right.temperature());
                }
                (None, None) => {}
                _ => panic!("tile presence diverged at ({}, {})", x, y),
            }
        }
    }
}

// ── Host poke ──────────────────────────────────────────────────────────

#[test]
fn invalidate_requeues_without_changing_gas() {
    let mut world = World::new();
    let mut system = AtmosphereSystem::builtin().unwrap();
    let grid = spawn_room(&mut world, 4, 4);
    run_ticks(&mut system, &mut world, 60);
    assert_eq!(system.active_tiles(&world), 0);
    let before = grid_total_moles(&system, &world, grid);

    {
        let mut atmosphere = system.simulated_grid_atmosphere_mut(&world, grid).unwrap();
        atmosphere.invalidate_tile(TileCoords::new(1, 1));
    }
    run_ticks(&mut system, &mut world, 60);

    let after = grid_total_moles(&system, &world, grid);
    assert!(
        (after - before).abs() < 0.01,
        "a poke should not create or destroy gas"
    );
    assert_eq!(system.active_tiles(&world), 0, "poked room should resettle");
}
