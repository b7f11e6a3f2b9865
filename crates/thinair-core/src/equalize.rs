//! Zoned pressure equalization, the optional fast path for large deltas.
//!
//! Plain sharing halves a pressure difference per tick, which reads as gas
//! oozing through a breached hallway. This pass instead floods outward from
//! each unvisited active tile to collect a *zone* (a connected region of
//! open cells), then settles the whole zone at once: sealed zones snap to
//! their average pressure over a spanning tree, and zones touching space
//! vent everything through the breach in a single tick.
//!
//! Zones are bounded. A sealed zone larger than `zumos_tile_limit` is left
//! to plain sharing, and no zone grows past `zumos_hard_tile_limit` no
//! matter what; a truncated zone simply treats the cut as a wall and keeps
//! venting tick by tick as outside gas reaches it.

use std::collections::HashMap;
use std::time::Instant;

use crate::constants::R_IDEAL_GAS;
use crate::context::SimContext;
use crate::grid::GridAtmosphere;
use crate::tile::{Direction, TileKey};

/// Runs the pass over the grid's active snapshot. Returns false when the
/// deadline hit; call again to resume at the next seed. Zones are atomic:
/// the pass yields between zones, never inside one.
pub(crate) fn run(grid: &mut GridAtmosphere, ctx: &SimContext, deadline: Instant) -> bool {
    while let Some(seed) = grid.advance_cursor() {
        process_zone(grid, seed, ctx);
        if Instant::now() >= deadline {
            return false;
        }
    }
    true
}

struct Zone {
    /// Flood order; every tile's parent precedes it.
    tiles: Vec<TileKey>,
    /// Parent index and the direction parent-to-child, `None` at the seed.
    parents: Vec<Option<(usize, Direction)>>,
    /// Zone index and outward direction of every face onto space.
    exits: Vec<(usize, Direction)>,
}

fn process_zone(grid: &mut GridAtmosphere, seed: TileKey, ctx: &SimContext) {
    let Some(zone) = collect_zone(grid, seed, ctx.config.zumos_hard_tile_limit) else {
        return;
    };
    if !zone.exits.is_empty() {
        depressurize(grid, &zone, ctx);
        return;
    }
    if zone.tiles.len() < 2 || zone.tiles.len() > ctx.config.zumos_tile_limit {
        // Oversized sealed zones are left to plain sharing.
        return;
    }
    equalize(grid, &zone, ctx);
}

/// Floods from `seed` through open faces. Every visited tile is stamped
/// with the current tick so later seeds skip ground already covered.
fn collect_zone(grid: &mut GridAtmosphere, seed: TileKey, hard_limit: usize) -> Option<Zone> {
    let tick = grid.tick_number();
    {
        let tile = grid.tile_by_key_mut(seed)?;
        if !tile.active || tile.last_equalize_tick == tick {
            return None;
        }
        tile.last_equalize_tick = tick;
    }

    let mut zone = Zone {
        tiles: vec![seed],
        parents: vec![None],
        exits: Vec::new(),
    };
    let mut head = 0;
    while head < zone.tiles.len() {
        let key = zone.tiles[head];
        let Some(tile) = grid.tile_by_key(key) else {
            head += 1;
            continue;
        };
        let coords = tile.coords;
        let airtight = tile.airtight;
        for direction in Direction::ALL {
            if airtight.contains(direction) {
                continue;
            }
            let neighbor_coords = coords.offset(direction);
            match grid.key_at(neighbor_coords) {
                Some(neighbor_key) => {
                    let passable = grid.tile_by_key(neighbor_key).map_or(false, |neighbor| {
                        !neighbor.airtight.contains(direction.opposite())
                            && neighbor.last_equalize_tick != tick
                    });
                    if !passable || zone.tiles.len() >= hard_limit {
                        continue;
                    }
                    if let Some(neighbor) = grid.tile_by_key_mut(neighbor_key) {
                        neighbor.last_equalize_tick = tick;
                    }
                    zone.parents.push(Some((head, direction)));
                    zone.tiles.push(neighbor_key);
                }
                None => zone.exits.push((head, direction)),
            }
        }
        head += 1;
    }
    Some(zone)
}

/// Settles a sealed zone at its average total in one pass. Net flow over
/// each spanning-tree edge is exactly the subtree's total surplus, so
/// surpluses travel rootward leaves-first and deficits back out
/// root-first; both orders guarantee a giving tile already holds what it
/// owes when its turn comes.
fn equalize(grid: &mut GridAtmosphere, zone: &Zone, ctx: &SimContext) {
    let count = zone.tiles.len();
    let mut totals = Vec::with_capacity(count);
    let mut lowest = f32::MAX;
    let mut highest = 0.0f32;
    let mut sum = 0.0f32;
    for &key in &zone.tiles {
        let total = grid
            .tile_by_key(key)
            .map_or(0.0, |tile| tile.mixture().total_moles());
        lowest = lowest.min(total);
        highest = highest.max(total);
        sum += total;
        totals.push(total);
    }
    if highest - lowest <= ctx.config.suspend_threshold() {
        return;
    }

    let average = sum / count as f32;
    let mut subtree: Vec<f32> = totals.iter().map(|total| total - average).collect();
    for i in (1..count).rev() {
        if let Some((parent, _)) = zone.parents[i] {
            subtree[parent] += subtree[i];
        }
    }

    for i in (1..count).rev() {
        let Some((parent, direction)) = zone.parents[i] else {
            continue;
        };
        if subtree[i] > 0.0 {
            transfer(
                grid,
                zone.tiles[i],
                zone.tiles[parent],
                subtree[i],
                direction.opposite(),
                ctx,
            );
        }
    }
    for i in 1..count {
        let Some((parent, direction)) = zone.parents[i] else {
            continue;
        };
        if subtree[i] < 0.0 {
            transfer(
                grid,
                zone.tiles[parent],
                zone.tiles[i],
                -subtree[i],
                direction,
                ctx,
            );
        }
    }

    // Totals now match but compositions may not; sharing finishes the mix.
    for &key in &zone.tiles {
        grid.activate(key);
    }
    grid.stats_mut().zones_equalized += 1;
}

/// Moves `moles` from one tile to another, reporting the shove on the
/// giving tile. Returns the amount actually moved.
fn transfer(
    grid: &mut GridAtmosphere,
    from: TileKey,
    to: TileKey,
    moles: f32,
    direction: Direction,
    ctx: &SimContext,
) -> f32 {
    if moles <= 0.0 {
        return 0.0;
    }
    let Some(mut source) = grid.take_tile(from) else {
        return 0.0;
    };
    let removed = source.mixture.remove(moles);
    let moved = removed.total_moles();
    let shove = moved * R_IDEAL_GAS * removed.temperature() / source.mixture.volume();
    if let Some(target) = grid.tile_by_key_mut(to) {
        target.mixture.merge(&removed, &ctx.gases);
    }
    grid.put_tile(from, source);
    if moved > 0.0 {
        grid.consider_pressure_difference(from, Some(direction), shove);
    }
    moved
}

/// Explosive depressurization: every tile drains toward its nearest
/// breach, farthest first, and the boundary tiles hand the accumulated
/// flow to the void.
fn depressurize(grid: &mut GridAtmosphere, zone: &Zone, ctx: &SimContext) {
    let count = zone.tiles.len();
    let zone_total: f32 = zone
        .tiles
        .iter()
        .map(|&key| {
            grid.tile_by_key(key)
                .map_or(0.0, |tile| tile.mixture().total_moles())
        })
        .sum();
    // A vented zone stays quiet until new gas reaches it.
    if zone_total <= ctx.config.move_threshold() {
        return;
    }

    let index_of: HashMap<TileKey, usize> = zone
        .tiles
        .iter()
        .enumerate()
        .map(|(index, &key)| (key, index))
        .collect();

    // Orient the zone toward space with a flood from the breaches inward.
    let mut toward: Vec<Option<(usize, Direction)>> = vec![None; count];
    let mut vent: Vec<Option<Direction>> = vec![None; count];
    let mut queued = vec![false; count];
    let mut order: Vec<usize> = Vec::with_capacity(count);
    for &(index, direction) in &zone.exits {
        if !queued[index] {
            queued[index] = true;
            vent[index] = Some(direction);
            order.push(index);
        }
    }
    let mut head = 0;
    while head < order.len() {
        let index = order[head];
        head += 1;
        let key = zone.tiles[index];
        let Some(tile) = grid.tile_by_key(key) else {
            continue;
        };
        let coords = tile.coords;
        let airtight = tile.airtight;
        for direction in Direction::ALL {
            if airtight.contains(direction) {
                continue;
            }
            let Some(neighbor_key) = grid.key_at(coords.offset(direction)) else {
                continue;
            };
            let Some(&neighbor_index) = index_of.get(&neighbor_key) else {
                continue;
            };
            if queued[neighbor_index] {
                continue;
            }
            let blocked = grid
                .tile_by_key(neighbor_key)
                .map_or(true, |neighbor| neighbor.airtight.contains(direction.opposite()));
            if blocked {
                continue;
            }
            queued[neighbor_index] = true;
            // The neighbor drains through this tile.
            toward[neighbor_index] = Some((index, direction.opposite()));
            order.push(neighbor_index);
        }
    }

    for &index in order.iter().rev() {
        let key = zone.tiles[index];
        match toward[index] {
            Some((next_index, direction)) => {
                let Some(mut source) = grid.take_tile(key) else {
                    continue;
                };
                let pressure = source.mixture.pressure();
                let outbound = source.mixture.remove_ratio(1.0);
                if let Some(target) = grid.tile_by_key_mut(zone.tiles[next_index]) {
                    target.mixture.merge(&outbound, &ctx.gases);
                }
                grid.put_tile(key, source);
                if pressure > 0.0 {
                    grid.consider_pressure_difference(key, Some(direction), pressure);
                }
            }
            None => {
                let pressure = match grid.tile_by_key_mut(key) {
                    Some(tile) => {
                        let pressure = tile.mixture.pressure();
                        tile.mixture.clear();
                        pressure
                    }
                    None => continue,
                };
                if pressure > 0.0 {
                    grid.consider_pressure_difference(key, vent[index], pressure);
                }
            }
        }
    }

    for &key in &zone.tiles {
        grid.activate(key);
    }
    grid.stats_mut().tiles_depressurized += count;
    log::debug!(
        "depressurized {} tiles through {} space faces",
        count,
        zone.exits.len()
    );
}
