//! Superconduction: heat crossing boundaries that gas cannot.
//!
//! Tiles hot enough to matter are staged by the active pass and kept on a
//! standing list while they stay hot. Each tick the pass conducts heat to
//! every neighbor whose boundary allows it: open faces use the open
//! coefficient, sealed faces the weaker of the two structures' (a wall
//! insulates fully, a window leaks). Space is skipped outright; there is
//! nothing out there to warm.

use std::time::Instant;

use crate::constants::{
    LAG_CHECK_INTERVAL, MINIMUM_TEMPERATURE_FOR_SUPERCONDUCTION, OPEN_HEAT_TRANSFER_COEFFICIENT,
};
use crate::context::SimContext;
use crate::grid::GridAtmosphere;
use crate::tile::{Direction, TileKey};

pub(crate) fn run(grid: &mut GridAtmosphere, ctx: &SimContext, deadline: Instant) -> bool {
    while let Some(key) = grid.advance_cursor() {
        superconduct_tile(grid, key, ctx);
        if grid.cursor_position() % LAG_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
            return false;
        }
    }
    true
}

fn superconduct_tile(grid: &mut GridAtmosphere, key: TileKey, ctx: &SimContext) {
    let Some(mut tile) = grid.take_tile(key) else {
        return;
    };
    if !tile.superconducting {
        // Stale entry; the slot turned over since it was staged.
        grid.put_tile(key, tile);
        return;
    }
    tile.superconducting = false;
    tile.mixture.archive();

    let mut exchanges = 0usize;
    let mut warmed: [Option<TileKey>; 4] = [None; 4];

    for (slot, direction) in Direction::ALL.into_iter().enumerate() {
        let Some(neighbor_key) = grid.key_at(tile.coords.offset(direction)) else {
            continue;
        };
        let Some(neighbor) = grid.tile_by_key_mut(neighbor_key) else {
            continue;
        };
        let open_pair = !tile.airtight.contains(direction)
            && !neighbor.airtight.contains(direction.opposite());
        let coefficient = if open_pair {
            OPEN_HEAT_TRANSFER_COEFFICIENT
        } else {
            tile.heat_transfer.min(neighbor.heat_transfer)
        };
        if coefficient <= 0.0 {
            continue;
        }
        neighbor.mixture.archive();
        let moved = tile
            .mixture
            .temperature_share(&mut neighbor.mixture, coefficient, &ctx.gases);
        if moved.abs() > 0.0 {
            exchanges += 1;
            warmed[slot] = Some(neighbor_key);
        }
    }

    let still_hot = tile.mixture.temperature() > MINIMUM_TEMPERATURE_FOR_SUPERCONDUCTION;
    grid.put_tile(key, tile);

    grid.stats_mut().superconduction_exchanges += exchanges;
    for neighbor_key in warmed.into_iter().flatten() {
        // A touched neighbor re-evaluates its own state (and may catch
        // something alight); if it crossed the bar it conducts next tick.
        grid.activate(neighbor_key);
        if grid
            .tile_by_key(neighbor_key)
            .map_or(false, |t| t.mixture().temperature() > MINIMUM_TEMPERATURE_FOR_SUPERCONDUCTION)
        {
            grid.stage_superconduct(neighbor_key);
        }
    }
    if still_hot {
        grid.stage_superconduct(key);
    }
}
