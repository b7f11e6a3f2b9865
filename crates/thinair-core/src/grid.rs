//! Per-grid atmosphere manager: the tile arena and the tick state machine.
//!
//! One `GridAtmosphere` component owns every simulated cell of one grid.
//! Tiles live in an integer-keyed arena (`Vec<Option<TileAtmosphere>>` plus
//! a free list) with a coordinate map on the side; neighbor resolution and
//! excited-group membership work in keys, never references.
//!
//! A tick is a fixed sequence of passes — revalidate, equalize, active
//! tiles, excited groups, superconduct — expressed as a resumable state
//! machine. Each pass snapshots its worklist on entry and walks it with a
//! cursor, checking the wall-clock deadline every few tiles; when time runs
//! out the grid parks between tiles and the next frame picks up exactly
//! where it stopped. No tile is ever half-updated and nothing in a snapshot
//! runs twice before the snapshot finishes.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::context::SimContext;
use crate::equalize;
use crate::excited::{ExcitedGroup, GroupId};
use crate::mixture::GasMixture;
use crate::species::GasTable;
use crate::superconduct;
use crate::tile::{Direction, TileAtmosphere, TileCoords, TileKey, TileProfile};

/// A directional shove for the host's physics, queued when pressure moves
/// hard enough to matter. Drained with [`GridAtmosphere::take_pressure_events`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureEvent {
    pub coords: TileCoords,
    /// Where the gas pushes. `None` when the push has no clear direction.
    pub direction: Option<Direction>,
    /// kPa equivalent of the shove.
    pub pressure_difference: f32,
}

// Queued events are dropped past this point if the host never drains them.
const PRESSURE_EVENT_CAP: usize = 4096;

/// Where a grid is within its current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ProcessingState {
    #[default]
    Idle,
    Revalidate,
    Equalize,
    ActiveTiles,
    ExcitedGroups,
    Superconduct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessOutcome {
    Finished,
    OutOfTime,
}

/// Work counters for the most recent tick of one grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridStats {
    pub shares: usize,
    pub reactions_fired: usize,
    pub zones_equalized: usize,
    pub tiles_depressurized: usize,
    pub superconduction_exchanges: usize,
}

/// The atmosphere manager for one grid. Attach as a `hecs` component; the
/// grid entity anchors its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridAtmosphere {
    cell_volume: f32,
    tiles: Vec<Option<TileAtmosphere>>,
    free_slots: Vec<TileKey>,
    // Serialized as sorted pairs; JSON maps want string keys.
    #[serde(with = "coord_map")]
    lookup: HashMap<TileCoords, TileKey>,
    /// Activation-ordered worklist; `TileAtmosphere::active` is the truth,
    /// stale entries are dropped when snapshotting and compacting.
    active: Vec<TileKey>,
    excited_groups: Vec<Option<ExcitedGroup>>,
    free_groups: Vec<GroupId>,
    /// Host-reported cell changes awaiting the next revalidate pass.
    dirty: Vec<(TileCoords, Option<TileProfile>)>,
    /// The batch being applied this tick. Serialized so a grid snapshotted
    /// mid-tick re-applies it on restore; revalidation is idempotent.
    current_dirty: Vec<(TileCoords, Option<TileProfile>)>,
    /// Tiles staged for the superconduction pass (this tick or the next).
    superconduct_run: Vec<TileKey>,
    tick: u64,
    // Mid-tick scratch. Not part of a snapshot: a restored grid simply
    // starts its next tick from the top.
    #[serde(skip)]
    state: ProcessingState,
    #[serde(skip)]
    current_run: Vec<TileKey>,
    #[serde(skip)]
    run_cursor: usize,
    #[serde(skip)]
    current_groups: Vec<GroupId>,
    #[serde(skip)]
    high_pressure: Vec<TileKey>,
    #[serde(skip)]
    pressure_events: Vec<PressureEvent>,
    #[serde(skip)]
    stats: GridStats,
}

impl GridAtmosphere {
    pub fn new() -> Self {
        Self::with_cell_volume(CELL_VOLUME)
    }

    pub fn with_cell_volume(cell_volume: f32) -> Self {
        Self {
            cell_volume: cell_volume.max(1.0),
            tiles: Vec::new(),
            free_slots: Vec::new(),
            lookup: HashMap::new(),
            active: Vec::new(),
            excited_groups: Vec::new(),
            free_groups: Vec::new(),
            dirty: Vec::new(),
            superconduct_run: Vec::new(),
            tick: 0,
            state: ProcessingState::Idle,
            current_run: Vec::new(),
            run_cursor: 0,
            current_dirty: Vec::new(),
            current_groups: Vec::new(),
            high_pressure: Vec::new(),
            pressure_events: Vec::new(),
            stats: GridStats::default(),
        }
    }

    // ── Host interface ─────────────────────────────────────────────────

    /// Declares what a cell is. Queued; applied at the start of the next
    /// tick's revalidate pass.
    pub fn set_tile(&mut self, coords: TileCoords, profile: TileProfile) {
        self.dirty.push((coords, Some(profile)));
    }

    /// Pokes a cell without changing it (a door toggled, a firelock
    /// dropped): the cell and its neighbors are re-activated next tick.
    pub fn invalidate_tile(&mut self, coords: TileCoords) {
        self.dirty.push((coords, None));
    }

    /// Queued pressure shoves since the last drain. Call once per frame.
    pub fn take_pressure_events(&mut self) -> Vec<PressureEvent> {
        std::mem::take(&mut self.pressure_events)
    }

    // ── Queries ────────────────────────────────────────────────────────

    pub fn tile(&self, coords: TileCoords) -> Option<&TileAtmosphere> {
        self.lookup
            .get(&coords)
            .and_then(|&key| self.tiles.get(key))
            .and_then(Option::as_ref)
    }

    /// Read-only view of a cell's gas; `None` means space.
    pub fn tile_mixture(&self, coords: TileCoords) -> Option<&GasMixture> {
        self.tile(coords).map(TileAtmosphere::mixture)
    }

    /// True when the cell has no simulation state (vacuum).
    pub fn is_space(&self, coords: TileCoords) -> bool {
        !self.lookup.contains_key(&coords)
    }

    pub fn tile_count(&self) -> usize {
        self.lookup.len()
    }

    pub fn active_count(&self) -> usize {
        self.tiles
            .iter()
            .flatten()
            .filter(|tile| tile.active)
            .count()
    }

    pub fn excited_group_count(&self) -> usize {
        self.excited_groups.iter().flatten().count()
    }

    pub fn tiles(&self) -> impl Iterator<Item = &TileAtmosphere> {
        self.tiles.iter().flatten()
    }

    pub fn cell_volume(&self) -> f32 {
        self.cell_volume
    }

    /// Counters from the most recently completed tick.
    pub fn stats(&self) -> GridStats {
        self.stats
    }

    // ── Device interface ───────────────────────────────────────────────
    // All mutation comes through here so the touched tile wakes up.

    /// Adds `donor` into the cell's mixture. Returns false when the cell is
    /// space, in which case the gas simply vanishes into the void.
    pub fn merge_into_tile(
        &mut self,
        coords: TileCoords,
        donor: &GasMixture,
        gases: &GasTable,
    ) -> bool {
        let Some(&key) = self.lookup.get(&coords) else {
            return false;
        };
        let mut donor = donor.clone();
        if donor.sanitize() {
            log::warn!("sanitized donor mixture merged into {:?}", coords);
        }
        let Some(tile) = self.tiles.get_mut(key).and_then(Option::as_mut) else {
            return false;
        };
        tile.mixture.merge(&donor, gases);
        self.activate(key);
        true
    }

    /// Takes up to `moles` from the cell. Space yields an empty mixture.
    pub fn remove_from_tile(&mut self, coords: TileCoords, moles: f32) -> GasMixture {
        let Some(&key) = self.lookup.get(&coords) else {
            return GasMixture::new(self.cell_volume);
        };
        let Some(tile) = self.tiles.get_mut(key).and_then(Option::as_mut) else {
            return GasMixture::new(self.cell_volume);
        };
        let removed = tile.mixture.remove(moles);
        self.activate(key);
        removed
    }

    /// Takes the gas occupying `liters` of the cell.
    pub fn remove_volume_from_tile(&mut self, coords: TileCoords, liters: f32) -> GasMixture {
        let Some(&key) = self.lookup.get(&coords) else {
            return GasMixture::new(self.cell_volume);
        };
        let Some(tile) = self.tiles.get_mut(key).and_then(Option::as_mut) else {
            return GasMixture::new(self.cell_volume);
        };
        let removed = tile.mixture.remove_volume(liters);
        self.activate(key);
        removed
    }

    /// Deposits thermal energy into the cell. Returns false for space.
    pub fn add_heat_to_tile(&mut self, coords: TileCoords, joules: f32, gases: &GasTable) -> bool {
        let Some(&key) = self.lookup.get(&coords) else {
            return false;
        };
        let Some(tile) = self.tiles.get_mut(key).and_then(Option::as_mut) else {
            return false;
        };
        tile.mixture.add_thermal_energy(joules, gases);
        self.activate(key);
        true
    }

    // ── Arena plumbing ─────────────────────────────────────────────────

    pub(crate) fn tile_by_key(&self, key: TileKey) -> Option<&TileAtmosphere> {
        self.tiles.get(key).and_then(Option::as_ref)
    }

    pub(crate) fn tile_by_key_mut(&mut self, key: TileKey) -> Option<&mut TileAtmosphere> {
        self.tiles.get_mut(key).and_then(Option::as_mut)
    }

    pub(crate) fn key_at(&self, coords: TileCoords) -> Option<TileKey> {
        self.lookup.get(&coords).copied()
    }

    // Lets a pass hold one tile while mutating another. Always pair with
    // `put_tile` on the same key.
    pub(crate) fn take_tile(&mut self, key: TileKey) -> Option<TileAtmosphere> {
        self.tiles.get_mut(key).and_then(Option::take)
    }

    pub(crate) fn put_tile(&mut self, key: TileKey, tile: TileAtmosphere) {
        debug_assert!(key < self.tiles.len(), "put_tile to a key never allocated");
        if let Some(slot) = self.tiles.get_mut(key) {
            *slot = Some(tile);
        }
    }

    fn allocate(
        &mut self,
        coords: TileCoords,
        airtight: crate::tile::DirFlags,
        heat_transfer: f32,
        mixture: GasMixture,
    ) -> TileKey {
        let tile = TileAtmosphere::new(coords, airtight, heat_transfer, mixture);
        let key = match self.free_slots.pop() {
            Some(key) => {
                self.tiles[key] = Some(tile);
                key
            }
            None => {
                self.tiles.push(Some(tile));
                self.tiles.len() - 1
            }
        };
        self.lookup.insert(coords, key);
        key
    }

    fn release(&mut self, key: TileKey) {
        let Some(slot) = self.tiles.get_mut(key) else {
            return;
        };
        let Some(tile) = slot.take() else {
            return;
        };
        self.lookup.remove(&tile.coords);
        self.free_slots.push(key);
        if let Some(group_id) = tile.excited_group {
            self.drop_group_member(group_id, key);
        }
    }

    fn drop_group_member(&mut self, group_id: GroupId, key: TileKey) {
        let Some(Some(group)) = self.excited_groups.get_mut(group_id) else {
            return;
        };
        group.tiles.retain(|&k| k != key);
        if group.len() < 2 {
            self.dissolve_group(group_id);
        }
    }

    // Disband a degenerate group, leaving its members awake.
    fn dissolve_group(&mut self, group_id: GroupId) {
        let Some(slot) = self.excited_groups.get_mut(group_id) else {
            return;
        };
        let Some(group) = slot.take() else {
            return;
        };
        for key in group.tiles {
            if let Some(tile) = self.tiles.get_mut(key).and_then(Option::as_mut) {
                tile.excited_group = None;
            }
        }
        self.free_groups.push(group_id);
    }

    fn allocate_group(&mut self, group: ExcitedGroup) -> GroupId {
        match self.free_groups.pop() {
            Some(id) => {
                self.excited_groups[id] = Some(group);
                id
            }
            None => {
                self.excited_groups.push(Some(group));
                self.excited_groups.len() - 1
            }
        }
    }

    // ── Activity bookkeeping ───────────────────────────────────────────

    pub(crate) fn activate(&mut self, key: TileKey) {
        let Some(tile) = self.tiles.get_mut(key).and_then(Option::as_mut) else {
            return;
        };
        let group = tile.excited_group;
        if !tile.active {
            tile.active = true;
            self.active.push(key);
        }
        // Renewed activity restarts the group's idle clocks.
        if let Some(group_id) = group {
            if let Some(Some(group)) = self.excited_groups.get_mut(group_id) {
                group.reset_cooldowns();
            }
        }
    }

    fn activate_at(&mut self, coords: TileCoords) {
        if let Some(&key) = self.lookup.get(&coords) {
            self.activate(key);
        }
    }

    fn activate_neighbors(&mut self, coords: TileCoords) {
        for direction in Direction::ALL {
            self.activate_at(coords.offset(direction));
        }
    }

    fn compact_active(&mut self) {
        let tiles = &self.tiles;
        let mut seen = HashSet::new();
        self.active.retain(|&key| {
            let live = tiles
                .get(key)
                .and_then(Option::as_ref)
                .map_or(false, |tile| tile.active);
            live && seen.insert(key)
        });
    }

    /// Largest pressure delta wins the tile's push direction for the tick.
    pub(crate) fn consider_pressure_difference(
        &mut self,
        key: TileKey,
        direction: Option<Direction>,
        difference: f32,
    ) {
        let Some(tile) = self.tiles.get_mut(key).and_then(Option::as_mut) else {
            return;
        };
        if difference > tile.pressure_difference {
            tile.pressure_difference = difference;
            tile.pressure_direction = direction;
            if difference > MINIMUM_PRESSURE_DELTA_TO_REPORT {
                self.high_pressure.push(key);
            }
        }
    }

    // ── Tick state machine ─────────────────────────────────────────────

    pub(crate) fn tick_number(&self) -> u64 {
        self.tick
    }

    /// Runs this grid's tick until finished or `deadline`. Safe to call
    /// again after `OutOfTime`; the grid resumes where it parked.
    pub(crate) fn process(&mut self, ctx: &SimContext, deadline: Instant) -> ProcessOutcome {
        loop {
            match self.state {
                ProcessingState::Idle => {
                    self.begin_tick();
                    self.state = ProcessingState::Revalidate;
                }
                ProcessingState::Revalidate => {
                    if !self.run_revalidate(ctx, deadline) {
                        return ProcessOutcome::OutOfTime;
                    }
                    self.snapshot_active();
                    self.state = if ctx.config.monstermos_equalization {
                        ProcessingState::Equalize
                    } else {
                        ProcessingState::ActiveTiles
                    };
                }
                ProcessingState::Equalize => {
                    if !equalize::run(self, ctx, deadline) {
                        return ProcessOutcome::OutOfTime;
                    }
                    self.snapshot_active();
                    self.state = ProcessingState::ActiveTiles;
                }
                ProcessingState::ActiveTiles => {
                    if !self.run_active_tiles(ctx, deadline) {
                        return ProcessOutcome::OutOfTime;
                    }
                    self.snapshot_groups();
                    self.state = ProcessingState::ExcitedGroups;
                }
                ProcessingState::ExcitedGroups => {
                    if !self.run_excited_groups(ctx, deadline) {
                        return ProcessOutcome::OutOfTime;
                    }
                    if ctx.config.superconduction {
                        self.snapshot_superconduct();
                        self.state = ProcessingState::Superconduct;
                    } else {
                        self.finish_tick(ctx);
                        return ProcessOutcome::Finished;
                    }
                }
                ProcessingState::Superconduct => {
                    if !superconduct::run(self, ctx, deadline) {
                        return ProcessOutcome::OutOfTime;
                    }
                    self.finish_tick(ctx);
                    return ProcessOutcome::Finished;
                }
            }
        }
    }

    fn begin_tick(&mut self) {
        self.tick += 1;
        self.stats = GridStats::default();
        // Leftover entries mean a snapshot caught the previous tick
        // mid-flight; re-applying them first is harmless.
        self.current_dirty.append(&mut self.dirty);
        self.run_cursor = 0;
    }

    fn snapshot_active(&mut self) {
        // Deduplicate: a tile deactivated and re-woken in one tick holds
        // two worklist entries until the end-of-tick compaction.
        let tiles = &self.tiles;
        let mut seen = HashSet::new();
        self.current_run = self
            .active
            .iter()
            .copied()
            .filter(|&key| {
                let live = tiles
                    .get(key)
                    .and_then(Option::as_ref)
                    .map_or(false, |tile| tile.active);
                live && seen.insert(key)
            })
            .collect();
        self.run_cursor = 0;
    }

    fn snapshot_groups(&mut self) {
        self.current_groups = (0..self.excited_groups.len())
            .filter(|&id| self.excited_groups[id].is_some())
            .collect();
        self.run_cursor = 0;
    }

    fn snapshot_superconduct(&mut self) {
        self.current_run = std::mem::take(&mut self.superconduct_run);
        self.run_cursor = 0;
    }

    fn finish_tick(&mut self, ctx: &SimContext) {
        let emit = ctx.config.space_wind;
        let mut seen = HashSet::new();
        for key in std::mem::take(&mut self.high_pressure) {
            if !seen.insert(key) {
                continue;
            }
            let Some(tile) = self.tiles.get_mut(key).and_then(Option::as_mut) else {
                continue;
            };
            if emit
                && tile.pressure_difference > MINIMUM_PRESSURE_DELTA_TO_REPORT
                && self.pressure_events.len() < PRESSURE_EVENT_CAP
            {
                self.pressure_events.push(PressureEvent {
                    coords: tile.coords,
                    direction: tile.pressure_direction,
                    pressure_difference: tile.pressure_difference,
                });
            }
            tile.pressure_difference = 0.0;
            tile.pressure_direction = None;
        }
        self.compact_active();
        log::trace!(
            "tick {}: {} shares, {} reactions, {} zones, {} vented, {} conductions, {} active",
            self.tick,
            self.stats.shares,
            self.stats.reactions_fired,
            self.stats.zones_equalized,
            self.stats.tiles_depressurized,
            self.stats.superconduction_exchanges,
            self.active.len(),
        );
        self.state = ProcessingState::Idle;
    }

    // ── Revalidate pass ────────────────────────────────────────────────

    fn run_revalidate(&mut self, ctx: &SimContext, deadline: Instant) -> bool {
        while self.run_cursor < self.current_dirty.len() {
            let (coords, profile) = self.current_dirty[self.run_cursor].clone();
            self.run_cursor += 1;
            self.revalidate_cell(coords, profile, ctx);
            if self.run_cursor % LAG_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
                return false;
            }
        }
        self.current_dirty.clear();
        true
    }

    fn revalidate_cell(&mut self, coords: TileCoords, profile: Option<TileProfile>, ctx: &SimContext) {
        match profile {
            None => {
                self.activate_at(coords);
                self.activate_neighbors(coords);
            }
            Some(TileProfile::Space) => {
                if let Some(&key) = self.lookup.get(&coords) {
                    self.release(key);
                    log::debug!("cell {:?} became space", coords);
                }
                self.activate_neighbors(coords);
            }
            Some(TileProfile::Simulated {
                airtight,
                heat_transfer,
                fill,
            }) => {
                let heat_transfer = if heat_transfer.is_finite() {
                    heat_transfer.max(0.0)
                } else {
                    0.0
                };
                match self.lookup.get(&coords).copied() {
                    Some(key) => {
                        // Structure changed over an existing cell; the gas
                        // underneath persists (a rebuilt wall traps it).
                        if let Some(tile) = self.tiles.get_mut(key).and_then(Option::as_mut) {
                            tile.airtight = airtight;
                            tile.heat_transfer = heat_transfer;
                        }
                    }
                    None => {
                        let mixture = match fill.as_deref() {
                            Some(name) => match ctx.gases.preset_mixture(name, self.cell_volume) {
                                Some(mix) => mix,
                                None => {
                                    log::warn!("unknown fill preset {:?} at {:?}", name, coords);
                                    GasMixture::new(self.cell_volume)
                                }
                            },
                            None => GasMixture::new(self.cell_volume),
                        };
                        self.allocate(coords, airtight, heat_transfer, mixture);
                    }
                }
                self.activate_at(coords);
                self.activate_neighbors(coords);
            }
        }
    }

    // ── Active-tile pass ───────────────────────────────────────────────

    fn run_active_tiles(&mut self, ctx: &SimContext, deadline: Instant) -> bool {
        while self.run_cursor < self.current_run.len() {
            let key = self.current_run[self.run_cursor];
            self.run_cursor += 1;
            self.process_tile(key, ctx);
            if self.run_cursor % LAG_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
                return false;
            }
        }
        true
    }

    fn process_tile(&mut self, key: TileKey, ctx: &SimContext) {
        // Take the tile out of the arena so neighbor slots can be borrowed.
        let Some(slot) = self.tiles.get_mut(key) else {
            return;
        };
        let Some(mut tile) = slot.take() else {
            return;
        };
        if !tile.active {
            self.tiles[key] = Some(tile);
            return;
        }

        tile.mixture.archive();

        // Open boundaries: a face is passable when neither side blocks it.
        let mut open: [(Direction, Option<TileKey>); 4] = [(Direction::North, None); 4];
        let mut open_count = 0;
        for direction in Direction::ALL {
            if tile.airtight.contains(direction) {
                continue;
            }
            let neighbor_coords = tile.coords.offset(direction);
            match self.lookup.get(&neighbor_coords).copied() {
                Some(neighbor_key) => {
                    let blocked = self
                        .tiles
                        .get(neighbor_key)
                        .and_then(Option::as_ref)
                        .map_or(true, |n| n.airtight.contains(direction.opposite()));
                    if !blocked {
                        open[open_count] = (direction, Some(neighbor_key));
                        open_count += 1;
                    }
                }
                None => {
                    open[open_count] = (direction, None);
                    open_count += 1;
                }
            }
        }

        let move_threshold = ctx.config.move_threshold();
        let suspend_threshold = ctx.config.suspend_threshold();
        let temp_suspend = ctx.config.minimum_temperature_delta_to_suspend;

        let mut max_moved = 0.0f32;
        let mut any_hot_delta = false;
        let mut wake: [Option<TileKey>; 4] = [None; 4];
        let mut join: [Option<TileKey>; 4] = [None; 4];
        let mut wind: [Option<(Direction, f32)>; 4] = [None; 4];

        for i in 0..open_count {
            let (direction, neighbor) = open[i];
            match neighbor {
                Some(neighbor_key) => {
                    let Some(neighbor_tile) =
                        self.tiles.get_mut(neighbor_key).and_then(Option::as_mut)
                    else {
                        continue;
                    };
                    neighbor_tile.mixture.archive();
                    let moved =
                        tile.mixture
                            .share(&mut neighbor_tile.mixture, open_count, &ctx.gases);
                    let temp_delta = (tile.mixture.temperature_archived()
                        - neighbor_tile.mixture.temperature_archived())
                    .abs();
                    let pressure_delta =
                        tile.mixture.pressure() - neighbor_tile.mixture.pressure();
                    let neighbor_active = neighbor_tile.active;

                    self.stats.shares += 1;
                    max_moved = max_moved.max(moved);
                    if temp_delta > temp_suspend {
                        any_hot_delta = true;
                    }

                    if moved > move_threshold || temp_delta > temp_suspend {
                        wake[i] = Some(neighbor_key);
                        if pressure_delta > 0.0 {
                            wind[i] = Some((direction, pressure_delta));
                        }
                    }
                    if neighbor_active && moved < suspend_threshold && temp_delta < temp_suspend {
                        join[i] = Some(neighbor_key);
                    }
                }
                None => {
                    // Space: an infinite sink. Loss happens regardless of
                    // any wind config; only the push event is optional.
                    let mut space = GasMixture::space();
                    let before = tile.mixture.pressure();
                    let moved = tile.mixture.share(&mut space, open_count, &ctx.gases);
                    self.stats.shares += 1;
                    max_moved = max_moved.max(moved);
                    if moved > 0.0 {
                        // Pushing against vacuum, so the whole pre-share
                        // pressure is the difference.
                        wind[i] = Some((direction, before));
                    }
                }
            }
        }

        let reacted = ctx.reactions.react(&mut tile.mixture, &ctx.gases);
        if reacted.any() {
            self.stats.reactions_fired += reacted.count() as usize;
        }

        // Space sweeps out the last traces; proportional shares alone would
        // chase them forever.
        let has_space_neighbor = open[..open_count].iter().any(|(_, n)| n.is_none());
        if has_space_neighbor {
            let total = tile.mixture.total_moles();
            if total > 0.0 && total < move_threshold {
                tile.mixture.clear();
            }
        }

        tile.last_share = max_moved;

        // Settled, isolated, not grouped: nothing left to do — sleep now.
        // Grouped tiles instead ride the group's dismantle clock.
        let settled = max_moved < move_threshold && !any_hot_delta && !reacted.any();
        let has_join = join.iter().any(Option::is_some);
        if settled && !has_join && tile.excited_group.is_none() {
            tile.active = false;
        }

        let stage_superconduct = ctx.config.superconduction
            && !tile.superconducting
            && tile.mixture.temperature() > MINIMUM_TEMPERATURE_FOR_SUPERCONDUCTION;
        if stage_superconduct {
            tile.superconducting = true;
        }

        self.tiles[key] = Some(tile);

        if stage_superconduct {
            self.superconduct_run.push(key);
        }
        for neighbor_key in wake.into_iter().flatten() {
            self.activate(neighbor_key);
        }
        for neighbor_key in join.into_iter().flatten() {
            self.excite_pair(key, neighbor_key);
        }
        for (direction, difference) in wind.into_iter().flatten() {
            self.consider_pressure_difference(key, Some(direction), difference);
        }
    }

    // ── Excited groups ─────────────────────────────────────────────────

    /// Joins two settled tiles (and any groups they already belong to)
    /// into one excited group.
    fn excite_pair(&mut self, a: TileKey, b: TileKey) {
        let group_a = self.tile_by_key(a).and_then(|t| t.excited_group);
        let group_b = self.tile_by_key(b).and_then(|t| t.excited_group);
        match (group_a, group_b) {
            (None, None) => {
                let id = self.allocate_group(ExcitedGroup::with_tiles(vec![a, b]));
                if let Some(tile) = self.tile_by_key_mut(a) {
                    tile.excited_group = Some(id);
                }
                if let Some(tile) = self.tile_by_key_mut(b) {
                    tile.excited_group = Some(id);
                }
            }
            (Some(id), None) => self.join_group(id, b),
            (None, Some(id)) => self.join_group(id, a),
            (Some(id_a), Some(id_b)) if id_a == id_b => {
                // Already settling together; nothing new happened.
            }
            (Some(id_a), Some(id_b)) => self.merge_groups(id_a, id_b),
        }
    }

    fn join_group(&mut self, group_id: GroupId, key: TileKey) {
        let Some(Some(group)) = self.excited_groups.get_mut(group_id) else {
            return;
        };
        if !group.tiles.contains(&key) {
            group.tiles.push(key);
        }
        group.reset_cooldowns();
        if let Some(tile) = self.tile_by_key_mut(key) {
            tile.excited_group = Some(group_id);
        }
    }

    fn merge_groups(&mut self, a: GroupId, b: GroupId) {
        let (into, from) = {
            let len_a = self.excited_groups[a].as_ref().map_or(0, ExcitedGroup::len);
            let len_b = self.excited_groups[b].as_ref().map_or(0, ExcitedGroup::len);
            if len_a >= len_b {
                (a, b)
            } else {
                (b, a)
            }
        };
        let Some(absorbed) = self.excited_groups.get_mut(from).and_then(Option::take) else {
            return;
        };
        self.free_groups.push(from);
        for key in &absorbed.tiles {
            if let Some(tile) = self.tile_by_key_mut(*key) {
                tile.excited_group = Some(into);
            }
        }
        if let Some(Some(group)) = self.excited_groups.get_mut(into) {
            group.tiles.extend(absorbed.tiles);
            group.reset_cooldowns();
        }
    }

    fn run_excited_groups(&mut self, ctx: &SimContext, deadline: Instant) -> bool {
        while self.run_cursor < self.current_groups.len() {
            let id = self.current_groups[self.run_cursor];
            self.run_cursor += 1;
            self.process_group(id, ctx);
            if self.run_cursor % LAG_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
                return false;
            }
        }
        true
    }

    fn process_group(&mut self, id: GroupId, ctx: &SimContext) {
        let breakdown;
        let dismantle;
        {
            let Some(Some(group)) = self.excited_groups.get_mut(id) else {
                return;
            };
            group.breakdown_cooldown = group.breakdown_cooldown.saturating_add(1);
            group.dismantle_cooldown = group.dismantle_cooldown.saturating_add(1);
            breakdown = group.breakdown_cooldown > ctx.config.excited_group_breakdown_cycles;
            dismantle = group.dismantle_cooldown > ctx.config.excited_group_dismantle_cycles;
        }
        if breakdown {
            self.breakdown_group(id, ctx);
        } else if dismantle {
            self.dismantle_group(id);
        }
    }

    fn live_members(&self, id: GroupId) -> Vec<TileKey> {
        match &self.excited_groups.get(id) {
            Some(Some(group)) => group
                .tiles
                .iter()
                .copied()
                .filter(|&key| self.tile_by_key(key).is_some())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn borders_space(&self, key: TileKey) -> bool {
        let Some(tile) = self.tile_by_key(key) else {
            return false;
        };
        Direction::ALL.iter().any(|&direction| {
            !tile.airtight.contains(direction)
                && !self.lookup.contains_key(&tile.coords.offset(direction))
        })
    }

    /// Averages the group's gas across its members, erasing the numerical
    /// drift pairwise sharing accumulates. With the all-consuming option on
    /// and space at the group's edge, the void takes everything instead.
    fn breakdown_group(&mut self, id: GroupId, ctx: &SimContext) {
        let members = self.live_members(id);
        if members.len() < 2 {
            self.dissolve_group(id);
            return;
        }

        let consumed_by_space = ctx.config.excited_groups_space_is_all_consuming
            && members.iter().any(|&key| self.borders_space(key));

        if consumed_by_space {
            for &key in &members {
                if let Some(tile) = self.tile_by_key_mut(key) {
                    tile.mixture.clear();
                    tile.mixture.set_temperature(TCMB);
                }
            }
            log::debug!("space consumed excited group {} ({} tiles)", id, members.len());
        } else {
            let mut combined = GasMixture::new(self.cell_volume);
            for &key in &members {
                if let Some(tile) = self.tile_by_key(key) {
                    combined.merge(tile.mixture(), &ctx.gases);
                }
            }
            combined.multiply(1.0 / members.len() as f32);
            for &key in &members {
                if let Some(tile) = self.tile_by_key_mut(key) {
                    tile.mixture.copy_from(&combined);
                }
            }
        }

        if let Some(Some(group)) = self.excited_groups.get_mut(id) {
            group.breakdown_cooldown = 0;
        }
    }

    /// Puts every member to sleep and deletes the group.
    fn dismantle_group(&mut self, id: GroupId) {
        let Some(slot) = self.excited_groups.get_mut(id) else {
            return;
        };
        let Some(group) = slot.take() else {
            return;
        };
        let size = group.len();
        for key in group.tiles {
            if let Some(tile) = self.tiles.get_mut(key).and_then(Option::as_mut) {
                tile.excited_group = None;
                tile.active = false;
            }
        }
        self.free_groups.push(id);
        log::debug!("dismantled excited group {} ({} tiles)", id, size);
    }

    // Pass bookkeeping shared with the equalize/superconduct modules.

    pub(crate) fn advance_cursor(&mut self) -> Option<TileKey> {
        let key = self.current_run.get(self.run_cursor).copied()?;
        self.run_cursor += 1;
        Some(key)
    }

    pub(crate) fn cursor_position(&self) -> usize {
        self.run_cursor
    }

    pub(crate) fn stats_mut(&mut self) -> &mut GridStats {
        &mut self.stats
    }

    pub(crate) fn stage_superconduct(&mut self, key: TileKey) {
        let staged = match self.tiles.get_mut(key).and_then(Option::as_mut) {
            Some(tile) if !tile.superconducting => {
                tile.superconducting = true;
                true
            }
            _ => false,
        };
        if staged {
            self.superconduct_run.push(key);
        }
    }
}

impl Default for GridAtmosphere {
    fn default() -> Self {
        Self::new()
    }
}

mod coord_map {
    use std::collections::HashMap;

    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::tile::{TileCoords, TileKey};

    pub fn serialize<S: Serializer>(
        map: &HashMap<TileCoords, TileKey>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut pairs: Vec<(TileCoords, TileKey)> = map.iter().map(|(c, k)| (*c, *k)).collect();
        pairs.sort();
        let mut seq = serializer.serialize_seq(Some(pairs.len()))?;
        for pair in &pairs {
            seq.serialize_element(pair)?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<TileCoords, TileKey>, D::Error> {
        let pairs = Vec::<(TileCoords, TileKey)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn ctx() -> SimContext {
        SimContext::builtin().unwrap()
    }

    fn run_ticks(grid: &mut GridAtmosphere, ctx: &SimContext, ticks: usize) {
        for _ in 0..ticks {
            assert_eq!(grid.process(ctx, far_deadline()), ProcessOutcome::Finished);
        }
    }

    #[test]
    fn test_set_tile_creates_simulated_cell() {
        let ctx = ctx();
        let mut grid = GridAtmosphere::new();
        let coords = TileCoords::new(0, 0);
        assert!(grid.is_space(coords));

        grid.set_tile(coords, TileProfile::open());
        run_ticks(&mut grid, &ctx, 1);

        assert!(!grid.is_space(coords));
        let mixture = grid.tile_mixture(coords).unwrap();
        assert!(mixture.is_empty());
    }

    /// Walls every neighbor of `coords` so nothing leaks into space.
    fn seal(grid: &mut GridAtmosphere, coords: TileCoords) {
        for direction in Direction::ALL {
            grid.set_tile(coords.offset(direction), TileProfile::wall());
        }
    }

    /// Walls the border of a 4x3 block, leaving (1,1) and (2,1) open.
    fn walled_pair(grid: &mut GridAtmosphere) -> (TileCoords, TileCoords) {
        let a = TileCoords::new(1, 1);
        let b = TileCoords::new(2, 1);
        for x in 0..4 {
            for y in 0..3 {
                let coords = TileCoords::new(x, y);
                if coords != a && coords != b {
                    grid.set_tile(coords, TileProfile::wall());
                }
            }
        }
        (a, b)
    }

    #[test]
    fn test_fill_preset_applied_on_creation() {
        let ctx = ctx();
        let mut grid = GridAtmosphere::new();
        let coords = TileCoords::new(1, 1);
        seal(&mut grid, coords);
        grid.set_tile(coords, TileProfile::open_filled("station_standard"));
        run_ticks(&mut grid, &ctx, 1);

        let mixture = grid.tile_mixture(coords).unwrap();
        assert!((mixture.pressure() - ONE_ATMOSPHERE).abs() < 1.0);
        assert!((mixture.temperature() - T20C).abs() < 0.1);
    }

    #[test]
    fn test_unknown_fill_preset_starts_empty() {
        let ctx = ctx();
        let mut grid = GridAtmosphere::new();
        let coords = TileCoords::new(1, 1);
        seal(&mut grid, coords);
        grid.set_tile(coords, TileProfile::open_filled("plaid_air"));
        run_ticks(&mut grid, &ctx, 1);
        assert!(grid.tile_mixture(coords).unwrap().is_empty());
    }

    #[test]
    fn test_two_tiles_converge() {
        let mut ctx = ctx();
        ctx.config.monstermos_equalization = false;
        let mut grid = GridAtmosphere::new();
        let (a, b) = walled_pair(&mut grid);
        grid.set_tile(a, TileProfile::open_filled("station_standard"));
        grid.set_tile(b, TileProfile::open());
        run_ticks(&mut grid, &ctx, 40);

        let pa = grid.tile_mixture(a).unwrap().pressure();
        let pb = grid.tile_mixture(b).unwrap().pressure();
        assert!(
            (pa - pb).abs() < 1.0,
            "tiles did not converge: {} vs {}",
            pa,
            pb
        );
        // Mass went nowhere.
        let total =
            grid.tile_mixture(a).unwrap().total_moles() + grid.tile_mixture(b).unwrap().total_moles();
        assert!((total - 103.9887).abs() < 0.01, "total was {}", total);
    }

    #[test]
    fn test_converged_tiles_form_group_then_dismantle() {
        let mut ctx = ctx();
        ctx.config.monstermos_equalization = false;
        let mut grid = GridAtmosphere::new();
        let (a, b) = walled_pair(&mut grid);
        grid.set_tile(a, TileProfile::open_filled("station_standard"));
        grid.set_tile(b, TileProfile::open());

        let mut saw_group = false;
        for _ in 0..80 {
            run_ticks(&mut grid, &ctx, 1);
            if grid.excited_group_count() > 0 {
                saw_group = true;
            }
        }
        assert!(saw_group, "converging tiles never formed a group");
        // Long settled: group dismantled and both tiles sleep.
        assert_eq!(grid.excited_group_count(), 0);
        assert_eq!(grid.active_count(), 0);
    }

    #[test]
    fn test_wall_blocks_diffusion() {
        let ctx = ctx();
        let mut grid = GridAtmosphere::new();
        let a = TileCoords::new(0, 0);
        let wall = TileCoords::new(1, 0);
        let b = TileCoords::new(2, 0);
        grid.set_tile(a, TileProfile::open_filled("station_standard"));
        grid.set_tile(wall, TileProfile::wall());
        grid.set_tile(b, TileProfile::open());
        run_ticks(&mut grid, &ctx, 30);

        assert!(grid.tile_mixture(b).unwrap().is_empty());
        assert!(grid.tile_mixture(a).unwrap().pressure() > ONE_ATMOSPHERE * 0.9);
    }

    #[test]
    fn test_space_neighbor_drains_tile() {
        let mut ctx = ctx();
        ctx.config.monstermos_equalization = false;
        let mut grid = GridAtmosphere::new();
        let coords = TileCoords::new(0, 0);
        grid.set_tile(coords, TileProfile::open_filled("station_standard"));
        run_ticks(&mut grid, &ctx, 1);

        let mut last = grid.tile_mixture(coords).unwrap().total_moles();
        for _ in 0..600 {
            run_ticks(&mut grid, &ctx, 1);
            let now = grid.tile_mixture(coords).unwrap().total_moles();
            assert!(now <= last + 0.0001, "moles went up: {} -> {}", last, now);
            assert!(now >= 0.0);
            last = now;
            if grid.tile_mixture(coords).unwrap().is_empty() {
                break;
            }
        }
        assert!(
            grid.tile_mixture(coords).unwrap().is_empty(),
            "tile still holds {} mol",
            last
        );
    }

    #[test]
    fn test_breach_tears_down_and_wakes_neighbors() {
        let mut ctx = ctx();
        ctx.config.monstermos_equalization = false;
        let mut grid = GridAtmosphere::new();
        let (a, b) = walled_pair(&mut grid);
        grid.set_tile(a, TileProfile::open_filled("station_standard"));
        grid.set_tile(b, TileProfile::open_filled("station_standard"));
        run_ticks(&mut grid, &ctx, 30);
        assert_eq!(grid.active_count(), 0, "sealed room should settle");

        // Hull breach: the far cell becomes void.
        grid.set_tile(b, TileProfile::Space);
        run_ticks(&mut grid, &ctx, 1);
        assert!(grid.is_space(b));
        assert!(grid.tile(a).unwrap().is_active(), "survivor should wake");

        run_ticks(&mut grid, &ctx, 200);
        assert!(grid.tile_mixture(a).unwrap().is_empty());
    }

    #[test]
    fn test_merge_into_tile_wakes_it() {
        let ctx = ctx();
        let mut grid = GridAtmosphere::new();
        let coords = TileCoords::new(0, 0);
        grid.set_tile(coords, TileProfile::open());
        run_ticks(&mut grid, &ctx, 3);
        assert_eq!(grid.active_count(), 0);

        let mut donor = GasMixture::new(1000.0);
        donor.set_moles(crate::species::GasId::Oxygen, 50.0);
        donor.set_temperature(T20C);
        assert!(grid.merge_into_tile(coords, &donor, &ctx.gases));

        assert_eq!(grid.active_count(), 1);
        assert!((grid.tile_mixture(coords).unwrap().total_moles() - 50.0).abs() < 0.001);
    }

    #[test]
    fn test_merge_into_space_discards() {
        let ctx = ctx();
        let mut grid = GridAtmosphere::new();
        let donor = GasMixture::new(1000.0);
        assert!(!grid.merge_into_tile(TileCoords::new(5, 5), &donor, &ctx.gases));
    }

    #[test]
    fn test_remove_from_tile_takes_gas() {
        let ctx = ctx();
        let mut grid = GridAtmosphere::new();
        let coords = TileCoords::new(1, 1);
        seal(&mut grid, coords);
        grid.set_tile(coords, TileProfile::open_filled("station_standard"));
        run_ticks(&mut grid, &ctx, 1);

        let before = grid.tile_mixture(coords).unwrap().total_moles();
        let removed = grid.remove_from_tile(coords, 20.0);
        assert!((removed.total_moles() - 20.0).abs() < 0.001);
        assert!(
            (grid.tile_mixture(coords).unwrap().total_moles() - (before - 20.0)).abs() < 0.001
        );
    }

    #[test]
    fn test_add_heat_to_tile() {
        let ctx = ctx();
        let mut grid = GridAtmosphere::new();
        let coords = TileCoords::new(1, 1);
        seal(&mut grid, coords);
        grid.set_tile(coords, TileProfile::open_filled("station_standard"));
        run_ticks(&mut grid, &ctx, 1);

        let before = grid.tile_mixture(coords).unwrap().temperature();
        assert!(grid.add_heat_to_tile(coords, 100_000.0, &ctx.gases));
        assert!(grid.tile_mixture(coords).unwrap().temperature() > before);
    }

    #[test]
    fn test_breakdown_averages_members() {
        let mut ctx = ctx();
        ctx.config.monstermos_equalization = false;
        ctx.config.excited_group_breakdown_cycles = 2;
        let mut grid = GridAtmosphere::new();
        let (a, b) = walled_pair(&mut grid);
        grid.set_tile(a, TileProfile::open_filled("station_standard"));
        grid.set_tile(b, TileProfile::open());
        run_ticks(&mut grid, &ctx, 60);

        // Breakdown snaps members onto one shared mixture, conserving mass.
        let pa = grid.tile_mixture(a).unwrap().pressure();
        let pb = grid.tile_mixture(b).unwrap().pressure();
        assert!((pa - pb).abs() < 0.01, "{} vs {}", pa, pb);
        let total =
            grid.tile_mixture(a).unwrap().total_moles() + grid.tile_mixture(b).unwrap().total_moles();
        assert!((total - 103.9887).abs() < 0.01, "total was {}", total);
    }

    #[test]
    fn test_all_consuming_breakdown_empties_near_space() {
        let mut ctx = ctx();
        ctx.config.excited_groups_space_is_all_consuming = true;
        ctx.config.monstermos_equalization = false;
        let mut grid = GridAtmosphere::new();
        // Identical exposed tiles settle against each other immediately,
        // group up, and the first breakdown hands everything to the void.
        // Eight ticks is far too early for plain sharing to finish the job.
        let a = TileCoords::new(0, 0);
        let b = TileCoords::new(1, 0);
        grid.set_tile(a, TileProfile::open_filled("station_standard"));
        grid.set_tile(b, TileProfile::open_filled("station_standard"));
        run_ticks(&mut grid, &ctx, 8);

        assert!(grid.tile_mixture(a).unwrap().is_empty());
        assert!(grid.tile_mixture(b).unwrap().is_empty());
    }

    #[test]
    fn test_sealed_room_stays_put() {
        let ctx = ctx();
        let mut grid = GridAtmosphere::new();
        // 1x2 room wrapped in walls.
        let a = TileCoords::new(1, 1);
        let b = TileCoords::new(2, 1);
        for x in 0..4 {
            for y in 0..3 {
                let coords = TileCoords::new(x, y);
                if coords == a || coords == b {
                    continue;
                }
                grid.set_tile(coords, TileProfile::wall());
            }
        }
        grid.set_tile(a, TileProfile::open_filled("station_standard"));
        grid.set_tile(b, TileProfile::open_filled("station_standard"));
        run_ticks(&mut grid, &ctx, 50);

        let total =
            grid.tile_mixture(a).unwrap().total_moles() + grid.tile_mixture(b).unwrap().total_moles();
        assert!((total - 2.0 * 103.9887).abs() < 0.01, "room leaked: {}", total);
        // Fully settled rooms stop costing anything.
        assert_eq!(grid.active_count(), 0);
    }

    #[test]
    fn test_budget_cutoff_resumes_deterministically() {
        let mut ctx_a = ctx();
        ctx_a.config.monstermos_equalization = false;
        let build = |grid: &mut GridAtmosphere| {
            for x in 0..12 {
                for y in 0..12 {
                    let profile = if (x + y) % 2 == 0 {
                        TileProfile::open_filled("station_standard")
                    } else {
                        TileProfile::open()
                    };
                    grid.set_tile(TileCoords::new(x, y), profile);
                }
            }
        };

        let mut fast = GridAtmosphere::new();
        build(&mut fast);
        run_ticks(&mut fast, &ctx_a, 3);

        let mut slow = GridAtmosphere::new();
        build(&mut slow);
        for _ in 0..3 {
            // An already-expired deadline forces the smallest work slices.
            let mut calls = 0;
            loop {
                calls += 1;
                match slow.process(&ctx_a, Instant::now() - Duration::from_millis(1)) {
                    ProcessOutcome::Finished => break,
                    ProcessOutcome::OutOfTime => assert!(calls < 10_000, "no forward progress"),
                }
            }
            assert!(calls > 1, "expected the tick to split across calls");
        }

        for tile in fast.tiles() {
            let other = slow.tile_mixture(tile.coords).unwrap();
            assert!(
                (tile.mixture().total_moles() - other.total_moles()).abs() < 0.0001,
                "divergence at {:?}",
                tile.coords
            );
        }
    }

    #[test]
    fn test_pressure_events_emitted_on_exposed_tile() {
        let mut ctx = ctx();
        ctx.config.space_wind = true;
        ctx.config.monstermos_equalization = false;
        let mut grid = GridAtmosphere::new();
        let coords = TileCoords::new(0, 0);
        grid.set_tile(coords, TileProfile::open_filled("station_standard"));
        run_ticks(&mut grid, &ctx, 2);

        let events = grid.take_pressure_events();
        assert!(!events.is_empty(), "breached tile should push");
        assert!(events.iter().any(|e| e.coords == coords));
        assert!(events[0].pressure_difference > 0.0);
        // Drained means drained.
        assert!(grid.take_pressure_events().is_empty());
    }

    #[test]
    fn test_no_pressure_events_without_space_wind() {
        let mut ctx = ctx();
        ctx.config.space_wind = false;
        let mut grid = GridAtmosphere::new();
        grid.set_tile(TileCoords::new(0, 0), TileProfile::open_filled("station_standard"));
        run_ticks(&mut grid, &ctx, 3);
        assert!(grid.take_pressure_events().is_empty());
    }

    #[test]
    fn test_invalidate_requeues_settled_tiles() {
        let mut ctx = ctx();
        ctx.config.monstermos_equalization = false;
        let mut grid = GridAtmosphere::new();
        let (a, b) = walled_pair(&mut grid);
        grid.set_tile(a, TileProfile::open_filled("station_standard"));
        grid.set_tile(b, TileProfile::open_filled("station_standard"));
        run_ticks(&mut grid, &ctx, 30);
        assert_eq!(grid.active_count(), 0);

        grid.invalidate_tile(a);
        run_ticks(&mut grid, &ctx, 1);
        assert!(grid.tile(a).unwrap().is_active());
        assert!(grid.tile(b).unwrap().is_active());

        // Nothing actually changed, so everything settles straight back.
        run_ticks(&mut grid, &ctx, 40);
        assert_eq!(grid.active_count(), 0);
    }
}
