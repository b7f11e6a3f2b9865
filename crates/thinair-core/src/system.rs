//! The world-facing atmosphere system: fixed-rate ticking under a frame
//! budget, plus the query surface hosts talk to.
//!
//! One `AtmosphereSystem` drives every entity carrying a [`GridAtmosphere`]
//! component. Simulation runs at its own fixed rate, decoupled from the
//! caller's frame rate by an accumulator; within a frame the system hands
//! each grid a shared wall-clock deadline, and a grid that runs out of time
//! parks mid-tick and resumes next frame. A tick that cannot finish in one
//! frame simply spans several — no new tick starts until the old one ends,
//! so falling behind degrades smoothly instead of snowballing.
//!
//! Entities without a `GridAtmosphere` count as deep space: queries against
//! them resolve to the immutable space mixture rather than an error, so
//! callers can treat "off the station" as just another place.

use std::sync::OnceLock;
use std::time::Instant;

use hecs::{ComponentError, Entity, World};

use crate::config::AtmosConfig;
use crate::constants::MINIMUM_HEAT_CAPACITY;
use crate::context::SimContext;
use crate::error::{AtmosError, PrototypeError};
use crate::grid::{GridAtmosphere, ProcessOutcome};
use crate::mixture::GasMixture;
use crate::tile::TileCoords;

/// Marker component: a grid with this attached is skipped by the tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct Paused;

/// The one shared space mixture. Immutable: writes are discarded, reads
/// see hard vacuum at the cosmic background temperature.
pub fn space_mixture() -> &'static GasMixture {
    static SPACE: OnceLock<GasMixture> = OnceLock::new();
    SPACE.get_or_init(GasMixture::space)
}

/// A grid's atmosphere, or space when the entity has none.
pub enum GridAtmosphereRef<'a> {
    Simulated(hecs::Ref<'a, GridAtmosphere>),
    Space(&'static GasMixture),
}

impl<'a> GridAtmosphereRef<'a> {
    pub fn is_simulated(&self) -> bool {
        matches!(self, GridAtmosphereRef::Simulated(_))
    }

    /// The gas at `coords`; space everywhere the grid has no cell.
    pub fn mixture_at(&self, coords: TileCoords) -> &GasMixture {
        match self {
            GridAtmosphereRef::Simulated(grid) => {
                grid.tile_mixture(coords).unwrap_or_else(|| space_mixture())
            }
            GridAtmosphereRef::Space(mixture) => mixture,
        }
    }
}

/// Wall-clock counters for whoever watches the simulation's health.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtmosTelemetry {
    pub ticks_completed: u64,
    /// Full wall time of the last completed tick, including the frames it
    /// was parked on.
    pub last_tick_ms: f32,
    pub grids_processed: usize,
    pub budget_exhausted_frames: u64,
}

/// Drives atmosphere ticks across a `hecs` world.
pub struct AtmosphereSystem {
    ctx: SimContext,
    accumulator: f32,
    tick_in_progress: bool,
    current_run: Vec<Entity>,
    run_index: usize,
    tick_started: Instant,
    telemetry: AtmosTelemetry,
}

impl AtmosphereSystem {
    pub fn new(ctx: SimContext) -> Self {
        Self {
            ctx,
            accumulator: 0.0,
            tick_in_progress: false,
            current_run: Vec::new(),
            run_index: 0,
            tick_started: Instant::now(),
            telemetry: AtmosTelemetry::default(),
        }
    }

    /// A system over the built-in species and reaction prototypes.
    pub fn builtin() -> Result<Self, PrototypeError> {
        Ok(Self::new(SimContext::builtin()?))
    }

    pub fn context(&self) -> &SimContext {
        &self.ctx
    }

    pub fn config(&self) -> &AtmosConfig {
        &self.ctx.config
    }

    /// Swaps the tuning. Takes effect from the next pass a grid starts;
    /// passes already underway keep the values they latched.
    pub fn set_config(&mut self, config: AtmosConfig) {
        self.ctx.config = config;
    }

    pub fn telemetry(&self) -> AtmosTelemetry {
        self.telemetry
    }

    pub fn tick_in_progress(&self) -> bool {
        self.tick_in_progress
    }

    /// Advances the simulation clock by `dt` seconds and does up to one
    /// frame budget's worth of work. Call once per host frame.
    pub fn update(&mut self, world: &mut World, dt: f32) {
        self.accumulator += dt.max(0.0);
        if !self.tick_in_progress {
            let period = self.ctx.config.tick_period();
            if self.accumulator < period {
                return;
            }
            self.accumulator -= period;
            // A stall banks at most one extra tick; atmosphere running a
            // little slow beats a catch-up burst eating whole frames.
            self.accumulator = self.accumulator.min(period);
            self.begin_tick(world);
        }
        self.continue_tick(world);
    }

    /// Runs to the end of the current tick (starting one if needed) with
    /// no regard for the frame budget. Test and setup helper.
    pub fn run_full_tick(&mut self, world: &mut World) {
        if !self.tick_in_progress {
            self.accumulator = self.ctx.config.tick_period();
            self.update(world, 0.0);
        }
        while self.tick_in_progress {
            self.update(world, 0.0);
        }
    }

    fn begin_tick(&mut self, world: &mut World) {
        self.current_run.clear();
        for (entity, _) in world.query::<&GridAtmosphere>().iter() {
            if world.get::<&Paused>(entity).is_err() {
                self.current_run.push(entity);
            }
        }
        self.run_index = 0;
        self.tick_in_progress = true;
        self.tick_started = Instant::now();
    }

    fn continue_tick(&mut self, world: &mut World) {
        let deadline = Instant::now() + self.ctx.config.frame_budget();
        while self.run_index < self.current_run.len() {
            let entity = self.current_run[self.run_index];
            // Paused or despawned since the snapshot: leave it be. A grid
            // parked mid-tick resumes where it stopped once unpaused.
            if world.get::<&Paused>(entity).is_ok() {
                self.run_index += 1;
                continue;
            }
            let outcome = match world.get::<&mut GridAtmosphere>(entity) {
                Ok(mut grid) => grid.process(&self.ctx, deadline),
                Err(_) => {
                    self.run_index += 1;
                    continue;
                }
            };
            match outcome {
                ProcessOutcome::Finished => self.run_index += 1,
                ProcessOutcome::OutOfTime => {
                    self.telemetry.budget_exhausted_frames += 1;
                    return;
                }
            }
        }
        self.tick_in_progress = false;
        self.telemetry.ticks_completed += 1;
        self.telemetry.grids_processed = self.current_run.len();
        self.telemetry.last_tick_ms = self.tick_started.elapsed().as_secs_f32() * 1000.0;
    }

    // ── Query surface ──────────────────────────────────────────────────

    /// The entity's atmosphere, or space for anything that has none.
    pub fn get_grid_atmosphere<'a>(
        &self,
        world: &'a World,
        grid: Entity,
    ) -> GridAtmosphereRef<'a> {
        match world.get::<&GridAtmosphere>(grid) {
            Ok(reference) => GridAtmosphereRef::Simulated(reference),
            Err(_) => GridAtmosphereRef::Space(space_mixture()),
        }
    }

    /// The entity's atmosphere, erroring instead of falling back to space.
    pub fn simulated_grid_atmosphere<'a>(
        &self,
        world: &'a World,
        grid: Entity,
    ) -> Result<hecs::Ref<'a, GridAtmosphere>, AtmosError> {
        world
            .get::<&GridAtmosphere>(grid)
            .map_err(component_error)
    }

    pub fn simulated_grid_atmosphere_mut<'a>(
        &self,
        world: &'a World,
        grid: Entity,
    ) -> Result<hecs::RefMut<'a, GridAtmosphere>, AtmosError> {
        world
            .get::<&mut GridAtmosphere>(grid)
            .map_err(component_error)
    }

    /// A copy of the gas at `coords`. Space (missing grid or missing cell)
    /// yields the immutable space mixture.
    pub fn tile_mixture(&self, world: &World, grid: Entity, coords: TileCoords) -> GasMixture {
        match world.get::<&GridAtmosphere>(grid) {
            Ok(atmosphere) => atmosphere
                .tile_mixture(coords)
                .cloned()
                .unwrap_or_else(|| space_mixture().clone()),
            Err(_) => space_mixture().clone(),
        }
    }

    /// Heat capacity of the gas at `coords`; the floor for space.
    pub fn heat_capacity_at(&self, world: &World, grid: Entity, coords: TileCoords) -> f32 {
        match world.get::<&GridAtmosphere>(grid) {
            Ok(atmosphere) => atmosphere
                .tile_mixture(coords)
                .map_or(MINIMUM_HEAT_CAPACITY, |mixture| {
                    mixture.heat_capacity(&self.ctx.gases)
                }),
            Err(_) => MINIMUM_HEAT_CAPACITY,
        }
    }

    /// Adds `donor` into a cell. `Ok(false)` means the cell was space and
    /// the gas is gone.
    pub fn merge_into_tile(
        &self,
        world: &World,
        grid: Entity,
        coords: TileCoords,
        donor: &GasMixture,
    ) -> Result<bool, AtmosError> {
        let mut atmosphere = self.simulated_grid_atmosphere_mut(world, grid)?;
        Ok(atmosphere.merge_into_tile(coords, donor, &self.ctx.gases))
    }

    pub fn remove_from_tile(
        &self,
        world: &World,
        grid: Entity,
        coords: TileCoords,
        moles: f32,
    ) -> Result<GasMixture, AtmosError> {
        let mut atmosphere = self.simulated_grid_atmosphere_mut(world, grid)?;
        Ok(atmosphere.remove_from_tile(coords, moles))
    }

    pub fn remove_volume_from_tile(
        &self,
        world: &World,
        grid: Entity,
        coords: TileCoords,
        liters: f32,
    ) -> Result<GasMixture, AtmosError> {
        let mut atmosphere = self.simulated_grid_atmosphere_mut(world, grid)?;
        Ok(atmosphere.remove_volume_from_tile(coords, liters))
    }

    pub fn add_heat_to_tile(
        &self,
        world: &World,
        grid: Entity,
        coords: TileCoords,
        joules: f32,
    ) -> Result<bool, AtmosError> {
        let mut atmosphere = self.simulated_grid_atmosphere_mut(world, grid)?;
        Ok(atmosphere.add_heat_to_tile(coords, joules, &self.ctx.gases))
    }

    /// Total active tiles across every grid, paused ones included.
    pub fn active_tiles(&self, world: &World) -> usize {
        world
            .query::<&GridAtmosphere>()
            .iter()
            .map(|(_, atmosphere)| atmosphere.active_count())
            .sum()
    }
}

fn component_error(error: ComponentError) -> AtmosError {
    match error {
        ComponentError::NoSuchEntity => AtmosError::NoSuchGrid,
        ComponentError::MissingComponent(_) => AtmosError::NotSimulated,
    }
}
