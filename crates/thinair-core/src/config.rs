//! Runtime configuration — the atmospherics cvar snapshot.
//!
//! Hosts deserialize this from whatever config source they use; missing
//! fields take the documented defaults and unknown fields are ignored, so a
//! partial `{"superconduction": true}` is a valid config. The engine never
//! reads config ambiently: a snapshot lives in the simulation context and
//! changes arrive through [`crate::system::AtmosphereSystem::set_config`].

use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Tunable atmospherics behavior. All values bound work per tick, not what
/// the simulation converges to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtmosConfig {
    /// Emit directional pressure events for physics to consume.
    pub space_wind: bool,
    /// Use the batched zone equalizer instead of pairwise-only diffusion.
    pub monstermos_equalization: bool,
    /// Conduct heat through solid structure.
    pub superconduction: bool,
    /// Excited-group breakdown deletes all gas when a member borders space.
    pub excited_groups_space_is_all_consuming: bool,
    /// Wall-clock processing budget per frame, milliseconds.
    pub atmos_max_process_time: f32,
    /// Atmos ticks per second.
    pub atmos_tick_rate: f32,
    /// Zone size above which batch equalization abandons a zone.
    pub zumos_tile_limit: usize,
    /// Zone size above which even depressurization gives up.
    pub zumos_hard_tile_limit: usize,
    /// Fraction of a standard cell below which a share is not worth moving.
    pub minimum_air_ratio_to_move: f32,
    /// Fraction of a standard cell below which two tiles count as settled.
    pub minimum_air_ratio_to_suspend: f32,
    /// Temperature delta below which two tiles count as settled, Kelvin.
    pub minimum_temperature_delta_to_suspend: f32,
    /// Ticks between excited-group drift-removing breakdowns.
    pub excited_group_breakdown_cycles: u32,
    /// Idle ticks before an excited group dismantles.
    pub excited_group_dismantle_cycles: u32,
}

impl Default for AtmosConfig {
    fn default() -> Self {
        Self {
            space_wind: false,
            monstermos_equalization: true,
            superconduction: false,
            excited_groups_space_is_all_consuming: false,
            atmos_max_process_time: MAX_PROCESS_TIME_MS,
            atmos_tick_rate: ATMOS_TICK_RATE,
            zumos_tile_limit: ZUMOS_TILE_LIMIT,
            zumos_hard_tile_limit: ZUMOS_HARD_TILE_LIMIT,
            minimum_air_ratio_to_move: MINIMUM_AIR_RATIO_TO_MOVE,
            minimum_air_ratio_to_suspend: MINIMUM_AIR_RATIO_TO_SUSPEND,
            minimum_temperature_delta_to_suspend: MINIMUM_TEMPERATURE_DELTA_TO_SUSPEND,
            excited_group_breakdown_cycles: EXCITED_GROUP_BREAKDOWN_CYCLES,
            excited_group_dismantle_cycles: EXCITED_GROUP_DISMANTLE_CYCLES,
        }
    }
}

impl AtmosConfig {
    /// Moles below which a share is not worth moving.
    #[inline]
    pub fn move_threshold(&self) -> f32 {
        self.minimum_air_ratio_to_move * MOLES_CELLSTANDARD
    }

    /// Moles below which a tile pair counts as settled.
    #[inline]
    pub fn suspend_threshold(&self) -> f32 {
        self.minimum_air_ratio_to_suspend * MOLES_CELLSTANDARD
    }

    /// The per-frame budget as a duration.
    pub fn frame_budget(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f32((self.atmos_max_process_time.max(0.1)) / 1000.0)
    }

    /// Seconds between atmos ticks.
    pub fn tick_period(&self) -> f32 {
        1.0 / self.atmos_tick_rate.max(0.001)
    }
}
