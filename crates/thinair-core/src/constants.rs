//! Physical constants and tuning defaults for the atmospherics engine.
//!
//! The physical values (gas constant, temperature floor, mole epsilon) are
//! correctness boundaries and are only defined here. The tuning values are
//! the defaults behind [`crate::config::AtmosConfig`] — they bound how much
//! work a tick performs, not what the simulation converges to, and can be
//! overridden at runtime.

/// Ideal gas constant, kPa·L/(K·mol).
pub const R_IDEAL_GAS: f32 = 8.31;
/// One standard atmosphere, kPa.
pub const ONE_ATMOSPHERE: f32 = 101.325;
/// Cosmic microwave background temperature, Kelvin. Nothing gets colder.
pub const TCMB: f32 = 2.7;
/// 0°C in Kelvin.
pub const T0C: f32 = 273.15;
/// 20°C in Kelvin — station standard temperature.
pub const T20C: f32 = 293.15;

/// Volume of a standard grid cell, liters.
pub const CELL_VOLUME: f32 = 2500.0;
/// Moles in a standard cell at one atmosphere and station temperature.
pub const MOLES_CELLSTANDARD: f32 = ONE_ATMOSPHERE * CELL_VOLUME / (T20C * R_IDEAL_GAS);

/// Mole count below which a mixture is treated as empty.
pub const GAS_MIN_MOLES: f32 = 0.000_000_05;
/// Heat capacity floor guarding temperature math against division blowup.
pub const MINIMUM_HEAT_CAPACITY: f32 = 0.0003;

/// Default fraction of a standard cell below which a share is not worth moving.
pub const MINIMUM_AIR_RATIO_TO_MOVE: f32 = 0.001;
/// Default fraction of a standard cell below which two tiles count as settled.
pub const MINIMUM_AIR_RATIO_TO_SUSPEND: f32 = 0.1;
/// Default temperature delta below which two tiles count as settled, Kelvin.
pub const MINIMUM_TEMPERATURE_DELTA_TO_SUSPEND: f32 = 4.0;
/// Temperature delta below which heat exchange is skipped entirely, Kelvin.
pub const MINIMUM_TEMPERATURE_DELTA_TO_CONSIDER: f32 = 0.5;
/// Mixtures below this temperature never start superconducting.
pub const MINIMUM_TEMPERATURE_FOR_SUPERCONDUCTION: f32 = T20C + 10.0;

/// Heat conduction coefficient across an open tile boundary.
pub const OPEN_HEAT_TRANSFER_COEFFICIENT: f32 = 0.4;
/// Heat conduction coefficient through window-grade structure.
pub const WINDOW_HEAT_TRANSFER_COEFFICIENT: f32 = 0.1;
/// Heat conduction coefficient through solid wall. Walls are insulators.
pub const WALL_HEAT_TRANSFER_COEFFICIENT: f32 = 0.0;

/// Default ticks between excited-group drift-removing breakdowns.
pub const EXCITED_GROUP_BREAKDOWN_CYCLES: u32 = 4;
/// Default idle ticks before an excited group dismantles.
pub const EXCITED_GROUP_DISMANTLE_CYCLES: u32 = 16;

/// Default zone size above which batch equalization abandons a zone.
pub const ZUMOS_TILE_LIMIT: usize = 200;
/// Default zone size above which even depressurization gives up.
pub const ZUMOS_HARD_TILE_LIMIT: usize = 2000;

/// Tiles processed between wall-clock budget checks.
pub const LAG_CHECK_INTERVAL: usize = 30;
/// Default per-frame processing budget, milliseconds.
pub const MAX_PROCESS_TIME_MS: f32 = 3.0;
/// Default atmos ticks per second.
pub const ATMOS_TICK_RATE: f32 = 15.0;

/// Pressure difference below which no wind event is worth reporting, kPa.
pub const MINIMUM_PRESSURE_DELTA_TO_REPORT: f32 = 5.0;

/// Temperature at which phoron ignites in the presence of oxygen.
pub const PHORON_MINIMUM_BURN_TEMPERATURE: f32 = 100.0 + T0C;
/// Temperature of maximum phoron burn rate.
pub const PHORON_UPPER_TEMPERATURE: f32 = 1370.0 + T0C;
/// Oxygen-to-phoron ratio at which phoron burns at full rate.
pub const PHORON_OXYGEN_FULLBURN: f32 = 10.0;
/// Divisor converting the burn scale into the fraction of phoron consumed.
pub const PHORON_BURN_RATE_DELTA: f32 = 9.0;
/// Oxygen consumed per mole of phoron burnt, at minimum burn temperature.
pub const OXYGEN_BURN_RATE_BASE: f32 = 1.4;
/// Joules released per mole of burnt phoron.
pub const FIRE_PHORON_ENERGY_RELEASED: f32 = 3_000_000.0;

/// Joules released per mole of burnt tritium.
pub const FIRE_TRITIUM_ENERGY_RELEASED: f32 = 284_000.0;
/// Tritium burnt per call is the oxygen supply over this, when oxygen-starved.
pub const TRITIUM_BURN_OXY_FACTOR: f32 = 100.0;
/// Tritium burnt per call is the tritium supply over this, when oxygen-rich.
pub const TRITIUM_BURN_TRIT_FACTOR: f32 = 10.0;

/// Temperature above which nitrous oxide decomposes.
pub const N2O_DECOMPOSITION_TEMPERATURE: f32 = 1400.0;
/// Fraction of nitrous oxide decomposed per call above that temperature.
pub const N2O_DECOMPOSITION_RATE: f32 = 0.5;
/// Joules released per mole of decomposed nitrous oxide.
pub const N2O_DECOMPOSITION_ENERGY: f32 = 200_000.0;
