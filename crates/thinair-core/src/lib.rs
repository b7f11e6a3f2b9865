//! ThinAir Core - Tile Atmospherics Simulation
//!
//! A cell-based gas simulation for grid ships: gases diffuse between open
//! tiles, burn when something ignites them, snap to equilibrium across
//! rooms, and vent violently when a breach opens a path to space.
//!
//! # Architecture
//!
//! Grids are entities in a `hecs` world carrying a [`grid::GridAtmosphere`]
//! component, driven by one [`system::AtmosphereSystem`]:
//! - **Tiles**: a gas mixture plus airtightness per cell, stored per grid
//! - **Active set**: only tiles near a pressure or temperature gradient cost time
//! - **Frame budget**: a tick that runs long parks mid-pass and resumes next frame
//!
//! # Example
//!
//! ```rust,no_run
//! use hecs::World;
//! use thinair_core::prelude::*;
//!
//! let mut world = World::new();
//! let mut atmos = AtmosphereSystem::builtin().unwrap();
//!
//! // A 3x3 room: a filled cell behind walls.
//! let mut grid = GridAtmosphere::new();
//! for x in 0..3 {
//!     for y in 0..3 {
//!         let profile = if x == 1 && y == 1 {
//!             TileProfile::open_filled("station_standard")
//!         } else {
//!             TileProfile::wall()
//!         };
//!         grid.set_tile(TileCoords::new(x, y), profile);
//!     }
//! }
//! world.spawn((grid,));
//!
//! // Run simulation
//! loop {
//!     atmos.update(&mut world, 1.0 / 60.0); // 60 FPS
//! }
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod grid;
pub mod mixture;
pub mod reactions;
pub mod species;
pub mod system;
pub mod tile;

mod equalize;
mod excited;
mod superconduct;

/// Commonly used types for convenient importing
pub mod prelude {
    pub use crate::config::AtmosConfig;
    pub use crate::context::SimContext;
    pub use crate::error::{AtmosError, PrototypeError};
    pub use crate::grid::{GridAtmosphere, GridStats, PressureEvent};
    pub use crate::mixture::GasMixture;
    pub use crate::species::{GasId, GasTable};
    pub use crate::system::{
        space_mixture, AtmosTelemetry, AtmosphereSystem, GridAtmosphereRef, Paused,
    };
    pub use crate::tile::{Direction, TileCoords, TileProfile};
}
