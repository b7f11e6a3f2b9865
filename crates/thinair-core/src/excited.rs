//! Excited groups — clusters of settled tiles processed together.
//!
//! When two adjacent active tiles stop moving meaningful amounts of gas,
//! they join a group instead of deactivating outright. The group's two
//! counters then drive the cheap endgame: a periodic *breakdown* averages
//! the members' mixtures to erase accumulated numerical drift, and after
//! enough idle cycles a *dismantle* puts every member to sleep at once.
//! Groups hold arena keys, never references; the grid validates keys
//! against live slots whenever a group is processed.

use serde::{Deserialize, Serialize};

use crate::tile::TileKey;

/// Arena index of an excited group within one grid.
pub type GroupId = usize;

/// A transient cluster of near-equilibrium tiles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcitedGroup {
    pub(crate) tiles: Vec<TileKey>,
    /// Ticks since the last drift-removing breakdown.
    pub(crate) breakdown_cooldown: u32,
    /// Ticks since the last renewed activity.
    pub(crate) dismantle_cooldown: u32,
}

impl ExcitedGroup {
    pub(crate) fn with_tiles(tiles: Vec<TileKey>) -> Self {
        Self {
            tiles,
            breakdown_cooldown: 0,
            dismantle_cooldown: 0,
        }
    }

    /// Fresh activity touched a member: restart both clocks.
    pub(crate) fn reset_cooldowns(&mut self) {
        self.breakdown_cooldown = 0;
        self.dismantle_cooldown = 0;
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tiles(&self) -> &[TileKey] {
        &self.tiles
    }
}
