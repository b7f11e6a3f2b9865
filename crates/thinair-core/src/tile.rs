//! Per-cell simulation state and the small value types around it.
//!
//! A grid cell is either *space* (no state at all — it resolves to the
//! vacuum sentinel) or *simulated* (one [`TileAtmosphere`] slot in the grid
//! arena). Walls and windows are simulated cells that happen to be airtight
//! on every face; the gas trapped behind them persists and still takes part
//! in superconduction through the structure's conduction coefficient.

use serde::{Deserialize, Serialize};

use crate::constants::*;
pub use crate::excited::GroupId;
use crate::mixture::GasMixture;

/// Arena index of a tile slot within one grid.
pub type TileKey = usize;

/// Grid-relative cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileCoords {
    pub x: i32,
    pub y: i32,
}

impl TileCoords {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The neighboring cell in `direction`.
    pub fn offset(self, direction: Direction) -> TileCoords {
        match direction {
            Direction::North => TileCoords::new(self.x, self.y + 1),
            Direction::South => TileCoords::new(self.x, self.y - 1),
            Direction::East => TileCoords::new(self.x + 1, self.y),
            Direction::West => TileCoords::new(self.x - 1, self.y),
        }
    }
}

/// The four cardinal neighbors of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        }
    }

    #[inline]
    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Bitset of directions, used for airtight face blocking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirFlags(u8);

impl DirFlags {
    pub const NONE: DirFlags = DirFlags(0);
    pub const ALL: DirFlags = DirFlags(0b1111);

    #[inline]
    pub fn contains(self, direction: Direction) -> bool {
        self.0 & direction.bit() != 0
    }

    pub fn with(self, direction: Direction) -> DirFlags {
        DirFlags(self.0 | direction.bit())
    }

    pub fn without(self, direction: Direction) -> DirFlags {
        DirFlags(self.0 & !direction.bit())
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// What the host declares a grid cell to be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TileProfile {
    /// Exterior vacuum. Any existing tile slot is torn down.
    Space,
    /// A cell the engine simulates.
    Simulated {
        /// Faces gas cannot cross.
        airtight: DirFlags,
        /// Structure conduction coefficient for superconduction.
        heat_transfer: f32,
        /// Named fill preset for the initial mixture; `None` starts empty.
        /// Only applied when the cell is newly simulated.
        fill: Option<String>,
    },
}

impl TileProfile {
    /// Plain open floor, starting empty.
    pub fn open() -> Self {
        TileProfile::Simulated {
            airtight: DirFlags::NONE,
            heat_transfer: OPEN_HEAT_TRANSFER_COEFFICIENT,
            fill: None,
        }
    }

    /// Open floor filled from a named preset on creation.
    pub fn open_filled(preset: &str) -> Self {
        TileProfile::Simulated {
            airtight: DirFlags::NONE,
            heat_transfer: OPEN_HEAT_TRANSFER_COEFFICIENT,
            fill: Some(preset.to_string()),
        }
    }

    /// Solid wall: airtight on every face, thermally insulating.
    pub fn wall() -> Self {
        TileProfile::Simulated {
            airtight: DirFlags::ALL,
            heat_transfer: WALL_HEAT_TRANSFER_COEFFICIENT,
            fill: None,
        }
    }

    /// Window wall: airtight but conducts heat.
    pub fn window() -> Self {
        TileProfile::Simulated {
            airtight: DirFlags::ALL,
            heat_transfer: WINDOW_HEAT_TRANSFER_COEFFICIENT,
            fill: None,
        }
    }
}

/// One simulated cell: its gas plus processing bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileAtmosphere {
    pub coords: TileCoords,
    pub(crate) mixture: GasMixture,
    pub(crate) airtight: DirFlags,
    pub(crate) heat_transfer: f32,
    pub(crate) active: bool,
    pub(crate) excited_group: Option<GroupId>,
    /// Moles moved the last time this tile was processed.
    pub(crate) last_share: f32,
    /// Largest pressure delta seen this tick and where it pushes. Cleared
    /// when the tick's events drain, so not part of a snapshot.
    #[serde(skip)]
    pub(crate) pressure_difference: f32,
    #[serde(skip)]
    pub(crate) pressure_direction: Option<Direction>,
    /// On the superconduction worklist for the next pass.
    pub(crate) superconducting: bool,
    /// Tick stamp of the last equalization visit.
    pub(crate) last_equalize_tick: u64,
}

impl TileAtmosphere {
    pub(crate) fn new(
        coords: TileCoords,
        airtight: DirFlags,
        heat_transfer: f32,
        mixture: GasMixture,
    ) -> Self {
        Self {
            coords,
            mixture,
            airtight,
            heat_transfer,
            active: false,
            excited_group: None,
            last_share: 0.0,
            pressure_difference: 0.0,
            pressure_direction: None,
            superconducting: false,
            last_equalize_tick: 0,
        }
    }

    /// Read-only view of this tile's gas. All mutation goes through the
    /// grid API so activity bookkeeping stays correct.
    pub fn mixture(&self) -> &GasMixture {
        &self.mixture
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn airtight(&self) -> DirFlags {
        self.airtight
    }

    pub fn excited_group(&self) -> Option<GroupId> {
        self.excited_group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_and_opposite_round_trip() {
        let origin = TileCoords::new(3, -2);
        for direction in Direction::ALL {
            let there = origin.offset(direction);
            assert_ne!(there, origin);
            assert_eq!(there.offset(direction.opposite()), origin);
        }
    }

    #[test]
    fn test_dir_flags_set_operations() {
        let flags = DirFlags::NONE.with(Direction::North).with(Direction::East);
        assert!(flags.contains(Direction::North));
        assert!(flags.contains(Direction::East));
        assert!(!flags.contains(Direction::South));

        let cleared = flags.without(Direction::North);
        assert!(!cleared.contains(Direction::North));
        assert!(cleared.contains(Direction::East));

        assert!(DirFlags::NONE.is_empty());
        for direction in Direction::ALL {
            assert!(DirFlags::ALL.contains(direction));
        }
    }

    #[test]
    fn test_profile_constructors() {
        assert!(matches!(
            TileProfile::open(),
            TileProfile::Simulated { airtight, .. } if airtight.is_empty()
        ));
        assert!(matches!(
            TileProfile::wall(),
            TileProfile::Simulated { airtight, heat_transfer, .. }
                if airtight == DirFlags::ALL && heat_transfer == WALL_HEAT_TRANSFER_COEFFICIENT
        ));
        assert!(matches!(
            TileProfile::window(),
            TileProfile::Simulated { heat_transfer, .. }
                if heat_transfer == WINDOW_HEAT_TRANSFER_COEFFICIENT
        ));
    }
}
