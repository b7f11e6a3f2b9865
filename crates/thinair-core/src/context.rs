//! The explicit simulation context: species, reactions, config.
//!
//! Everything the passes need to know that is not per-grid state travels in
//! this one struct, passed by reference. There are no global registries and
//! no change callbacks — replacing the config means handing the system a
//! new snapshot between ticks.

use crate::config::AtmosConfig;
use crate::error::PrototypeError;
use crate::reactions::ReactionTable;
use crate::species::GasTable;

/// Shared read-only state for a simulation run.
#[derive(Debug, Clone)]
pub struct SimContext {
    pub gases: GasTable,
    pub reactions: ReactionTable,
    pub config: AtmosConfig,
}

impl SimContext {
    pub fn new(gases: GasTable, reactions: ReactionTable, config: AtmosConfig) -> Self {
        Self {
            gases,
            reactions,
            config,
        }
    }

    /// Context with the bundled species/reaction tables and default config.
    pub fn builtin() -> Result<Self, PrototypeError> {
        Ok(Self::new(
            GasTable::builtin()?,
            ReactionTable::builtin()?,
            AtmosConfig::default(),
        ))
    }
}
