//! Prioritized, data-driven gas reactions.
//!
//! Rules live in a JSON table: trigger conditions (minimum temperature,
//! minimum moles per reactant) plus a tagged effect variant. The table is
//! sorted once at load by descending priority with the rule id as a stable
//! tie-break, and `react` walks it top to bottom in a single flat match —
//! firing order is table order, never hash order, so a given mixture always
//! reacts the same way.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::PrototypeError;
use crate::mixture::GasMixture;
use crate::species::{GasId, GasTable};

/// What a rule does when it fires. One variant per effect the engine knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReactionEffect {
    PhoronFire,
    TritiumFire,
    NitrousDecomposition,
}

/// One rule as it appears in the JSON table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionPrototype {
    pub id: String,
    pub priority: i32,
    /// Kelvin. Rules never fire below this.
    #[serde(default)]
    pub minimum_temperature: f32,
    /// Minimum moles of each reactant that must be present.
    #[serde(default)]
    pub minimum_requirements: HashMap<GasId, f32>,
    pub effect: ReactionEffect,
}

// Compiled rule: requirements flattened and ordered for the hot loop.
#[derive(Debug, Clone)]
struct Reaction {
    id: String,
    priority: i32,
    minimum_temperature: f32,
    requirements: Vec<(GasId, f32)>,
    effect: ReactionEffect,
}

/// Which table entries fired during one `react` call, as a bitmask in table
/// order. The table is capped at 32 rules to keep this a single register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReactResult {
    mask: u32,
}

impl ReactResult {
    pub fn any(self) -> bool {
        self.mask != 0
    }

    pub fn count(self) -> u32 {
        self.mask.count_ones()
    }

    /// Whether the rule at `index` (table order) fired.
    pub fn did_fire(self, index: usize) -> bool {
        index < 32 && self.mask & (1 << index) != 0
    }

    pub fn mask(self) -> u32 {
        self.mask
    }
}

/// The loaded, sorted reaction table.
#[derive(Debug, Clone)]
pub struct ReactionTable {
    reactions: Vec<Reaction>,
}

impl ReactionTable {
    /// Loads and validates a reaction table from JSON.
    pub fn load(json: &str) -> Result<Self, PrototypeError> {
        let prototypes: Vec<ReactionPrototype> = serde_json::from_str(json)?;

        let mut reactions: Vec<Reaction> = Vec::with_capacity(prototypes.len());
        for proto in prototypes {
            if reactions.iter().any(|r| r.id == proto.id) {
                return Err(PrototypeError::BadReaction {
                    id: proto.id,
                    reason: "duplicate id".into(),
                });
            }
            if !proto.minimum_temperature.is_finite() || proto.minimum_temperature < 0.0 {
                return Err(PrototypeError::BadReaction {
                    id: proto.id,
                    reason: format!("bad minimum temperature {}", proto.minimum_temperature),
                });
            }
            if let Some((gas, amount)) = proto
                .minimum_requirements
                .iter()
                .find(|(_, &amount)| !amount.is_finite() || amount < 0.0)
            {
                return Err(PrototypeError::BadReaction {
                    id: proto.id,
                    reason: format!("bad requirement {:?}: {}", gas, amount),
                });
            }
            let mut requirements: Vec<(GasId, f32)> =
                proto.minimum_requirements.into_iter().collect();
            requirements.sort_by_key(|(gas, _)| gas.index());
            reactions.push(Reaction {
                id: proto.id,
                priority: proto.priority,
                minimum_temperature: proto.minimum_temperature,
                requirements,
                effect: proto.effect,
            });
        }

        if reactions.len() > 32 {
            return Err(PrototypeError::BadReaction {
                id: reactions[32].id.clone(),
                reason: "table limited to 32 reactions".into(),
            });
        }

        reactions.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

        log::info!("Loaded {} gas reactions", reactions.len());
        Ok(Self { reactions })
    }

    /// The table bundled with the engine (`data/gas_reactions.json`).
    pub fn builtin() -> Result<Self, PrototypeError> {
        Self::load(include_str!("../../../data/gas_reactions.json"))
    }

    pub fn len(&self) -> usize {
        self.reactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reactions.is_empty()
    }

    /// Rule ids in evaluation order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.reactions.iter().map(|r| r.id.as_str())
    }

    /// Runs every triggered rule in table order against `mix`, mutating it
    /// in place. Returns which rules fired.
    pub fn react(&self, mix: &mut GasMixture, gases: &GasTable) -> ReactResult {
        let mut result = ReactResult::default();
        if mix.is_empty() {
            return result;
        }
        for (index, reaction) in self.reactions.iter().enumerate() {
            if mix.temperature() < reaction.minimum_temperature {
                continue;
            }
            if reaction
                .requirements
                .iter()
                .any(|&(gas, minimum)| mix.moles(gas) < minimum)
            {
                continue;
            }
            let fired = match reaction.effect {
                ReactionEffect::PhoronFire => phoron_fire(mix, gases),
                ReactionEffect::TritiumFire => tritium_fire(mix, gases),
                ReactionEffect::NitrousDecomposition => nitrous_decomposition(mix, gases),
            };
            if fired {
                result.mask |= 1 << index;
            }
        }
        result
    }
}

// Each effect rebalances temperature through total thermal energy: capture
// energy before the mole changes, then divide energy + released heat by the
// new heat capacity. That keeps energy exact when species with different
// specific heats transmute.

fn phoron_fire(mix: &mut GasMixture, gases: &GasTable) -> bool {
    let temperature_scale = ((mix.temperature() - PHORON_MINIMUM_BURN_TEMPERATURE)
        / (PHORON_UPPER_TEMPERATURE - PHORON_MINIMUM_BURN_TEMPERATURE))
        .clamp(0.0, 1.0);
    if temperature_scale <= 0.0 {
        return false;
    }
    let phoron = mix.moles(GasId::Phoron);
    let oxygen = mix.moles(GasId::Oxygen);
    let oxygen_burn_rate = OXYGEN_BURN_RATE_BASE - temperature_scale;

    let mut burn_rate = if oxygen > phoron * PHORON_OXYGEN_FULLBURN {
        phoron * temperature_scale / PHORON_BURN_RATE_DELTA
    } else {
        temperature_scale * (oxygen / PHORON_OXYGEN_FULLBURN) / PHORON_BURN_RATE_DELTA
    };
    if burn_rate < GAS_MIN_MOLES {
        return false;
    }
    burn_rate = burn_rate.min(phoron).min(oxygen / oxygen_burn_rate);

    let energy_before = mix.thermal_energy(gases);
    mix.adjust_moles(GasId::Phoron, -burn_rate);
    mix.adjust_moles(GasId::Oxygen, -(burn_rate * oxygen_burn_rate));
    mix.adjust_moles(GasId::CarbonDioxide, burn_rate);

    let released = FIRE_PHORON_ENERGY_RELEASED * burn_rate;
    let new_capacity = mix.heat_capacity(gases);
    if new_capacity > MINIMUM_HEAT_CAPACITY {
        mix.set_temperature((energy_before + released) / new_capacity);
    }
    true
}

fn tritium_fire(mix: &mut GasMixture, gases: &GasTable) -> bool {
    let tritium = mix.moles(GasId::Tritium);
    let oxygen = mix.moles(GasId::Oxygen);

    let burned = if oxygen < tritium {
        oxygen / TRITIUM_BURN_OXY_FACTOR
    } else {
        tritium / TRITIUM_BURN_TRIT_FACTOR
    };
    if burned < GAS_MIN_MOLES {
        return false;
    }

    let energy_before = mix.thermal_energy(gases);
    mix.adjust_moles(GasId::Tritium, -burned);
    mix.adjust_moles(GasId::Oxygen, -(burned / 2.0));
    mix.adjust_moles(GasId::WaterVapor, burned);

    let released = FIRE_TRITIUM_ENERGY_RELEASED * burned;
    let new_capacity = mix.heat_capacity(gases);
    if new_capacity > MINIMUM_HEAT_CAPACITY {
        mix.set_temperature((energy_before + released) / new_capacity);
    }
    true
}

fn nitrous_decomposition(mix: &mut GasMixture, gases: &GasTable) -> bool {
    let decomposed = mix.moles(GasId::NitrousOxide) * N2O_DECOMPOSITION_RATE;
    if decomposed < GAS_MIN_MOLES {
        return false;
    }

    let energy_before = mix.thermal_energy(gases);
    mix.adjust_moles(GasId::NitrousOxide, -decomposed);
    mix.adjust_moles(GasId::Nitrogen, decomposed);
    mix.adjust_moles(GasId::Oxygen, decomposed / 2.0);

    let released = N2O_DECOMPOSITION_ENERGY * decomposed;
    let new_capacity = mix.heat_capacity(gases);
    if new_capacity > MINIMUM_HEAT_CAPACITY {
        mix.set_temperature((energy_before + released) / new_capacity);
    }
    true
}
