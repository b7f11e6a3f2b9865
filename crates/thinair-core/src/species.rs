//! Gas species metadata — the data-driven half of gas identity.
//!
//! Species identity is the compile-time [`GasId`] enum so per-mixture
//! storage stays a fixed-size array in the hot loop. Everything tunable
//! about a species (heat capacity, molar mass, overlay visibility) comes
//! from a JSON table loaded at startup, along with named fill presets used
//! to initialize freshly created tiles.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::PrototypeError;
use crate::mixture::GasMixture;

/// Number of simulated gas species.
pub const GAS_COUNT: usize = 7;

/// Compile-time identity of a gas species. Array index into mixture storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GasId {
    Oxygen,
    Nitrogen,
    CarbonDioxide,
    Phoron,
    Tritium,
    WaterVapor,
    NitrousOxide,
}

impl GasId {
    pub const ALL: [GasId; GAS_COUNT] = [
        GasId::Oxygen,
        GasId::Nitrogen,
        GasId::CarbonDioxide,
        GasId::Phoron,
        GasId::Tritium,
        GasId::WaterVapor,
        GasId::NitrousOxide,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One species' metadata, as it appears in the JSON table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasSpecies {
    pub id: GasId,
    pub name: String,
    /// Specific heat, J/(mol·K).
    pub specific_heat: f32,
    /// Molar mass, g/mol.
    pub molar_mass: f32,
    /// Moles per cell before the gas shows on a visual overlay. `None` = invisible.
    #[serde(default)]
    pub moles_visible: Option<f32>,
}

/// A named initial mixture, referenced by tile profiles ("filled" tiles).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillPreset {
    pub name: String,
    /// Kelvin.
    pub temperature: f32,
    /// Moles per standard cell volume.
    pub moles: HashMap<GasId, f32>,
}

#[derive(Debug, Deserialize)]
struct SpeciesFile {
    species: Vec<GasSpecies>,
    #[serde(default)]
    presets: Vec<FillPreset>,
}

/// The loaded species table. Built once at startup, then read-only.
#[derive(Debug, Clone)]
pub struct GasTable {
    species: Vec<GasSpecies>,
    /// Specific heats by gas index, kept dense for the share/react hot loops.
    specific_heats: [f32; GAS_COUNT],
    presets: Vec<FillPreset>,
}

impl GasTable {
    /// Loads and validates a species table from JSON.
    ///
    /// Every [`GasId`] must appear exactly once; presets may only reference
    /// known species (guaranteed by typed keys) and are kept in file order.
    pub fn load(json: &str) -> Result<Self, PrototypeError> {
        let file: SpeciesFile = serde_json::from_str(json)?;

        let mut slots: Vec<Option<GasSpecies>> = vec![None; GAS_COUNT];
        for entry in file.species {
            let slot = &mut slots[entry.id.index()];
            if slot.is_some() {
                return Err(PrototypeError::DuplicateGas { name: entry.name });
            }
            *slot = Some(entry);
        }

        let mut species = Vec::with_capacity(GAS_COUNT);
        for (i, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(entry) => species.push(entry),
                None => {
                    return Err(PrototypeError::MissingSpecies {
                        name: format!("{:?}", GasId::ALL[i]),
                    })
                }
            }
        }

        let mut specific_heats = [0.0; GAS_COUNT];
        for (i, entry) in species.iter().enumerate() {
            specific_heats[i] = entry.specific_heat;
        }

        log::info!(
            "Loaded {} gas species, {} fill presets",
            species.len(),
            file.presets.len()
        );

        Ok(Self {
            species,
            specific_heats,
            presets: file.presets,
        })
    }

    /// The table bundled with the engine (`data/gas_species.json`).
    pub fn builtin() -> Result<Self, PrototypeError> {
        Self::load(include_str!("../../../data/gas_species.json"))
    }

    pub fn species(&self, gas: GasId) -> &GasSpecies {
        &self.species[gas.index()]
    }

    #[inline]
    pub fn specific_heat(&self, gas: GasId) -> f32 {
        self.specific_heats[gas.index()]
    }

    /// Dense per-index specific heats for hot loops.
    #[inline]
    pub fn specific_heats(&self) -> &[f32; GAS_COUNT] {
        &self.specific_heats
    }

    /// Heat capacity of a raw moles array, floored at [`MINIMUM_HEAT_CAPACITY`].
    #[inline]
    pub fn heat_capacity_of(&self, moles: &[f32; GAS_COUNT]) -> f32 {
        let mut sum = 0.0;
        for i in 0..GAS_COUNT {
            sum += moles[i] * self.specific_heats[i];
        }
        sum.max(MINIMUM_HEAT_CAPACITY)
    }

    /// Whether this much of a gas is enough to show on a visual overlay.
    pub fn is_visible(&self, gas: GasId, moles: f32) -> bool {
        match self.species[gas.index()].moles_visible {
            Some(threshold) => moles >= threshold,
            None => false,
        }
    }

    pub fn preset(&self, name: &str) -> Option<&FillPreset> {
        self.presets.iter().find(|p| p.name == name)
    }

    /// Builds a mixture from a named preset, scaled to `volume` liters.
    ///
    /// Preset moles are given per standard cell, so a double-volume tile
    /// gets double the gas at the same pressure.
    pub fn preset_mixture(&self, name: &str, volume: f32) -> Option<GasMixture> {
        let preset = self.preset(name)?;
        let mut mixture = GasMixture::new(volume);
        let scale = volume / CELL_VOLUME;
        for (&gas, &moles) in &preset.moles {
            mixture.set_moles(gas, moles * scale);
        }
        mixture.set_temperature(preset.temperature);
        Some(mixture)
    }
}
