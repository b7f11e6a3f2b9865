//! Error types for prototype loading and the grid query API.
//!
//! Data-driven and input-driven conditions never produce errors — bad
//! numbers are clamped and logged instead. Errors exist only at the two
//! places a caller can genuinely misuse the engine: loading malformed
//! prototype tables, and asking a "simulated only" question about a grid
//! that is not simulated.

/// Errors raised while loading gas species or reaction tables.
#[derive(Debug)]
pub enum PrototypeError {
    Json(serde_json::Error),
    DuplicateGas { name: String },
    MissingSpecies { name: String },
    BadReaction { id: String, reason: String },
}

impl From<serde_json::Error> for PrototypeError {
    fn from(e: serde_json::Error) -> Self {
        PrototypeError::Json(e)
    }
}

impl std::fmt::Display for PrototypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrototypeError::Json(e) => write!(f, "JSON error: {}", e),
            PrototypeError::DuplicateGas { name } => {
                write!(f, "Gas species defined twice: {}", name)
            }
            PrototypeError::MissingSpecies { name } => {
                write!(f, "Gas species missing from table: {}", name)
            }
            PrototypeError::BadReaction { id, reason } => {
                write!(f, "Bad reaction {}: {}", id, reason)
            }
        }
    }
}

impl std::error::Error for PrototypeError {}

/// Errors returned by the "simulated only" query variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtmosError {
    /// The entity does not exist in the world.
    NoSuchGrid,
    /// The grid has no atmosphere, or the cell is space.
    NotSimulated,
}

impl std::fmt::Display for AtmosError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AtmosError::NoSuchGrid => write!(f, "No such grid entity"),
            AtmosError::NotSimulated => write!(f, "Grid or cell is not simulated"),
        }
    }
}

impl std::error::Error for AtmosError {}
