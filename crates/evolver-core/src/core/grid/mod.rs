//! Voxelized representations of excluded three-dimensional volume.

pub mod exclusion;
pub mod occupancy;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum GridError {
    #[error("Grid resolution must be positive and finite, got {0}")]
    InvalidResolution(f64),

    #[error("Grid extent along the {axis} axis must be positive, got {extent}")]
    DegenerateExtent { axis: char, extent: f64 },

    #[error("Cannot build an exclusion shape from a molecule without atoms")]
    EmptyMolecule,
}
