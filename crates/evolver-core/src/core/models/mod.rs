pub mod candidate;
pub mod generation;
pub mod ids;
pub mod molecule;
pub mod species;
