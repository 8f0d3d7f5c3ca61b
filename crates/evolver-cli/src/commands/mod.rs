pub mod evolve;
pub mod sweep;
