//! # Core Module
//!
//! Stateless building blocks shared by the engine and the workflows: the candidate data
//! model, the spatial occupancy grid used to reject sterically impossible poses, fitness
//! arithmetic and run artifacts.

pub mod fitness;
pub mod grid;
pub mod io;
pub mod models;
