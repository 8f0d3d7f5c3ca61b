//! # Compound Evolver Core Library
//!
//! A library for evolving reaction-product compounds across generations, scoring every
//! candidate through an externally supplied multi-stage pipeline and steering the search
//! with a genetic algorithm under wall-clock, candidate-count or convergence budgets.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture so that each concern can be
//! tested in isolation.
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Candidate`, `Species`,
//!   `Generation`), the voxelized exclusion-shape engine, pure fitness arithmetic and the
//!   append-only generation log.
//!
//! - **[`engine`]: The Logic Core.** Configuration (`GAParameters`), the pipeline step
//!   abstraction and its failure taxonomy, the bounded worker-pool executor, the per-run
//!   context, the population and its reproduction operators, termination policies and
//!   post-run boosters.
//!
//! - **[`workflows`]: The Public API.** The evolution scheduler that ties the engine and
//!   core together into a complete run, from initial sampling to the final generation.

pub mod core;
pub mod engine;
pub mod workflows;
