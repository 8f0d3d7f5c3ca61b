//! # Workflows Module
//!
//! High-level entry points that assemble the engine into complete runs.
//!
//! ## Overview
//!
//! A workflow takes the chemistry collaborator's bindings (reactant space, species,
//! reactor and scoring pipelines), a validated configuration and a run directory, and
//! drives everything from the first random candidate to the final generation. Callers
//! observe progress through an [`EvolutionObserver`](crate::engine::observer::EvolutionObserver)
//! and a [`ProgressReporter`](crate::engine::progress::ProgressReporter).
//!
//! ## Architecture
//!
//! - **Evolution Workflow** ([`evolve`]) - The scheduler state machine: initial
//!   sampling, scoring, termination evaluation, offspring production and refinement.
//! - **Sweep Workflow** ([`sweep`]) - One evolution per parameter combination, each in
//!   its own run directory, with a CSV summary.
//!
//! ## Key Capabilities
//!
//! - **Guaranteed cleanup** of the worker pool and the generation log on every path
//! - **Typed failures** surfaced both to the caller and to the observer
//! - **Run artifacts** written next to the candidate scratch directories

pub mod evolve;
pub mod sweep;
