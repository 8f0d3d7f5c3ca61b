//! # Engine Module
//!
//! This module implements the evolutionary machinery of the compound evolver: everything
//! between the stateless data models of [`crate::core`] and the complete run assembled in
//! [`crate::workflows`].
//!
//! ## Overview
//!
//! The engine owns the genetic-algorithm configuration, the pipeline abstraction through
//! which externally supplied chemistry and scoring steps are chained, the bounded worker
//! pool that runs those pipelines over whole batches of candidates, and the operators that
//! turn one scored generation into the next.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`], [`sweep`]) - `GAParameters`, its validating builder,
//!   executor settings and the key-to-setter table used by parameter sweeps
//! - **Pipelines** ([`pipeline`], [`steps`], [`chemistry`]) - composable candidate steps,
//!   their failure taxonomy and the seams to the chemistry collaborator
//! - **Execution** ([`executor`], [`context`]) - the worker pool and the per-run shared
//!   state (abort flag, counters, scratch directories)
//! - **Evolution** ([`population`], [`reproduction`], [`termination`], [`booster`]) -
//!   sampling, selection, crossover, mutation, termination policies and refinement
//! - **Reporting** ([`progress`], [`observer`], [`state`]) - progress events, the run
//!   observer and the scheduler state machine
//! - **Error Handling** ([`error`]) - the scheduler-level error type
//!
//! ## Key Capabilities
//!
//! - **Failure isolation** so that one candidate's failure never affects its siblings
//! - **Cooperative cancellation** polled between result collections
//! - **Deterministic runs** when a seed is configured
//! - **Multi-target scoring** with a shared normalization across all target lists

pub mod booster;
pub mod chemistry;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod observer;
pub mod pipeline;
pub mod population;
pub mod progress;
pub mod reproduction;
pub mod state;
pub mod steps;
pub mod sweep;
pub mod termination;
