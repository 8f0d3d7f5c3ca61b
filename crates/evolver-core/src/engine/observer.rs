use super::error::EngineError;
use crate::core::models::generation::Generation;
use serde::Serialize;
use std::fmt;

/// Coarse run status reported to the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        })
    }
}

/// Receives what a run produces while it is running.
///
/// Called from the scheduler thread only, so implementations may use plain interior
/// mutability.
pub trait EvolutionObserver {
    fn handle_generation(&self, generation: &Generation);

    /// Polled between result collections. Returning `true` stops the run with a forced
    /// termination.
    fn is_termination_requested(&self) -> bool {
        false
    }

    fn set_status(&self, status: RunStatus);

    fn put_error(&self, error: &EngineError);
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl EvolutionObserver for NullObserver {
    fn handle_generation(&self, _generation: &Generation) {}

    fn set_status(&self, _status: RunStatus) {}

    fn put_error(&self, _error: &EngineError) {}
}
