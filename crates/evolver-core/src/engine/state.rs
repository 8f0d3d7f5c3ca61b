use super::error::EngineError;
use std::fmt;
use tracing::trace;

/// Phases of the evolution scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerState {
    Idle,
    SamplingInitial,
    Scoring,
    EvaluatingTermination,
    Refining,
    Done,
    Failed,
}

impl SchedulerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    fn allows(self, next: SchedulerState) -> bool {
        use SchedulerState::*;
        match (self, next) {
            (_, Failed) => !self.is_terminal(),
            (Idle, SamplingInitial)
            | (SamplingInitial, Scoring)
            | (Scoring, EvaluatingTermination)
            | (EvaluatingTermination, Scoring)
            | (EvaluatingTermination, Refining)
            | (EvaluatingTermination, Done)
            | (Refining, Scoring)
            | (Refining, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::SamplingInitial => "SAMPLING_INITIAL",
            Self::Scoring => "SCORING",
            Self::EvaluatingTermination => "EVALUATING_TERMINATION",
            Self::Refining => "REFINING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Why a run stopped successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    GenerationLimit,
    Converged,
    DurationElapsed,
    CandidateTarget,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::GenerationLimit => "generation limit reached",
            Self::Converged => "fitness converged",
            Self::DurationElapsed => "duration budget elapsed",
            Self::CandidateTarget => "target candidate count reached",
        };
        f.write_str(text)
    }
}

/// Tracks the scheduler state and refuses transitions the state machine does not have.
#[derive(Debug)]
pub struct StateTracker {
    current: SchedulerState,
    history: Vec<SchedulerState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self {
            current: SchedulerState::Idle,
            history: vec![SchedulerState::Idle],
        }
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> SchedulerState {
        self.current
    }

    pub fn history(&self) -> &[SchedulerState] {
        &self.history
    }

    pub fn advance(&mut self, next: SchedulerState) -> Result<(), EngineError> {
        if !self.current.allows(next) {
            return Err(EngineError::Internal(format!(
                "illegal scheduler transition {} -> {}",
                self.current, next
            )));
        }
        trace!(from = %self.current, to = %next, "Scheduler transition");
        self.current = next;
        self.history.push(next);
        Ok(())
    }

    /// Moves to `Failed` unless the run already reached a terminal state.
    pub fn fail(&mut self) {
        if !self.current.is_terminal() {
            self.current = SchedulerState::Failed;
            self.history.push(SchedulerState::Failed);
        }
    }
}
