use super::config::{GAParameters, TerminationCondition};
use super::state::TerminationReason;
use std::time::Duration;

/// Best fitness seen so far and the generation that produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BestTracker {
    best: Option<f64>,
    best_generation: usize,
}

impl BestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a generation's best fitness. Returns `true` if it beat every earlier one.
    pub fn observe(&mut self, generation: usize, best: Option<f64>) -> bool {
        let Some(value) = best else {
            return false;
        };
        let improved = self.best.is_none_or(|b| value > b);
        if improved {
            self.best = Some(value);
            self.best_generation = generation;
        }
        improved
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn best_generation(&self) -> usize {
        self.best_generation
    }
}

/// Decides at every generation boundary whether the run is finished.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerminationPolicy {
    condition: TerminationCondition,
    max_generations: usize,
    max_duration: Duration,
    target_candidate_count: usize,
    non_improving_factor: f64,
    convergence_min_generations: usize,
}

impl TerminationPolicy {
    pub fn from_params(params: &GAParameters) -> Self {
        Self {
            condition: params.termination,
            max_generations: params.max_generations,
            max_duration: params.max_duration,
            target_candidate_count: params.target_candidate_count,
            non_improving_factor: params.non_improving_factor,
            convergence_min_generations: params.convergence_min_generations,
        }
    }

    /// `generation` is the number of the generation just scored, starting at 0 for the
    /// initial population. `scored` counts every candidate scored so far in the run.
    pub fn evaluate(
        &self,
        generation: usize,
        elapsed: Duration,
        scored: usize,
        tracker: &BestTracker,
    ) -> Option<TerminationReason> {
        match self.condition {
            TerminationCondition::FixedGenerations => {
                (generation >= self.max_generations).then_some(TerminationReason::GenerationLimit)
            }
            TerminationCondition::Duration => {
                (elapsed >= self.max_duration).then_some(TerminationReason::DurationElapsed)
            }
            TerminationCondition::MaxCandidateCount => (scored >= self.target_candidate_count)
                .then_some(TerminationReason::CandidateTarget),
            TerminationCondition::Convergence => {
                if generation <= self.convergence_min_generations {
                    return None;
                }
                let horizon =
                    tracker.best_generation() as f64 * (1.0 + self.non_improving_factor);
                (generation as f64 >= horizon).then_some(TerminationReason::Converged)
            }
        }
    }
}
