use super::candidate::{Candidate, by_norm_fitness};
use crate::core::fitness::FitnessMeasure;

/// A snapshot of one synchronized scoring round.
///
/// Holds one candidate list per scoring target. The lists are index-aligned: position `i`
/// in every list refers to the same candidate scored against a different target. The
/// first list carries the aggregated normalized fitness used for selection.
#[derive(Debug, Clone)]
pub struct Generation {
    number: usize,
    targets: Vec<Vec<Candidate>>,
}

impl Generation {
    pub fn new(number: usize, targets: Vec<Vec<Candidate>>) -> Self {
        debug_assert!(
            targets.windows(2).all(|w| w[0].len() == w[1].len()),
            "target lists must be index-aligned"
        );
        Self { number, targets }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    /// Candidates of the primary target list.
    pub fn candidates(&self) -> &[Candidate] {
        self.targets.first().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn target_lists(&self) -> &[Vec<Candidate>] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.candidates().len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates().is_empty()
    }

    pub fn fittest(&self) -> Option<&Candidate> {
        self.candidates().iter().max_by(|a, b| by_norm_fitness(a, b))
    }

    /// Primary-list candidates ordered from best to worst normalized fitness.
    pub fn ranked(&self) -> Vec<&Candidate> {
        let mut ranked: Vec<&Candidate> = self.candidates().iter().collect();
        ranked.sort_by(|a, b| by_norm_fitness(b, a));
        ranked
    }

    /// Highest primary-list fitness under `measure`. Comparable across generations,
    /// unlike normalized fitness.
    pub fn best_fitness(&self, measure: FitnessMeasure) -> Option<f64> {
        self.candidates()
            .iter()
            .filter_map(|c| c.fitness(measure))
            .fold(None, |best, f| Some(best.map_or(f, |b: f64| b.max(f))))
    }

    /// Fitness values per target list, in candidate order.
    pub fn fitness_table(&self, measure: FitnessMeasure) -> Vec<Vec<f64>> {
        self.targets
            .iter()
            .map(|list| list.iter().filter_map(|c| c.fitness(measure)).collect())
            .collect()
    }

    pub fn into_targets(self) -> Vec<Vec<Candidate>> {
        self.targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ids::CandidateId;

    fn scored(id: u64, raw: f64, norm: f64) -> Candidate {
        let mut c = Candidate::new(CandidateId::new(id), vec![id as usize]);
        c.set_raw_score(raw).unwrap();
        c.set_norm_fitness(norm);
        c
    }

    #[test]
    fn fittest_and_ranking_use_normalized_fitness() {
        let generation = Generation::new(
            3,
            vec![vec![scored(1, -5.0, 0.4), scored(2, -9.0, 1.0), scored(3, -1.0, 0.0)]],
        );
        assert_eq!(generation.number(), 3);
        assert_eq!(generation.fittest().unwrap().id(), CandidateId::new(2));
        let order: Vec<_> = generation.ranked().iter().map(|c| c.id().get()).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn best_fitness_is_negated_lowest_score() {
        let generation = Generation::new(0, vec![vec![scored(1, -5.0, 0.4), scored(2, -9.0, 1.0)]]);
        assert_eq!(generation.best_fitness(FitnessMeasure::Affinity), Some(9.0));
    }

    #[test]
    fn empty_generation_has_no_fittest() {
        let generation = Generation::new(0, vec![]);
        assert!(generation.is_empty());
        assert!(generation.fittest().is_none());
        assert!(generation.best_fitness(FitnessMeasure::Affinity).is_none());
    }
}
