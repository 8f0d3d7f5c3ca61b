//! Genetic operators: parent selection, mutation and the per-child operation choice.

use super::chemistry::{AlleleSimilarity, ReactantSpace};
use super::config::{MutationMethod, SelectionMethod};
use crate::core::models::candidate::{Candidate, by_norm_fitness};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use std::collections::HashMap;
use std::iter;
use std::sync::Arc;

/// How a single child is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Crossover,
    Elitism,
    RandomImmigrant,
}

/// Weighted choice between the three operations.
#[derive(Debug, Clone)]
pub struct OperationChooser {
    weights: WeightedIndex<f64>,
}

impl OperationChooser {
    const ORDER: [Operation; 3] = [
        Operation::Crossover,
        Operation::Elitism,
        Operation::RandomImmigrant,
    ];

    /// Returns `None` when every rate is zero.
    pub fn new(crossover: f64, elitism: f64, immigrant: f64) -> Option<Self> {
        WeightedIndex::new([crossover, elitism, immigrant])
            .ok()
            .map(|weights| Self { weights })
    }

    pub fn choose<R: Rng>(&self, rng: &mut R) -> Operation {
        Self::ORDER[self.weights.sample(rng)]
    }
}

/// Picks `ceil(n * rate)` distinct parents from `pool` and returns them best first.
pub fn select_parents<R: Rng>(
    mut pool: Vec<Candidate>,
    method: SelectionMethod,
    rate: f64,
    tournament_size: usize,
    rng: &mut R,
) -> Vec<Candidate> {
    if pool.is_empty() {
        return pool;
    }
    let count = ((pool.len() as f64 * rate).ceil() as usize).clamp(1, pool.len());
    let mut chosen = Vec::with_capacity(count);

    match method {
        SelectionMethod::Truncated => {
            pool.sort_by(|a, b| by_norm_fitness(b, a));
            pool.truncate(count);
            chosen = pool;
        }
        SelectionMethod::FitnessProportionate => {
            while chosen.len() < count {
                let weights = pool.iter().map(|c| c.norm_fitness().unwrap_or(0.0).max(0.0));
                let index = match WeightedIndex::new(weights) {
                    Ok(roulette) => roulette.sample(rng),
                    Err(_) => rng.gen_range(0..pool.len()),
                };
                chosen.push(pool.swap_remove(index));
            }
        }
        SelectionMethod::Tournament => {
            while chosen.len() < count {
                let size = tournament_size.clamp(1, pool.len());
                let winner = rand::seq::index::sample(rng, pool.len(), size)
                    .into_iter()
                    .max_by(|&a, &b| by_norm_fitness(&pool[a], &pool[b]));
                let Some(winner) = winner else {
                    break;
                };
                chosen.push(pool.swap_remove(winner));
            }
        }
    }

    chosen.sort_by(|a, b| by_norm_fitness(b, a));
    chosen
}

/// Memoized similarity rows for distance-dependent mutation.
pub struct SimilarityCache {
    source: Arc<dyn AlleleSimilarity>,
    rows: HashMap<(usize, usize), Vec<f64>>,
}

impl SimilarityCache {
    pub fn new(source: Arc<dyn AlleleSimilarity>) -> Self {
        Self {
            source,
            rows: HashMap::new(),
        }
    }

    /// Replacement allele for `current`, weighted by similarity. The current allele keeps
    /// weight `sum / rate - sum`, so on average a gene changes with probability `rate`.
    fn replacement<R: Rng>(
        &mut self,
        list: usize,
        current: usize,
        alleles: &[usize],
        rate: f64,
        rng: &mut R,
    ) -> usize {
        let source = &self.source;
        let row = self.rows.entry((list, current)).or_insert_with(|| {
            alleles
                .iter()
                .map(|&a| {
                    if a == current {
                        0.0
                    } else {
                        source.similarity(list, current, a).max(0.0)
                    }
                })
                .collect()
        });

        let sum: f64 = row.iter().sum();
        if sum <= 0.0 || rate <= 0.0 {
            return current;
        }
        let keep = sum / rate - sum;
        match WeightedIndex::new(row.iter().copied().chain(iter::once(keep))) {
            Ok(dist) => alleles.get(dist.sample(rng)).copied().unwrap_or(current),
            Err(_) => current,
        }
    }
}

/// Mutates `genotype` in place.
pub fn mutate<R: Rng>(
    genotype: &mut [usize],
    space: &ReactantSpace,
    method: MutationMethod,
    rate: f64,
    similarity: Option<&mut SimilarityCache>,
    rng: &mut R,
) {
    match (method, similarity) {
        (MutationMethod::DistanceDependent, Some(cache)) => {
            for (list, gene) in genotype.iter_mut().enumerate() {
                *gene = cache.replacement(list, *gene, space.alleles(list), rate, rng);
            }
        }
        _ => {
            for (list, gene) in genotype.iter_mut().enumerate() {
                if !rng.gen_bool(rate) {
                    continue;
                }
                let alleles = space.alleles(list);
                // The extra slot past the end keeps the current allele.
                let slot = rng.gen_range(0..=alleles.len());
                if let Some(&allele) = alleles.get(slot) {
                    *gene = allele;
                }
            }
        }
    }
}
