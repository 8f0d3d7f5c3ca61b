//! Post-evolution refinement.
//!
//! The combinatorial booster recombines the alleles of the best tenth of the final
//! population exhaustively. Reactant re-weighting ranks every reactant by the per-atom
//! score contributions it brings into the top candidates and narrows the reactant space
//! to the best few per gene position for a short follow-up run.

use super::chemistry::{AtomContributionScorer, ReactantSpace};
use crate::core::models::generation::Generation;
use itertools::Itertools;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Distinct alleles per gene position among the top decile of `generation`, crossed into
/// every combination. At most `max_combinations` genotypes are returned.
pub fn combinatorial_genotypes(generation: &Generation, max_combinations: usize) -> Vec<Vec<usize>> {
    let ranked = generation.ranked();
    let top = ranked.len().div_ceil(10).max(1).min(ranked.len());
    let elite = &ranked[..top];
    let Some(width) = elite.first().map(|c| c.genotype().len()) else {
        return Vec::new();
    };

    let per_position: Vec<Vec<usize>> = (0..width)
        .map(|position| {
            elite
                .iter()
                .filter_map(|c| c.genotype().get(position).copied())
                .unique()
                .collect()
        })
        .collect();
    debug!(
        elite = top,
        alleles = ?per_position.iter().map(Vec::len).collect::<Vec<_>>(),
        "Combinatorial booster alleles"
    );

    per_position
        .into_iter()
        .multi_cartesian_product()
        .take(max_combinations)
        .collect()
}

/// Narrows `space` to the `top_n` reactants per list with the most favourable (lowest)
/// mean contribution across the candidates of `generation`. Lists without any
/// attributable contribution keep their full allele set.
pub fn reweighted_space(
    generation: &Generation,
    scorer: &dyn AtomContributionScorer,
    space: &ReactantSpace,
    top_n: usize,
) -> ReactantSpace {
    let mut totals: HashMap<(usize, usize), (f64, usize)> = HashMap::new();

    for candidate in generation.candidates() {
        let (Some(species), Some(phenotype)) = (candidate.species(), candidate.phenotype()) else {
            continue;
        };
        let Some(origins) = phenotype.atom_origins() else {
            continue;
        };
        let contributions = match scorer.contributions(candidate) {
            Ok(values) => values,
            Err(e) => {
                warn!(candidate = %candidate.id(), "Per-atom scoring failed: {}", e);
                continue;
            }
        };

        let mut per_reactant: HashMap<(usize, usize), f64> = HashMap::new();
        for (origin, value) in origins.iter().zip(&contributions) {
            let Some(&list) = origin.and_then(|component| species.reactant_lists().get(component))
            else {
                continue;
            };
            if let Some(&reactant) = candidate.genotype().get(list) {
                *per_reactant.entry((list, reactant)).or_default() += value;
            }
        }
        for (key, sum) in per_reactant {
            let entry = totals.entry(key).or_insert((0.0, 0));
            entry.0 += sum;
            entry.1 += 1;
        }
    }

    let alleles = (0..space.list_count())
        .map(|list| {
            let ranked: Vec<usize> = totals
                .iter()
                .filter(|((l, _), _)| *l == list)
                .map(|(&(_, reactant), &(sum, count))| (reactant, sum / count as f64))
                .sorted_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
                .map(|(reactant, _)| reactant)
                .take(top_n)
                .collect();
            if ranked.is_empty() {
                space.alleles(list).to_vec()
            } else {
                ranked
            }
        })
        .collect();
    ReactantSpace::restricted(alleles)
}
