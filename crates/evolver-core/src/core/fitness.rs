//! Fitness arithmetic: derived efficiency scores, population-wide normalization and the
//! aggregation of per-target fitness values for multi-receptor runs.
//!
//! Scores handed back by scoring pipelines are energies, so lower is better. Fitness is
//! always the negated score, so higher is better everywhere past this module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Conversion factor from kcal to kJ used by the lipophilic efficiency.
pub const KCAL_TO_KJ: f64 = 4.186798188;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FitnessMeasure {
    #[default]
    Affinity,
    LigandEfficiency,
    LigandLipophilicityEfficiency,
}

/// How per-target normalized fitness values are merged into one value per candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FitnessAggregation {
    /// `exp(prod(n_i) - 1)`: rewards candidates that do well on every target at once.
    #[default]
    Product,
    /// `exp(exp(n_0) - sum_{j>0} exp(n_j) - 1)`: rewards the first target at the expense
    /// of all others.
    Selectivity,
}

impl fmt::Display for FitnessMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FitnessMeasure::Affinity => "affinity",
            FitnessMeasure::LigandEfficiency => "ligand-efficiency",
            FitnessMeasure::LigandLipophilicityEfficiency => "ligand-lipophilicity-efficiency",
        };
        f.write_str(s)
    }
}

impl FromStr for FitnessMeasure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "affinity" => Ok(FitnessMeasure::Affinity),
            "ligand-efficiency" | "le" => Ok(FitnessMeasure::LigandEfficiency),
            "ligand-lipophilicity-efficiency" | "lle" => {
                Ok(FitnessMeasure::LigandLipophilicityEfficiency)
            }
            other => Err(format!("unknown fitness measure '{}'", other)),
        }
    }
}

impl FromStr for FitnessAggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "product" => Ok(FitnessAggregation::Product),
            "selectivity" => Ok(FitnessAggregation::Selectivity),
            other => Err(format!("unknown fitness aggregation '{}'", other)),
        }
    }
}

/// Linearly rescales `value` into `[0, 1]` using the population-wide `min` and `max`.
///
/// A population whose fitness values are all equal maps every member to `1.0`.
#[inline]
pub fn normalize(value: f64, min: f64, max: f64) -> f64 {
    let span = max - min;
    if span.abs() < f64::EPSILON || !span.is_finite() {
        return 1.0;
    }
    (value - min) / span
}

/// Smallest and largest of the finite values, or `None` if there are none.
pub fn min_max<I>(values: I) -> Option<(f64, f64)>
where
    I: IntoIterator<Item = f64>,
{
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Score per heavy atom.
pub fn ligand_efficiency(raw_score: f64, heavy_atom_count: usize) -> Option<f64> {
    if heavy_atom_count == 0 {
        return None;
    }
    Some(raw_score / heavy_atom_count as f64)
}

/// `ln(-score * KCAL_TO_KJ) - logP`; undefined for non-negative scores.
pub fn lipophilic_efficiency(raw_score: f64, log_p: f64) -> Option<f64> {
    let value = (-raw_score * KCAL_TO_KJ).ln() - log_p;
    value.is_finite().then_some(value)
}

/// Merges the normalized fitness of one candidate across all scoring targets.
///
/// A single target passes through untouched.
pub fn aggregate(per_target: &[f64], aggregation: FitnessAggregation) -> f64 {
    match per_target {
        [] => 0.0,
        [single] => *single,
        [first, rest @ ..] => match aggregation {
            FitnessAggregation::Product => (per_target.iter().product::<f64>() - 1.0).exp(),
            FitnessAggregation::Selectivity => {
                let penalty: f64 = rest.iter().map(|n| n.exp()).sum();
                (first.exp() - penalty - 1.0).exp()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-3;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < TOLERANCE
    }

    #[test]
    fn normalize_rescales_scores_to_unit_interval() {
        let raw = [10.0, 5.0, 1.0];
        let (min, max) = min_max(raw).unwrap();
        assert_eq!((min, max), (1.0, 10.0));

        let norm: Vec<f64> = raw.iter().map(|&v| normalize(v, min, max)).collect();
        assert!(approx(norm[0], 1.0));
        assert!(approx(norm[1], 0.444));
        assert!(approx(norm[2], 0.0));
    }

    #[test]
    fn normalize_is_pure_and_idempotent() {
        let first = normalize(5.0, 1.0, 10.0);
        let second = normalize(5.0, 1.0, 10.0);
        assert_eq!(first, second);

        let renormalized = normalize(first, 0.0, 1.0);
        assert!(approx(renormalized, first));
    }

    #[test]
    fn normalize_of_flat_population_is_one() {
        assert_eq!(normalize(3.0, 3.0, 3.0), 1.0);
    }

    #[test]
    fn min_max_ignores_non_finite_values() {
        assert_eq!(min_max([f64::NAN, 2.0, -1.0]), Some((-1.0, 2.0)));
        assert_eq!(min_max(std::iter::empty()), None);
    }

    #[test]
    fn ligand_efficiency_divides_by_heavy_atoms() {
        assert_eq!(ligand_efficiency(-10.0, 4), Some(-2.5));
        assert_eq!(ligand_efficiency(-10.0, 0), None);
    }

    #[test]
    fn lipophilic_efficiency_requires_negative_score() {
        let lle = lipophilic_efficiency(-10.0, 1.0).unwrap();
        assert!(approx(lle, (10.0 * KCAL_TO_KJ).ln() - 1.0));
        assert!(lipophilic_efficiency(2.0, 1.0).is_none());
    }

    #[test]
    fn single_target_passes_through() {
        assert_eq!(aggregate(&[0.3], FitnessAggregation::Product), 0.3);
        assert_eq!(aggregate(&[0.3], FitnessAggregation::Selectivity), 0.3);
    }

    // The product aggregate is exp(prod - 1), not a geometric mean. These values pin the
    // formula so any change to it is deliberate.
    #[test]
    fn product_aggregate_is_exp_of_product_minus_one() {
        assert!(approx(aggregate(&[1.0, 1.0], FitnessAggregation::Product), 1.0));
        assert!(approx(
            aggregate(&[0.5, 0.5], FitnessAggregation::Product),
            (-0.75f64).exp()
        ));
        assert!(approx(
            aggregate(&[0.0, 1.0], FitnessAggregation::Product),
            (-1.0f64).exp()
        ));
    }

    #[test]
    fn selectivity_aggregate_penalizes_off_targets() {
        let on_target_only = aggregate(&[1.0, 0.0], FitnessAggregation::Selectivity);
        let both = aggregate(&[1.0, 1.0], FitnessAggregation::Selectivity);
        assert!(on_target_only > both);
        assert!(approx(on_target_only, (1f64.exp() - 1.0 - 1.0).exp()));
    }

    #[test]
    fn fitness_measure_parses_aliases() {
        assert_eq!("LE".parse::<FitnessMeasure>(), Ok(FitnessMeasure::LigandEfficiency));
        assert_eq!(
            "ligand_lipophilicity_efficiency".parse::<FitnessMeasure>(),
            Ok(FitnessMeasure::LigandLipophilicityEfficiency)
        );
        assert!("potency".parse::<FitnessMeasure>().is_err());
    }
}
