//! Seams to the chemistry collaborator. The engine never builds molecules itself; it asks
//! a [`Reactor`] for products and, for the optional operators, an [`AlleleSimilarity`]
//! and an [`AtomContributionScorer`].

use super::pipeline::PipelineError;
use crate::core::models::candidate::Candidate;
use crate::core::models::molecule::MoleculeHandle;
use crate::core::models::species::Species;
use rand::Rng;
use rand::seq::SliceRandom;

/// Runs a species' reaction on a set of reactants.
pub trait Reactor: Send + Sync {
    /// `reactants` holds one reactant index per reaction component, in component order.
    fn react(&self, species: &Species, reactants: &[usize])
    -> Result<MoleculeHandle, PipelineError>;
}

/// Pairwise similarity of reactants within one reactant list, used by distance-dependent
/// mutation. Larger means more alike.
pub trait AlleleSimilarity: Send + Sync {
    fn similarity(&self, list: usize, a: usize, b: usize) -> f64;
}

/// Per-atom contributions to a candidate's score, index-aligned with its phenotype atoms.
pub trait AtomContributionScorer: Send + Sync {
    fn contributions(&self, candidate: &Candidate) -> Result<Vec<f64>, PipelineError>;
}

/// The reactants each gene position may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactantSpace {
    alleles: Vec<Vec<usize>>,
}

impl ReactantSpace {
    /// Every reactant of every list, given the size of each list.
    pub fn full(list_sizes: &[usize]) -> Self {
        Self {
            alleles: list_sizes.iter().map(|&n| (0..n).collect()).collect(),
        }
    }

    /// A space restricted to the given reactants per list.
    pub fn restricted(alleles: Vec<Vec<usize>>) -> Self {
        Self { alleles }
    }

    pub fn list_count(&self) -> usize {
        self.alleles.len()
    }

    pub fn alleles(&self, list: usize) -> &[usize] {
        self.alleles.get(list).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.alleles.is_empty() || self.alleles.iter().any(Vec::is_empty)
    }

    /// Number of distinct genotypes, saturating on overflow.
    pub fn combinations(&self) -> usize {
        self.alleles
            .iter()
            .fold(1usize, |acc, list| acc.saturating_mul(list.len()))
    }

    /// A uniformly random genotype, or `None` if some list has no reactants.
    pub fn random_genotype<R: Rng>(&self, rng: &mut R) -> Option<Vec<usize>> {
        self.alleles
            .iter()
            .map(|list| list.choose(rng).copied())
            .collect()
    }
}
