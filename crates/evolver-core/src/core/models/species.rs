use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SpeciesError {
    #[error("Reaction {reaction} takes {expected} reactants but {actual} reactant lists were assigned")]
    MismatchedReactantCount {
        reaction: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Reactant list index {index} is out of range ({available} lists available)")]
    UnknownReactantList { index: usize, available: usize },
}

/// An immutable reaction/reactant-list grouping.
///
/// A genotype carries one allele per reactant list of the run. A species names the
/// reaction to apply and which of those lists feed it, in reaction-component order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Species {
    reaction: usize,
    reactant_lists: Vec<usize>,
}

impl Species {
    pub fn new(
        reaction: usize,
        component_count: usize,
        reactant_lists: Vec<usize>,
    ) -> Result<Self, SpeciesError> {
        if reactant_lists.len() != component_count {
            return Err(SpeciesError::MismatchedReactantCount {
                reaction,
                expected: component_count,
                actual: reactant_lists.len(),
            });
        }
        Ok(Self {
            reaction,
            reactant_lists,
        })
    }

    /// One species per reaction, each consuming the first `component_count` lists in order.
    pub fn for_reactions(component_counts: &[usize]) -> Vec<Self> {
        component_counts
            .iter()
            .enumerate()
            .map(|(reaction, &count)| Self {
                reaction,
                reactant_lists: (0..count).collect(),
            })
            .collect()
    }

    pub fn reaction(&self) -> usize {
        self.reaction
    }

    pub fn reactant_lists(&self) -> &[usize] {
        &self.reactant_lists
    }

    pub fn component_count(&self) -> usize {
        self.reactant_lists.len()
    }

    pub fn validate_against(&self, list_count: usize) -> Result<(), SpeciesError> {
        match self.reactant_lists.iter().find(|&&i| i >= list_count) {
            Some(&index) => Err(SpeciesError::UnknownReactantList {
                index,
                available: list_count,
            }),
            None => Ok(()),
        }
    }

    /// Projects a full genotype onto the reactants this species feeds its reaction.
    pub fn select_reactants(&self, genotype: &[usize]) -> Option<Vec<usize>> {
        self.reactant_lists
            .iter()
            .map(|&list| genotype.get(list).copied())
            .collect()
    }

    /// Reactant lists used by both species.
    pub fn shared_lists(&self, other: &Species) -> Vec<usize> {
        let mut shared: Vec<usize> = self
            .reactant_lists
            .iter()
            .copied()
            .filter(|list| other.reactant_lists.contains(list))
            .collect();
        shared.dedup();
        shared
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Species r{} [", self.reaction)?;
        for (i, list) in self.reactant_lists.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", list)?;
        }
        write!(f, "]")
    }
}
