//! Pipeline steps the engine ships itself. Everything chemistry-specific comes from the
//! collaborator through [`Reactor`]; these steps only wire it into the pipeline contract.

use super::chemistry::Reactor;
use super::config::{SpeciesDetermination, ValidityLimits};
use super::context::RunContext;
use super::pipeline::{PipelineError, PipelineStep};
use crate::core::grid::exclusion::ExclusionShape;
use crate::core::models::candidate::Candidate;
use crate::core::models::molecule::Descriptors;
use crate::core::models::species::Species;
use std::sync::Arc;
use tracing::trace;

/// Realizes a genotype into a product and checks it against the validity limits.
///
/// Candidates that already carry a phenotype pass through untouched.
pub struct ReactionStep {
    reactor: Arc<dyn Reactor>,
    species: Vec<Arc<Species>>,
    determination: SpeciesDetermination,
    limits: ValidityLimits,
}

impl ReactionStep {
    pub fn new(
        reactor: Arc<dyn Reactor>,
        species: Vec<Arc<Species>>,
        determination: SpeciesDetermination,
        limits: ValidityLimits,
    ) -> Self {
        Self {
            reactor,
            species,
            determination,
            limits,
        }
    }

    pub fn species(&self) -> &[Arc<Species>] {
        &self.species
    }

    fn attempt_order<'a>(&'a self, candidate: &'a Candidate) -> Vec<&'a Arc<Species>> {
        match (self.determination, candidate.species()) {
            (SpeciesDetermination::Fixed, Some(pinned)) => vec![pinned],
            _ => self.species.iter().collect(),
        }
    }
}

impl PipelineStep<Candidate, Candidate> for ReactionStep {
    fn execute(&self, mut candidate: Candidate) -> Result<Candidate, PipelineError> {
        if candidate.phenotype().is_some() {
            return Ok(candidate);
        }

        let mut last_rejection = None;
        let mut realized = None;
        for species in self.attempt_order(&candidate) {
            let Some(reactants) = species.select_reactants(candidate.genotype()) else {
                last_rejection = Some(format!("genotype too short for {species}"));
                continue;
            };
            match self.reactor.react(species, &reactants) {
                Ok(product) => {
                    realized = Some((Arc::clone(species), product));
                    break;
                }
                Err(e) if e.is_candidate_invalid() => {
                    trace!(candidate = %candidate.id(), %species, "No product: {}", e);
                    last_rejection = Some(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        let Some((species, product)) = realized else {
            return Err(PipelineError::invalid(format!(
                "no species yields a product for genotype {:?}: {}",
                candidate.genotype(),
                last_rejection.unwrap_or_else(|| "no species to try".to_string())
            )));
        };

        check_limits(&self.limits, &product.descriptors()).map_err(PipelineError::invalid)?;
        candidate.set_phenotype(species, product);
        Ok(candidate)
    }
}

fn check_limits(limits: &ValidityLimits, d: &Descriptors) -> Result<(), String> {
    if let Some(max) = limits.max_molecular_mass {
        if d.mass > max {
            return Err(format!("molecular mass {:.2} exceeds {max}", d.mass));
        }
    }
    if let Some(max) = limits.max_log_p {
        if d.log_p > max {
            return Err(format!("logP {:.2} exceeds {max}", d.log_p));
        }
    }
    if let (Some(max), Some(donors)) = (limits.max_hydrogen_bond_donors, d.hydrogen_bond_donors) {
        if donors > max {
            return Err(format!("{donors} hydrogen bond donors exceed {max}"));
        }
    }
    if let (Some(max), Some(acceptors)) = (
        limits.max_hydrogen_bond_acceptors,
        d.hydrogen_bond_acceptors,
    ) {
        if acceptors > max {
            return Err(format!("{acceptors} hydrogen bond acceptors exceed {max}"));
        }
    }
    Ok(())
}

/// Rejects candidates with any atom inside the receptor's excluded volume. Uses the pose
/// when one exists and the raw product otherwise.
pub struct ExclusionFilter {
    shape: Arc<ExclusionShape>,
    context: Arc<RunContext>,
}

impl ExclusionFilter {
    pub fn new(shape: Arc<ExclusionShape>, context: Arc<RunContext>) -> Self {
        Self { shape, context }
    }
}

impl PipelineStep<Candidate, Candidate> for ExclusionFilter {
    fn execute(&self, candidate: Candidate) -> Result<Candidate, PipelineError> {
        let molecule = candidate
            .pose()
            .or(candidate.phenotype())
            .ok_or_else(|| PipelineError::invalid("no molecule to check against the receptor"))?;
        let clashes = self.shape.clash_count(molecule.as_ref());
        if clashes > 0 {
            let total = self.context.record_clash(candidate.id());
            return Err(PipelineError::invalid(format!(
                "{clashes} atoms inside the excluded volume (clash #{total})"
            )));
        }
        Ok(candidate)
    }
}

/// Scores a candidate by its negated molecular mass. Used when no scoring pipeline is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyFitness;

impl PipelineStep<Candidate, Candidate> for DummyFitness {
    fn execute(&self, mut candidate: Candidate) -> Result<Candidate, PipelineError> {
        let mass = candidate
            .phenotype()
            .map(|m| m.descriptors().mass)
            .ok_or_else(|| PipelineError::invalid("no phenotype to weigh"))?;
        candidate.set_raw_score(-mass)?;
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ids::CandidateId;
    use crate::core::models::molecule::MoleculeHandle;
    use crate::core::models::molecule::fixtures::{PointCloud, carbon};

    /// Reacts only when every reactant index is even; mass is the reactant sum.
    struct EvenReactor;

    impl Reactor for EvenReactor {
        fn react(
            &self,
            species: &Species,
            reactants: &[usize],
        ) -> Result<MoleculeHandle, PipelineError> {
            if reactants.iter().any(|r| r % 2 == 1) {
                return Err(PipelineError::invalid("odd reactant"));
            }
            let mass = reactants.iter().sum::<usize>() as f64 + species.reaction() as f64;
            Ok(Arc::new(PointCloud::new(vec![carbon(0.0, 0.0, 0.0)]).with_mass(mass)))
        }
    }

    fn species() -> Vec<Arc<Species>> {
        vec![
            Arc::new(Species::new(0, 2, vec![0, 1]).unwrap()),
            Arc::new(Species::new(1, 1, vec![2]).unwrap()),
        ]
    }

    #[test]
    fn dynamic_determination_falls_through_to_the_next_species() {
        let step = ReactionStep::new(
            Arc::new(EvenReactor),
            species(),
            SpeciesDetermination::Dynamic,
            ValidityLimits::default(),
        );
        let realized = step
            .execute(Candidate::new(CandidateId::new(1), vec![1, 2, 4]))
            .unwrap();
        assert_eq!(realized.species().unwrap().reaction(), 1);
        assert_eq!(realized.reactants(), Some(vec![4]));
    }

    #[test]
    fn fixed_determination_only_tries_the_pinned_species() {
        let all = species();
        let step = ReactionStep::new(
            Arc::new(EvenReactor),
            all.clone(),
            SpeciesDetermination::Fixed,
            ValidityLimits::default(),
        );
        let pinned = Candidate::new(CandidateId::new(1), vec![1, 2, 4]).with_species(Arc::clone(&all[0]));
        let err = step.execute(pinned).unwrap_err();
        assert!(err.is_candidate_invalid());
        assert!(err.to_string().contains("odd reactant"));
    }

    #[test]
    fn products_over_the_mass_limit_are_invalid() {
        let step = ReactionStep::new(
            Arc::new(EvenReactor),
            species(),
            SpeciesDetermination::Dynamic,
            ValidityLimits {
                max_molecular_mass: Some(5.0),
                ..ValidityLimits::default()
            },
        );
        let err = step
            .execute(Candidate::new(CandidateId::new(2), vec![4, 4, 0]))
            .unwrap_err();
        assert!(err.to_string().contains("molecular mass"));
    }

    #[test]
    fn exclusion_filter_counts_clashes() {
        let dir = tempfile::tempdir().unwrap();
        let context = Arc::new(RunContext::new(dir.path()));
        let receptor = PointCloud::new(vec![carbon(0.0, 0.0, 0.0), carbon(1.5, 0.0, 0.0)]);
        let shape = Arc::new(ExclusionShape::new(&receptor, 0.0).unwrap());
        let filter = ExclusionFilter::new(shape, Arc::clone(&context));
        let species = Arc::new(Species::new(0, 1, vec![0]).unwrap());

        let mut inside = Candidate::new(CandidateId::new(5), vec![0]);
        inside.set_phenotype(Arc::clone(&species), Arc::new(PointCloud::new(vec![carbon(0.7, 0.0, 0.0)])));
        assert!(filter.execute(inside).unwrap_err().is_candidate_invalid());
        assert_eq!(context.clash_count(CandidateId::new(5)), 1);

        let mut outside = Candidate::new(CandidateId::new(6), vec![0]);
        outside.set_phenotype(species, Arc::new(PointCloud::new(vec![carbon(30.0, 0.0, 0.0)])));
        assert!(filter.execute(outside).is_ok());
    }

    #[test]
    fn dummy_fitness_scores_negative_mass() {
        let species = Arc::new(Species::new(0, 1, vec![0]).unwrap());
        let mut c = Candidate::new(CandidateId::new(3), vec![0]);
        c.set_phenotype(species, Arc::new(PointCloud::new(vec![carbon(0.0, 0.0, 0.0)]).with_mass(120.5)));
        let scored = DummyFitness.execute(c).unwrap();
        assert_eq!(scored.raw_score(), Some(-120.5));
    }
}
