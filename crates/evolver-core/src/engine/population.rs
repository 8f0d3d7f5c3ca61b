//! The evolving population: initial sampling and offspring production.

use super::chemistry::{AlleleSimilarity, ReactantSpace, Reactor};
use super::config::{GAParameters, SpeciesDetermination};
use super::context::RunContext;
use super::error::EngineError;
use super::executor::{BatchOptions, PipelineExecutor};
use super::pipeline::{CandidatePipeline, PipelineStep};
use super::progress::{Progress, ProgressReporter};
use super::reproduction::{self, Operation, OperationChooser, SimilarityCache};
use super::steps::ReactionStep;
use crate::core::models::candidate::Candidate;
use crate::core::models::generation::Generation;
use crate::core::models::species::Species;
use itertools::Itertools;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Consecutive failed child productions allowed per selected parent before a generation
/// gives up.
pub const OFFSPRING_FAILURE_FACTOR: usize = 24;

pub struct Population {
    params: GAParameters,
    space: ReactantSpace,
    species: Vec<Arc<Species>>,
    reaction: Arc<ReactionStep>,
    similarity: Option<SimilarityCache>,
    operations: OperationChooser,
    context: Arc<RunContext>,
    rng: StdRng,
}

impl Population {
    pub fn new(
        params: &GAParameters,
        space: ReactantSpace,
        species: Vec<Arc<Species>>,
        reactor: Arc<dyn Reactor>,
        similarity: Option<Arc<dyn AlleleSimilarity>>,
        context: Arc<RunContext>,
    ) -> Result<Self, EngineError> {
        if species.is_empty() {
            return Err(EngineError::Initialization("no species configured".into()));
        }
        if space.is_empty() {
            return Err(EngineError::Initialization(
                "every reactant list needs at least one reactant".into(),
            ));
        }
        for s in &species {
            s.validate_against(space.list_count())
                .map_err(|e| EngineError::Initialization(format!("{s}: {e}")))?;
        }
        let operations = OperationChooser::new(
            params.crossover_rate,
            params.elitist_rate,
            params.random_immigrant_rate,
        )
        .ok_or_else(|| EngineError::Internal("all reproduction rates are zero".into()))?;

        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let reaction = Arc::new(ReactionStep::new(
            reactor,
            species.clone(),
            params.species_determination,
            params.limits,
        ));

        Ok(Self {
            params: params.clone(),
            space,
            species,
            reaction,
            similarity: similarity.map(SimilarityCache::new),
            operations,
            context,
            rng,
        })
    }

    pub fn space(&self) -> &ReactantSpace {
        &self.space
    }

    /// The step that turns a genotype into a realized candidate.
    pub fn reaction_pipeline(&self) -> CandidatePipeline {
        self.reaction.clone()
    }

    /// A fresh candidate with a uniformly random genotype. Under fixed species determination
    /// the candidate is pinned to a random species.
    pub fn random_candidate(&mut self) -> Candidate {
        let genotype = self
            .space
            .random_genotype(&mut self.rng)
            .unwrap_or_default();
        let candidate = Candidate::new(self.context.next_id(), genotype);
        match self.params.species_determination {
            SpeciesDetermination::Fixed => match self.species.choose(&mut self.rng) {
                Some(species) => candidate.with_species(Arc::clone(species)),
                None => candidate,
            },
            SpeciesDetermination::Dynamic => candidate,
        }
    }

    /// Resamples whole batches until `population_size` candidates passed the reaction step.
    ///
    /// Fails with [`EngineError::Sampling`] when no valid product appeared for a whole
    /// sampling timeout, and with [`EngineError::TooFewScoredCandidates`] when termination
    /// is requested before the population is complete.
    #[instrument(skip_all, name = "initial_sampling")]
    pub fn sample_initial(
        &mut self,
        executor: &PipelineExecutor,
        cancelled: &dyn Fn() -> bool,
        reporter: &ProgressReporter,
    ) -> Result<Vec<Candidate>, EngineError> {
        let target = self.params.population_size;
        let timeout = executor.config().sampling_timeout;
        let pipeline = self.reaction_pipeline();
        let mut valid: Vec<Candidate> = Vec::with_capacity(target);
        let mut last_progress = Instant::now();
        let mut last_rejection: Option<String> = None;
        let mut rounds = 0usize;

        while valid.len() < target {
            rounds += 1;
            let batch: Vec<Candidate> = (valid.len()..target)
                .map(|_| self.random_candidate())
                .collect();
            let outcome = match executor.run_batch(
                &pipeline,
                batch,
                BatchOptions::sampling(timeout),
                cancelled,
                reporter,
            ) {
                Ok(outcome) => outcome,
                Err(EngineError::ForcedTermination) => {
                    return Err(EngineError::too_few(format!(
                        "termination requested after sampling {} of {} valid candidates",
                        valid.len(),
                        target
                    )));
                }
                Err(e) => return Err(e),
            };

            if let Some(failure) = outcome.failures.last() {
                last_rejection = Some(failure.error.to_string());
            }
            if !outcome.completed.is_empty() {
                last_progress = Instant::now();
            }
            valid.extend(outcome.completed);

            if valid.len() < target && last_progress.elapsed() >= timeout {
                return Err(EngineError::Sampling(format!(
                    "no valid product within {:?} ({} of {} candidates after {} rounds); last rejection: {}",
                    timeout,
                    valid.len(),
                    target,
                    rounds,
                    last_rejection.as_deref().unwrap_or("none")
                )));
            }
        }

        info!(
            candidates = valid.len(),
            rounds, "Initial population sampled"
        );
        reporter.report(Progress::Message(format!(
            "Sampled {} candidates in {} rounds",
            valid.len(),
            rounds
        )));
        Ok(valid)
    }

    /// Parents eligible for selection: the primary-list candidates whose anchor RMSD is
    /// within bounds.
    fn eligible_parents(&self, generation: &Generation) -> Vec<Candidate> {
        let max = self.params.max_anchor_rmsd;
        generation
            .candidates()
            .iter()
            .filter(|c| match c.anchor_rmsd() {
                Some(rmsd) if rmsd > max => {
                    self.context.record_distance_violation(c.id());
                    false
                }
                _ => true,
            })
            .cloned()
            .collect()
    }

    /// Builds the next population from a scored generation.
    #[instrument(skip_all, name = "offspring", fields(generation = generation.number()))]
    pub fn produce_offspring(&mut self, generation: &Generation) -> Result<Vec<Candidate>, EngineError> {
        let eligible = self.eligible_parents(generation);
        if eligible.is_empty() {
            return Err(EngineError::too_few(format!(
                "no parents left in generation {} after the anchor RMSD filter",
                generation.number()
            )));
        }
        let parents = reproduction::select_parents(
            eligible,
            self.params.selection_method,
            self.params.selection_rate,
            self.params.tournament_size,
            &mut self.rng,
        );

        let target = self.params.population_size;
        let limit = parents.len() * OFFSPRING_FAILURE_FACTOR;
        let mut offspring = Vec::with_capacity(target);
        // Only failures since the last successful child count toward the limit.
        let mut rejections = Vec::new();
        let mut total_failures = 0usize;
        let mut counts = [0usize; 3];
        let mut retry: Option<Operation> = None;
        let mut i = 0usize;

        while offspring.len() < target {
            // A failed operation is retried as is, so failing crossovers cannot quietly turn
            // into elitism.
            let operation = match retry.take() {
                Some(operation) => operation,
                None => self.operations.choose(&mut self.rng),
            };
            let produced = match operation {
                Operation::Crossover => self.crossover_child(&parents, i),
                Operation::Elitism => Ok(self.elite_child(&parents, i)),
                Operation::RandomImmigrant => {
                    let candidate = self.random_candidate();
                    self.realize(candidate)
                }
            };
            i += 1;

            match produced {
                Ok(child) => {
                    counts[operation as usize] += 1;
                    offspring.push(child);
                    rejections.clear();
                }
                Err(message) => {
                    total_failures += 1;
                    rejections.push(message);
                    retry = Some(operation);
                    if rejections.len() > limit {
                        warn!(consecutive = rejections.len(), "Offspring production overflowed");
                        return Err(EngineError::OffspringFailureOverflow {
                            attempts: rejections.len(),
                            rejections: rejections.into_iter().unique().collect(),
                        });
                    }
                }
            }
        }

        debug!(
            parents = parents.len(),
            crossover = counts[Operation::Crossover as usize],
            elitism = counts[Operation::Elitism as usize],
            immigrants = counts[Operation::RandomImmigrant as usize],
            failures = total_failures,
            "Offspring produced"
        );
        Ok(offspring)
    }

    fn crossover_child(&mut self, parents: &[Candidate], i: usize) -> Result<Candidate, String> {
        let n = parents.len();
        let first = &parents[i % n];
        let second = &parents[(i + 1) % n];

        let (species, mut genotype) = first
            .crossover(second, self.params.interspecies_crossover, &mut self.rng)
            .ok_or_else(|| {
                format!(
                    "crossover refused between candidates {} and {} of different species",
                    first.id(),
                    second.id()
                )
            })?;
        reproduction::mutate(
            &mut genotype,
            &self.space,
            self.params.mutation_method,
            self.params.mutation_rate,
            self.similarity.as_mut(),
            &mut self.rng,
        );

        let mut child = Candidate::new(self.context.next_id(), genotype);
        if let (SpeciesDetermination::Fixed, Some(species)) =
            (self.params.species_determination, species)
        {
            child = child.with_species(species);
        }
        self.realize(child)
    }

    /// Elitism carries a parent over unchanged, under a new id, to be scored again.
    fn elite_child(&self, parents: &[Candidate], i: usize) -> Candidate {
        parents[i % parents.len()].duplicate(self.context.next_id())
    }

    fn realize(&self, candidate: Candidate) -> Result<Candidate, String> {
        self.reaction
            .execute(candidate)
            .map_err(|e| e.to_string())
    }
}
