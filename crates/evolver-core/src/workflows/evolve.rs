use crate::core::fitness::{self, FitnessMeasure};
use crate::core::io::generation_log::GenerationLog;
use crate::core::models::candidate::Candidate;
use crate::core::models::generation::Generation;
use crate::core::models::ids::CandidateId;
use crate::core::models::species::Species;
use crate::engine::booster;
use crate::engine::chemistry::{AlleleSimilarity, AtomContributionScorer, ReactantSpace, Reactor};
use crate::engine::config::{BoosterMode, ExecutorConfig, GAParameters, TerminationCondition};
use crate::engine::context::RunContext;
use crate::engine::error::EngineError;
use crate::engine::executor::{BatchOptions, PipelineExecutor};
use crate::engine::observer::{EvolutionObserver, RunStatus};
use crate::engine::pipeline::CandidatePipeline;
use crate::engine::population::Population;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::state::{SchedulerState, StateTracker, TerminationReason};
use crate::engine::steps::DummyFitness;
use crate::engine::termination::{BestTracker, TerminationPolicy};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::BufWriter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// File in the run directory receiving the ranked generation log.
pub const GENERATION_LOG: &str = "generations.log";

/// Everything a run needs from the chemistry collaborator.
pub struct EvolutionSetup {
    pub space: ReactantSpace,
    pub species: Vec<Species>,
    pub reactor: Arc<dyn Reactor>,
    pub similarity: Option<Arc<dyn AlleleSimilarity>>,
    /// One scoring pipeline per target. Without any, candidates are scored by mass.
    pub scoring: Vec<CandidatePipeline>,
    pub contributions: Option<Arc<dyn AtomContributionScorer>>,
}

/// Fitness values of one generation, one list per scoring target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationFitness {
    pub generation: usize,
    pub targets: Vec<Vec<f64>>,
}

#[derive(Debug, Clone)]
pub struct EvolutionResult {
    pub fitness_history: Vec<GenerationFitness>,
    pub final_generation: Generation,
    /// The bonus generation of the combinatorial booster, or the last generation of the
    /// re-weighted follow-up run.
    pub refinement: Option<Generation>,
    /// Candidate with the highest primary-target fitness seen during the whole run.
    pub best: Option<Candidate>,
    pub termination: TerminationReason,
    pub scored_candidates: usize,
    pub elapsed: Duration,
    pub measure: FitnessMeasure,
}

impl EvolutionResult {
    pub fn best_fitness(&self) -> Option<f64> {
        self.best.as_ref().and_then(|c| c.fitness(self.measure))
    }

    pub fn generations(&self) -> usize {
        self.fitness_history.len()
    }
}

/// Runs a complete evolution: initial sampling, the generation loop and optional
/// refinement.
///
/// The observer sees `RUNNING` first and then exactly one of `SUCCESS` or `FAILED`. The
/// worker pool is shut down and the generation log closed on every path.
#[instrument(skip_all, name = "evolution_workflow")]
pub fn run(
    setup: &EvolutionSetup,
    params: &GAParameters,
    executor_config: &ExecutorConfig,
    context: Arc<RunContext>,
    observer: &dyn EvolutionObserver,
    reporter: &ProgressReporter,
) -> Result<EvolutionResult, EngineError> {
    observer.set_status(RunStatus::Running);

    let outcome = match Scheduler::open(setup, params, executor_config, context, observer, reporter)
    {
        Ok(mut scheduler) => {
            let outcome = scheduler.evolve();
            if outcome.is_err() {
                scheduler.states.fail();
            }
            let closed = scheduler.close();
            outcome.and_then(|result| closed.map(|_| result))
        }
        Err(e) => Err(e),
    };

    match &outcome {
        Ok(result) => {
            info!(
                generations = result.generations(),
                scored = result.scored_candidates,
                best = ?result.best_fitness(),
                reason = %result.termination,
                "Evolution finished"
            );
            observer.set_status(RunStatus::Success);
        }
        Err(e) => {
            if e.is_graceful() {
                info!("Evolution stopped on request");
            } else {
                warn!(error = %e, "Evolution failed");
            }
            observer.put_error(e);
            observer.set_status(RunStatus::Failed);
        }
    }
    outcome
}

struct Scheduler<'a> {
    setup: &'a EvolutionSetup,
    params: &'a GAParameters,
    observer: &'a dyn EvolutionObserver,
    reporter: &'a ProgressReporter<'a>,
    context: Arc<RunContext>,
    executor: PipelineExecutor,
    log: GenerationLog<BufWriter<File>>,
    population: Population,
    species: Vec<Arc<Species>>,
    scoring: Vec<CandidatePipeline>,
    states: StateTracker,
    history: Vec<GenerationFitness>,
    best: Option<Candidate>,
    started: Instant,
}

impl<'a> Scheduler<'a> {
    fn open(
        setup: &'a EvolutionSetup,
        params: &'a GAParameters,
        executor_config: &ExecutorConfig,
        context: Arc<RunContext>,
        observer: &'a dyn EvolutionObserver,
        reporter: &'a ProgressReporter<'a>,
    ) -> Result<Self, EngineError> {
        // === Phase 0: Preparation ===
        reporter.report(Progress::PhaseStart {
            name: "Preparation",
        });
        params.validate()?;
        if params.booster == BoosterMode::ReactantReweighting && setup.contributions.is_none() {
            return Err(EngineError::Initialization(
                "reactant re-weighting needs a per-atom contribution scorer".into(),
            ));
        }
        fs::create_dir_all(context.run_dir()).map_err(|e| EngineError::io(context.run_dir(), e))?;

        let log_path = context.run_dir().join(GENERATION_LOG);
        let log = GenerationLog::create(&log_path, params.fitness_measure)
            .map_err(|e| EngineError::io(&log_path, e))?;

        let species: Vec<Arc<Species>> = setup.species.iter().cloned().map(Arc::new).collect();
        let population = Population::new(
            params,
            setup.space.clone(),
            species.clone(),
            Arc::clone(&setup.reactor),
            setup.similarity.clone(),
            Arc::clone(&context),
        )?;
        let executor = PipelineExecutor::new(executor_config.clone(), Arc::clone(&context))?;

        let scoring = if setup.scoring.is_empty() {
            info!("No scoring pipeline configured; using mass-based dummy fitness");
            vec![Arc::new(DummyFitness) as CandidatePipeline]
        } else {
            setup.scoring.clone()
        };
        info!(
            population = params.population_size,
            species = species.len(),
            targets = scoring.len(),
            termination = ?params.termination,
            run_dir = %context.run_dir().display(),
            "Evolution set up"
        );
        reporter.report(Progress::PhaseFinish);

        Ok(Self {
            setup,
            params,
            observer,
            reporter,
            context,
            executor,
            log,
            population,
            species,
            scoring,
            states: StateTracker::new(),
            history: Vec::new(),
            best: None,
            started: Instant::now(),
        })
    }

    fn close(self) -> Result<(), EngineError> {
        let stragglers = self.executor.shutdown();
        if stragglers > 0 {
            debug!(stragglers, "Tasks were still running at shutdown");
        }
        let path = self.context.run_dir().join(GENERATION_LOG);
        self.log
            .close()
            .map(|_| ())
            .map_err(|e| EngineError::io(path, e))
    }

    fn cancelled(&self) -> bool {
        self.observer.is_termination_requested() || self.context.termination_requested()
    }

    /// The cancellation signal handed to the executor, detached from `self` so the
    /// population can be borrowed mutably next to it.
    fn cancellation(&self) -> impl Fn() -> bool + use<'a> {
        let observer = self.observer;
        let context = Arc::clone(&self.context);
        move || observer.is_termination_requested() || context.termination_requested()
    }

    fn evolve(&mut self) -> Result<EvolutionResult, EngineError> {
        // === Phase 1: Initial sampling ===
        self.states.advance(SchedulerState::SamplingInitial)?;
        self.reporter.report(Progress::PhaseStart {
            name: "Initial Sampling",
        });
        let initial = {
            let cancelled = self.cancellation();
            self.population
                .sample_initial(&self.executor, &cancelled, self.reporter)?
        };
        self.reporter.report(Progress::PhaseFinish);

        // === Phase 2: Generation loop ===
        self.reporter.report(Progress::PhaseStart { name: "Evolution" });
        let (final_generation, termination) = self.run_generations(self.params, 0, initial)?;
        self.reporter.report(Progress::PhaseFinish);
        info!(generation = final_generation.number(), reason = %termination, "Evolution loop terminated");

        // === Phase 3: Optional refinement ===
        let refinement = match self.params.booster {
            BoosterMode::None => None,
            BoosterMode::Combinatorial => self.combinatorial_refinement(&final_generation)?,
            BoosterMode::ReactantReweighting => Some(self.reweighting_refinement(&final_generation)?),
        };

        self.states.advance(SchedulerState::Done)?;
        Ok(EvolutionResult {
            fitness_history: std::mem::take(&mut self.history),
            final_generation,
            refinement,
            best: self.best.take(),
            termination,
            scored_candidates: self.context.scored_count(),
            elapsed: self.started.elapsed(),
            measure: self.params.fitness_measure,
        })
    }

    /// Scores `candidates` as generation `first`, then keeps producing and scoring
    /// offspring until `params`' termination policy fires.
    fn run_generations(
        &mut self,
        params: &GAParameters,
        first: usize,
        mut candidates: Vec<Candidate>,
    ) -> Result<(Generation, TerminationReason), EngineError> {
        let policy = TerminationPolicy::from_params(params);
        let mut tracker = BestTracker::new();
        let mut number = first;

        loop {
            self.states.advance(SchedulerState::Scoring)?;
            let generation = self.score(number, candidates)?;
            self.record(&generation)?;
            let relative = number - first;
            if tracker.observe(relative, generation.best_fitness(params.fitness_measure)) {
                debug!(generation = number, best = ?tracker.best(), "New best fitness");
            }

            self.states.advance(SchedulerState::EvaluatingTermination)?;
            if self.cancelled() {
                return Err(EngineError::ForcedTermination);
            }
            if let Some(reason) = policy.evaluate(
                relative,
                self.started.elapsed(),
                self.context.scored_count(),
                &tracker,
            ) {
                return Ok((generation, reason));
            }

            candidates = self.population.produce_offspring(&generation)?;
            number += 1;
        }
    }

    /// Runs every scoring pipeline over the candidates, keeps those scored on every
    /// target and normalizes their fitness with one min/max over all target lists.
    fn score(&mut self, number: usize, candidates: Vec<Candidate>) -> Result<Generation, EngineError> {
        let measure = self.params.fitness_measure;
        let submitted = candidates.len();
        let mut lists: Vec<Vec<Candidate>> = Vec::with_capacity(self.scoring.len());

        for (target, pipeline) in self.scoring.iter().enumerate() {
            let batch: Vec<Candidate> = candidates
                .iter()
                .map(|c| {
                    let mut c = c.clone();
                    c.reset_scores();
                    c
                })
                .collect();
            let cancelled = self.cancellation();
            let outcome = self.executor.run_batch(
                pipeline,
                batch,
                BatchOptions::scoring(),
                &cancelled,
                self.reporter,
            )?;
            if !outcome.failures.is_empty() {
                info!(
                    generation = number,
                    target,
                    failed = outcome.failures.len(),
                    "Candidates dropped during scoring"
                );
            }
            lists.push(outcome.completed);
        }
        drop(candidates);

        // Keep only candidates with a fitness value on every target, in submission order.
        let mut common: Option<HashSet<CandidateId>> = None;
        for list in &lists {
            let ids: HashSet<CandidateId> = list
                .iter()
                .filter(|c| c.fitness(measure).is_some())
                .map(Candidate::id)
                .collect();
            common = Some(match common {
                None => ids,
                Some(prev) => prev.intersection(&ids).copied().collect(),
            });
        }
        let common = common.unwrap_or_default();
        for list in &mut lists {
            list.retain(|c| common.contains(&c.id()));
        }

        let Some((min, max)) = fitness::min_max(
            lists
                .iter()
                .flatten()
                .filter_map(|c| c.fitness(measure)),
        ) else {
            return Err(EngineError::too_few(format!(
                "none of the {submitted} candidates of generation {number} could be scored"
            )));
        };

        for list in &mut lists {
            for candidate in list.iter_mut() {
                if let Some(value) = candidate.fitness(measure) {
                    candidate.set_norm_fitness(fitness::normalize(value, min, max));
                }
            }
        }
        if lists.len() > 1 {
            let (primary, others) = lists.split_at_mut(1);
            for (i, candidate) in primary[0].iter_mut().enumerate() {
                let per_target: Vec<f64> = std::iter::once(candidate.norm_fitness())
                    .chain(others.iter().map(|list| list[i].norm_fitness()))
                    .map(|n| n.unwrap_or(0.0))
                    .collect();
                candidate.set_norm_fitness(fitness::aggregate(
                    &per_target,
                    self.params.fitness_aggregation,
                ));
            }
        }

        let generation = Generation::new(number, lists);
        self.context.add_scored(generation.len());
        match self.executor.remove_empty_dirs() {
            Ok(removed) if removed > 0 => debug!(removed, "Removed empty candidate directories"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Cannot tidy candidate directories"),
        }
        Ok(generation)
    }

    fn record(&mut self, generation: &Generation) -> Result<(), EngineError> {
        let measure = self.params.fitness_measure;
        self.log
            .write_generation(generation)
            .map_err(|e| EngineError::io(self.context.run_dir().join(GENERATION_LOG), e))?;
        self.history.push(GenerationFitness {
            generation: generation.number(),
            targets: generation.fitness_table(measure),
        });

        if let Some(top) = generation
            .candidates()
            .iter()
            .filter(|c| c.fitness(measure).is_some())
            .max_by(|a, b| {
                let (fa, fb) = (a.fitness(measure), b.fitness(measure));
                fa.partial_cmp(&fb).unwrap_or(std::cmp::Ordering::Equal)
            })
        {
            let beats = match &self.best {
                Some(best) => top.fitness(measure) > best.fitness(measure),
                None => true,
            };
            if beats {
                self.best = Some(top.clone());
            }
        }

        let best_fitness = generation.best_fitness(measure);
        info!(
            generation = generation.number(),
            size = generation.len(),
            best = ?best_fitness,
            "Generation scored"
        );
        self.observer.handle_generation(generation);
        self.reporter.report(Progress::GenerationComplete {
            number: generation.number(),
            size: generation.len(),
            best_fitness,
        });
        Ok(())
    }

    fn combinatorial_refinement(
        &mut self,
        final_generation: &Generation,
    ) -> Result<Option<Generation>, EngineError> {
        self.states.advance(SchedulerState::Refining)?;
        self.reporter.report(Progress::PhaseStart {
            name: "Combinatorial Refinement",
        });
        let genotypes =
            booster::combinatorial_genotypes(final_generation, self.params.max_combinations);
        let candidates: Vec<Candidate> = genotypes
            .into_iter()
            .map(|g| Candidate::new(self.context.next_id(), g))
            .collect();
        info!(candidates = candidates.len(), "Scoring combinatorial booster batch");

        let cancelled = self.cancellation();
        let realized = self
            .executor
            .run_batch(
                &self.population.reaction_pipeline(),
                candidates,
                BatchOptions::sampling(self.executor.config().sampling_timeout),
                &cancelled,
                self.reporter,
            )?
            .completed;
        if realized.is_empty() {
            warn!("No combinatorial candidate yielded a product; skipping the bonus generation");
            self.reporter.report(Progress::PhaseFinish);
            return Ok(None);
        }

        self.states.advance(SchedulerState::Scoring)?;
        let bonus = self.score(final_generation.number() + 1, realized)?;
        self.record(&bonus)?;
        self.states.advance(SchedulerState::EvaluatingTermination)?;
        self.reporter.report(Progress::PhaseFinish);
        Ok(Some(bonus))
    }

    fn reweighting_refinement(&mut self, final_generation: &Generation) -> Result<Generation, EngineError> {
        self.states.advance(SchedulerState::Refining)?;
        self.reporter.report(Progress::PhaseStart {
            name: "Reactant Re-weighting",
        });
        let scorer = self.setup.contributions.as_ref().ok_or_else(|| {
            EngineError::Internal("contribution scorer vanished after validation".into())
        })?;
        let space = booster::reweighted_space(
            final_generation,
            scorer.as_ref(),
            self.population.space(),
            self.params.booster_top_reactants,
        );
        info!(
            combinations = space.combinations(),
            generations = self.params.booster_generations,
            "Restarting on re-weighted reactant space"
        );

        let mut refined = self.params.clone();
        refined.termination = TerminationCondition::FixedGenerations;
        refined.max_generations = self.params.booster_generations;
        refined.booster = BoosterMode::None;

        self.population = Population::new(
            &refined,
            space,
            self.species.clone(),
            Arc::clone(&self.setup.reactor),
            self.setup.similarity.clone(),
            Arc::clone(&self.context),
        )?;
        let initial = {
            let cancelled = self.cancellation();
            self.population
                .sample_initial(&self.executor, &cancelled, self.reporter)?
        };

        let (last, _) = self.run_generations(&refined, final_generation.number() + 1, initial)?;
        self.reporter.report(Progress::PhaseFinish);
        Ok(last)
    }
}
