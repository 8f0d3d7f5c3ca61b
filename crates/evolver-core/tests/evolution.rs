use compound_evolver::core::models::candidate::Candidate;
use compound_evolver::core::models::generation::Generation;
use compound_evolver::core::models::molecule::{AtomSite, Descriptors, Molecule, MoleculeHandle};
use compound_evolver::core::models::species::Species;
use compound_evolver::engine::chemistry::{AtomContributionScorer, ReactantSpace, Reactor};
use compound_evolver::engine::config::{
    BoosterMode, ExecutorConfig, GAParameters, GAParametersBuilder, TerminationCondition,
};
use compound_evolver::engine::context::{RunContext, TERMINATION_SENTINEL};
use compound_evolver::engine::error::EngineError;
use compound_evolver::engine::observer::{EvolutionObserver, RunStatus};
use compound_evolver::engine::pipeline::{CandidatePipeline, PipelineError, step_fn};
use compound_evolver::engine::progress::ProgressReporter;
use compound_evolver::engine::state::TerminationReason;
use compound_evolver::workflows::evolve::{self, EvolutionResult, EvolutionSetup, GENERATION_LOG};
use nalgebra::Point3;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug)]
struct Product {
    atoms: Vec<AtomSite>,
    mass: f64,
}

impl Molecule for Product {
    fn atoms(&self) -> &[AtomSite] {
        &self.atoms
    }

    fn descriptors(&self) -> Descriptors {
        Descriptors {
            mass: self.mass,
            heavy_atom_count: self.atoms.len(),
            ..Descriptors::default()
        }
    }

    fn atom_origins(&self) -> Option<Vec<Option<usize>>> {
        Some((0..self.atoms.len()).map(Some).collect())
    }
}

/// One carbon per reactant; mass is one more than the reactant index sum.
struct LinearReactor {
    reacts: bool,
}

impl Reactor for LinearReactor {
    fn react(&self, _species: &Species, reactants: &[usize]) -> Result<MoleculeHandle, PipelineError> {
        if !self.reacts {
            return Err(PipelineError::invalid("reaction template does not match"));
        }
        let atoms = reactants
            .iter()
            .enumerate()
            .map(|(i, _)| AtomSite::new(Point3::new(i as f64 * 1.5, 0.0, 0.0), 6))
            .collect();
        Ok(Arc::new(Product {
            atoms,
            mass: reactants.iter().sum::<usize>() as f64 + 1.0,
        }))
    }
}

/// Each atom contributes its reactant index, so low indices rank best.
struct IndexContributions;

impl AtomContributionScorer for IndexContributions {
    fn contributions(&self, candidate: &Candidate) -> Result<Vec<f64>, PipelineError> {
        Ok(candidate.genotype().iter().map(|&r| r as f64).collect())
    }
}

#[derive(Default)]
struct Recorder {
    statuses: Mutex<Vec<RunStatus>>,
    generations: Mutex<Vec<usize>>,
    errors: Mutex<Vec<String>>,
    current_generation: Arc<AtomicUsize>,
    sentinel_after: Option<(usize, PathBuf)>,
}

impl EvolutionObserver for Recorder {
    fn handle_generation(&self, generation: &Generation) {
        self.generations.lock().unwrap().push(generation.number());
        self.current_generation
            .store(generation.number() + 1, Ordering::SeqCst);
        if let Some((after, run_dir)) = &self.sentinel_after {
            if generation.number() == *after {
                std::fs::write(run_dir.join(TERMINATION_SENTINEL), "").unwrap();
            }
        }
    }

    fn set_status(&self, status: RunStatus) {
        self.statuses.lock().unwrap().push(status);
    }

    fn put_error(&self, error: &EngineError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

fn setup(reacts: bool, scoring: Vec<CandidatePipeline>) -> EvolutionSetup {
    EvolutionSetup {
        space: ReactantSpace::full(&[5, 5]),
        species: vec![Species::new(0, 2, vec![0, 1]).unwrap()],
        reactor: Arc::new(LinearReactor { reacts }),
        similarity: None,
        scoring,
        contributions: Some(Arc::new(IndexContributions)),
    }
}

fn executor_config() -> ExecutorConfig {
    ExecutorConfig {
        workers: 4,
        cleanup: true,
        sampling_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(2),
        shutdown_grace: Duration::from_secs(1),
    }
}

fn base_params() -> GAParametersBuilder {
    GAParameters::builder().population_size(8).seed(7)
}

fn evolve_in(
    dir: &Path,
    setup: &EvolutionSetup,
    params: &GAParameters,
    observer: &Recorder,
) -> Result<EvolutionResult, EngineError> {
    let context = Arc::new(RunContext::new(dir));
    evolve::run(
        setup,
        params,
        &executor_config(),
        context,
        observer,
        &ProgressReporter::new(),
    )
}

#[test]
fn fixed_generation_count_stops_exactly_at_the_limit() {
    let dir = tempfile::tempdir().unwrap();
    let params = base_params()
        .termination(TerminationCondition::FixedGenerations)
        .max_generations(5)
        .build()
        .unwrap();
    let recorder = Recorder::default();

    let result = evolve_in(dir.path(), &setup(true, Vec::new()), &params, &recorder).unwrap();

    assert_eq!(result.termination, TerminationReason::GenerationLimit);
    assert_eq!(result.final_generation.number(), 5);
    assert_eq!(result.generations(), 6);
    assert_eq!(*recorder.generations.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(
        *recorder.statuses.lock().unwrap(),
        vec![RunStatus::Running, RunStatus::Success]
    );

    let log = std::fs::read_to_string(dir.path().join(GENERATION_LOG)).unwrap();
    assert_eq!(log.matches("Generation: ").count(), 6);
    assert!(log.contains("Generation: 5\n"));
    assert!(!log.contains("Generation: 6"));
}

#[test]
fn dummy_fitness_follows_product_mass() {
    let dir = tempfile::tempdir().unwrap();
    let params = base_params().max_generations(3).build().unwrap();
    let recorder = Recorder::default();

    let result = evolve_in(dir.path(), &setup(true, Vec::new()), &params, &recorder).unwrap();

    let best = result.best.as_ref().unwrap();
    let mass = best.phenotype().unwrap().descriptors().mass;
    assert_eq!(result.best_fitness(), Some(mass));
    for entry in &result.fitness_history {
        assert!(entry.targets[0].iter().all(|&f| f <= mass));
    }
}

#[test]
fn convergence_stops_when_the_peak_is_not_beaten() {
    let dir = tempfile::tempdir().unwrap();
    let params = base_params()
        .termination(TerminationCondition::Convergence)
        .non_improving_factor(1.0)
        .convergence_min_generations(3)
        .build()
        .unwrap();
    let recorder = Recorder::default();
    let generation = Arc::clone(&recorder.current_generation);
    let peak_at_two: CandidatePipeline = Arc::new(step_fn(move |mut c: Candidate| {
        let fitness = match generation.load(Ordering::SeqCst) {
            0 => 1.0,
            1 => 2.0,
            2 => 5.0,
            _ => 3.0,
        };
        c.set_raw_score(-fitness)?;
        Ok(c)
    }));

    let result = evolve_in(dir.path(), &setup(true, vec![peak_at_two]), &params, &recorder).unwrap();

    assert_eq!(result.termination, TerminationReason::Converged);
    assert_eq!(result.final_generation.number(), 4);
    assert_eq!(result.best_fitness(), Some(5.0));
}

#[test]
fn a_reaction_that_never_yields_a_product_fails_with_a_typed_error() {
    let dir = tempfile::tempdir().unwrap();
    let params = base_params().population_size(4).build().unwrap();
    let recorder = Recorder::default();

    let err = evolve_in(dir.path(), &setup(false, Vec::new()), &params, &recorder).unwrap_err();

    assert!(matches!(err, EngineError::Sampling(_)), "{err}");
    assert_eq!(
        *recorder.statuses.lock().unwrap(),
        vec![RunStatus::Running, RunStatus::Failed]
    );
    assert_eq!(recorder.errors.lock().unwrap().len(), 1);
    assert!(recorder.generations.lock().unwrap().is_empty());
}

#[test]
fn one_invalid_candidate_out_of_ten_leaves_nine_scored() {
    let dir = tempfile::tempdir().unwrap();
    let params = base_params()
        .population_size(10)
        .max_generations(0)
        .build()
        .unwrap();
    let rejected = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&rejected);
    let reject_first: CandidatePipeline = Arc::new(step_fn(move |mut c: Candidate| {
        if !flag.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::invalid("docking found no pose"));
        }
        c.set_raw_score(-1.0)?;
        Ok(c)
    }));
    let recorder = Recorder::default();

    let result = evolve_in(dir.path(), &setup(true, vec![reject_first]), &params, &recorder).unwrap();

    assert!(rejected.load(Ordering::SeqCst));
    assert_eq!(result.final_generation.len(), 9);
    assert_eq!(result.scored_candidates, 9);
    assert!(result.final_generation.candidates().iter().all(Candidate::is_scored));
}

#[test]
fn sentinel_file_stops_the_run_gracefully() {
    let dir = tempfile::tempdir().unwrap();
    let params = base_params().max_generations(10).build().unwrap();
    let recorder = Recorder {
        sentinel_after: Some((1, dir.path().to_path_buf())),
        ..Recorder::default()
    };

    let err = evolve_in(dir.path(), &setup(true, Vec::new()), &params, &recorder).unwrap_err();

    assert!(err.is_graceful());
    assert_eq!(*recorder.generations.lock().unwrap(), vec![0, 1]);
    assert_eq!(
        recorder.statuses.lock().unwrap().last(),
        Some(&RunStatus::Failed)
    );
}

#[test]
fn multiple_targets_stay_index_aligned() {
    let dir = tempfile::tempdir().unwrap();
    let params = base_params()
        .population_size(10)
        .max_generations(0)
        .build()
        .unwrap();
    let by_mass: CandidatePipeline = Arc::new(step_fn(|mut c: Candidate| {
        let mass = c.phenotype().map_or(0.0, |m| m.descriptors().mass);
        c.set_raw_score(-mass)?;
        Ok(c)
    }));
    let picky: CandidatePipeline = Arc::new(step_fn(|mut c: Candidate| {
        if c.genotype()[0] == 0 {
            return Err(PipelineError::invalid("does not bind the second receptor"));
        }
        c.set_raw_score(-(c.genotype()[1] as f64) - 1.0)?;
        Ok(c)
    }));
    let recorder = Recorder::default();

    let result = evolve_in(dir.path(), &setup(true, vec![by_mass, picky]), &params, &recorder).unwrap();

    let lists = result.final_generation.target_lists();
    assert_eq!(lists.len(), 2);
    assert_eq!(lists[0].len(), lists[1].len());
    for (a, b) in lists[0].iter().zip(&lists[1]) {
        assert_eq!(a.id(), b.id());
        assert_ne!(a.genotype()[0], 0);
        let combined = a.norm_fitness().unwrap();
        assert!(combined >= (-1.0f64).exp() - 1e-12 && combined <= 1.0 + 1e-12);
    }
}

#[test]
fn combinatorial_booster_scores_a_bonus_generation() {
    let dir = tempfile::tempdir().unwrap();
    let params = base_params()
        .population_size(10)
        .max_generations(1)
        .booster(BoosterMode::Combinatorial)
        .build()
        .unwrap();
    let recorder = Recorder::default();

    let result = evolve_in(dir.path(), &setup(true, Vec::new()), &params, &recorder).unwrap();

    let bonus = result.refinement.as_ref().unwrap();
    assert_eq!(bonus.number(), 2);
    assert!(!bonus.is_empty());
    assert_eq!(result.generations(), 3);
    assert_eq!(result.final_generation.number(), 1);
}

#[test]
fn reactant_reweighting_restarts_on_a_narrower_space() {
    let dir = tempfile::tempdir().unwrap();
    let params = base_params()
        .max_generations(1)
        .booster(BoosterMode::ReactantReweighting)
        .booster_top_reactants(2)
        .booster_generations(1)
        .build()
        .unwrap();
    let recorder = Recorder::default();

    let result = evolve_in(dir.path(), &setup(true, Vec::new()), &params, &recorder).unwrap();

    let last = result.refinement.as_ref().unwrap();
    assert_eq!(last.number(), 3);
    assert_eq!(*recorder.generations.lock().unwrap(), vec![0, 1, 2, 3]);
    for position in 0..2 {
        let alleles: HashSet<usize> = last
            .candidates()
            .iter()
            .map(|c| c.genotype()[position])
            .collect();
        assert!(alleles.len() <= 2, "position {position}: {alleles:?}");
    }
}
