use crate::chemistry::{self, ReactantLibrary};
use crate::cli::EvolveArgs;
use crate::config::builder::build_config;
use crate::config::defaults::DefaultsConfig;
use crate::error::{CliError, Result};
use crate::observer::CommandLineObserver;
use crate::utils::progress::CliProgressHandler;
use compound_evolver::core::models::candidate::Candidate;
use compound_evolver::engine::context::RunContext;
use compound_evolver::engine::progress::ProgressReporter;
use compound_evolver::workflows::evolve::{self, EvolutionResult};
use compound_evolver::workflows::sweep::write_scores_csv;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct BestCandidateReport {
    id: u64,
    genotype: Vec<usize>,
    reaction: Option<usize>,
    reactants: Vec<String>,
    raw_score: Option<f64>,
    fitness: Option<f64>,
}

#[derive(Debug, Serialize)]
struct RunReport {
    termination: String,
    generations: usize,
    scored_candidates: usize,
    elapsed_secs: f64,
    clashes: usize,
    distance_violations: usize,
    best: Option<BestCandidateReport>,
}

pub async fn run(args: EvolveArgs, threads: Option<usize>) -> Result<()> {
    let defaults = DefaultsConfig::default();
    info!("Merging configuration from file and CLI arguments...");
    let app = build_config(&args.run, threads)?;

    fs::create_dir_all(&app.output)?;
    let context = Arc::new(RunContext::new(&app.output));
    let chemistry = chemistry::load(&app)?;
    let setup = chemistry.setup(&context);

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());
    let observer = CommandLineObserver::new(&reporter, app.parameters.fitness_measure);

    println!("Starting evolution in {}...", app.output.display());
    info!("Invoking the core evolution workflow...");

    let result = tokio::task::block_in_place(|| {
        evolve::run(
            &setup,
            &app.parameters,
            &app.executor,
            Arc::clone(&context),
            &observer,
            &reporter,
        )
    })?;

    let scores_path = app.output.join(defaults.scores_file);
    write_scores_csv(&scores_path, &result.fitness_history)?;
    let report = run_report(&result, &chemistry.libraries, &context);
    let best_path = app.output.join(defaults.best_file);
    write_report(&best_path, &report)?;

    println!(
        "Evolution finished after {} generation(s) ({}), {} candidates scored in {:.1}s.",
        report.generations, report.termination, report.scored_candidates, report.elapsed_secs
    );
    match &report.best {
        Some(best) => println!(
            "Best candidate #{} [{}] with fitness {:.4}",
            best.id,
            best.reactants.join(", "),
            best.fitness.unwrap_or(f64::NAN)
        ),
        None => {
            warn!("Workflow completed but no candidate was scored.");
            println!("Warning: the evolution finished without a scored candidate.");
        }
    }
    println!(
        "Fitness history written to {}, best candidate to {}.",
        scores_path.display(),
        best_path.display()
    );
    Ok(())
}

fn run_report(
    result: &EvolutionResult,
    libraries: &[ReactantLibrary],
    context: &RunContext,
) -> RunReport {
    RunReport {
        termination: result.termination.to_string(),
        generations: result.generations(),
        scored_candidates: result.scored_candidates,
        elapsed_secs: result.elapsed.as_secs_f64(),
        clashes: context.total_clashes(),
        distance_violations: context.total_distance_violations(),
        best: result
            .best
            .as_ref()
            .map(|c| best_report(c, result, libraries)),
    }
}

fn best_report(
    candidate: &Candidate,
    result: &EvolutionResult,
    libraries: &[ReactantLibrary],
) -> BestCandidateReport {
    BestCandidateReport {
        id: candidate.id().get(),
        genotype: candidate.genotype().to_vec(),
        reaction: candidate.species().map(|s| s.reaction()),
        reactants: chemistry::reactant_identifiers(libraries, candidate).unwrap_or_default(),
        raw_score: candidate.raw_score(),
        fitness: result.best_fitness(),
    }
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .map_err(|e| CliError::Other(e.into()))
}
