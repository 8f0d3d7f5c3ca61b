use crate::chemistry;
use crate::cli::SweepArgs;
use crate::config::builder::build_config;
use crate::error::{CliError, Result};
use crate::observer::CommandLineObserver;
use crate::utils::progress::CliProgressHandler;
use compound_evolver::engine::context::TERMINATION_SENTINEL;
use compound_evolver::engine::progress::ProgressReporter;
use compound_evolver::engine::sweep::ParameterSweep;
use compound_evolver::workflows::sweep::{self, SWEEP_SUMMARY};
use std::fs;
use tracing::info;

pub async fn run(args: SweepArgs, threads: Option<usize>) -> Result<()> {
    info!("Merging configuration from file and CLI arguments...");
    let app = build_config(&args.run, threads)?;

    let ranges = fs::read_to_string(&args.ranges)?;
    let grid = ParameterSweep::from_json(&ranges).map_err(|e| CliError::parsing(&args.ranges, e))?;
    let points = grid.expand(&app.base_parameters)?;
    if points.is_empty() {
        return Err(CliError::Config(
            "The parameter ranges leave no valid combination to run.".to_string(),
        ));
    }
    let keys: Vec<&str> = grid.keys().map(|k| k.name()).collect();
    info!(runs = points.len(), ?keys, "Parameter grid expanded");

    fs::create_dir_all(&app.output)?;
    let chemistry = chemistry::load(&app)?;

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());
    let observer = CommandLineObserver::new(&reporter, app.parameters.fitness_measure)
        .with_sentinel(app.output.join(TERMINATION_SENTINEL));

    println!(
        "Starting parameter sweep of {} run(s) in {}...",
        points.len(),
        app.output.display()
    );
    let summaries = tokio::task::block_in_place(|| {
        sweep::run(
            &|context| chemistry.setup(context),
            &points,
            &app.executor,
            &app.output,
            &observer,
            &reporter,
        )
    })?;

    for (summary, point) in summaries.iter().zip(&points) {
        let assignments = point
            .assignments
            .iter()
            .map(|(key, value)| format!("{}={}", key.name(), value))
            .collect::<Vec<_>>()
            .join(" ");
        match summary.best_fitness {
            Some(best) => println!(
                "run {:>3}  {:<10}  best {:>10.4}  {:>6.1}s  {}",
                summary.run, summary.status, best, summary.duration_secs, assignments
            ),
            None => println!(
                "run {:>3}  {:<10}  {:>15}  {:>6.1}s  {}",
                summary.run,
                summary.status,
                "-",
                summary.duration_secs,
                assignments
            ),
        }
    }
    println!(
        "Sweep summary written to {}.",
        app.output.join(SWEEP_SUMMARY).display()
    );
    Ok(())
}
