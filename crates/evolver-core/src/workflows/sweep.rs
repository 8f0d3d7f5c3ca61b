use super::evolve::{self, EvolutionSetup, GenerationFitness};
use crate::engine::config::ExecutorConfig;
use crate::engine::context::RunContext;
use crate::engine::error::EngineError;
use crate::engine::observer::EvolutionObserver;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::sweep::SweepPoint;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Summary file written to the sweep output directory.
pub const SWEEP_SUMMARY: &str = "out.csv";

/// One row of the sweep summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepRunSummary {
    pub run: usize,
    pub status: &'static str,
    pub best_fitness: Option<f64>,
    pub generations: usize,
    pub scored_candidates: usize,
    pub duration_secs: f64,
    pub termination: Option<String>,
    pub error: Option<String>,
}

#[derive(Serialize)]
struct ScoreRow {
    generation: usize,
    target: usize,
    position: usize,
    fitness: f64,
}

/// Runs one evolution per sweep point under `out_dir/run_<i>`.
///
/// `setup_for` builds the collaborators of each run against that run's context, so steps
/// that watch for cancellation see the run they belong to.
///
/// A failing run is recorded in the summary and the sweep moves on. A forced termination
/// stops the whole sweep.
#[instrument(skip_all, name = "sweep_workflow")]
pub fn run(
    setup_for: &dyn Fn(&Arc<RunContext>) -> EvolutionSetup,
    points: &[SweepPoint],
    executor_config: &ExecutorConfig,
    out_dir: &Path,
    observer: &dyn EvolutionObserver,
    reporter: &ProgressReporter,
) -> Result<Vec<SweepRunSummary>, EngineError> {
    fs::create_dir_all(out_dir).map_err(|e| EngineError::io(out_dir, e))?;
    info!(runs = points.len(), out_dir = %out_dir.display(), "Starting parameter sweep");

    let mut summaries = Vec::with_capacity(points.len());
    for (i, point) in points.iter().enumerate() {
        reporter.report(Progress::Message(format!(
            "Sweep run {}/{}",
            i + 1,
            points.len()
        )));
        let run_dir = out_dir.join(format!("run_{i}"));
        fs::create_dir_all(&run_dir).map_err(|e| EngineError::io(&run_dir, e))?;
        write_json(&run_dir.join(format!("{i}-params.json")), &point.params)?;

        let context = Arc::new(RunContext::new(&run_dir));
        let setup = setup_for(&context);
        match evolve::run(&setup, &point.params, executor_config, context, observer, reporter) {
            Ok(result) => {
                write_scores_csv(&run_dir.join(format!("{i}-scores.csv")), &result.fitness_history)?;
                summaries.push(SweepRunSummary {
                    run: i,
                    status: "success",
                    best_fitness: result.best_fitness(),
                    generations: result.generations(),
                    scored_candidates: result.scored_candidates,
                    duration_secs: result.elapsed.as_secs_f64(),
                    termination: Some(result.termination.to_string()),
                    error: None,
                });
            }
            Err(e) => {
                let graceful = e.is_graceful();
                warn!(run = i, error = %e, "Sweep run failed");
                summaries.push(SweepRunSummary {
                    run: i,
                    status: if graceful { "terminated" } else { "failed" },
                    best_fitness: None,
                    generations: 0,
                    scored_candidates: 0,
                    duration_secs: 0.0,
                    termination: None,
                    error: Some(e.to_string()),
                });
                if graceful {
                    break;
                }
            }
        }
    }

    write_summary_csv(&out_dir.join(SWEEP_SUMMARY), &summaries)?;
    Ok(summaries)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), EngineError> {
    let file = File::create(path).map_err(|e| EngineError::io(path, e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .map_err(|e| EngineError::io(path, io::Error::other(e)))
}

/// Writes a fitness history as `generation,target,position,fitness` rows.
pub fn write_scores_csv(path: &Path, history: &[GenerationFitness]) -> Result<(), EngineError> {
    let to_io = |e: csv::Error| EngineError::io(path, io::Error::other(e));
    let mut writer = csv::Writer::from_path(path).map_err(to_io)?;
    for entry in history {
        for (target, values) in entry.targets.iter().enumerate() {
            for (position, &fitness) in values.iter().enumerate() {
                writer
                    .serialize(ScoreRow {
                        generation: entry.generation,
                        target,
                        position,
                        fitness,
                    })
                    .map_err(to_io)?;
            }
        }
    }
    writer.flush().map_err(|e| EngineError::io(path, e))
}

pub fn write_summary_csv(path: &Path, summaries: &[SweepRunSummary]) -> Result<(), EngineError> {
    let to_io = |e: csv::Error| EngineError::io(path, io::Error::other(e));
    let mut writer = csv::Writer::from_path(path).map_err(to_io)?;
    for summary in summaries {
        writer.serialize(summary).map_err(to_io)?;
    }
    writer.flush().map_err(|e| EngineError::io(path, e))
}
