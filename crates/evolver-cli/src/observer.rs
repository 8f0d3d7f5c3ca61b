use crate::utils::progress::generation_line;
use compound_evolver::core::fitness::FitnessMeasure;
use compound_evolver::core::models::generation::Generation;
use compound_evolver::engine::error::EngineError;
use compound_evolver::engine::observer::{EvolutionObserver, RunStatus};
use compound_evolver::engine::progress::{Progress, ProgressReporter};
use std::cell::Cell;
use std::path::PathBuf;
use tracing::{debug, error, info};

/// Console-side observer. Announces new best fitness values through the progress
/// reporter and honours an optional sentinel file next to the per-run one.
pub struct CommandLineObserver<'a> {
    reporter: &'a ProgressReporter<'a>,
    measure: FitnessMeasure,
    sentinel: Option<PathBuf>,
    best: Cell<Option<f64>>,
}

impl<'a> CommandLineObserver<'a> {
    pub fn new(reporter: &'a ProgressReporter<'a>, measure: FitnessMeasure) -> Self {
        Self {
            reporter,
            measure,
            sentinel: None,
            best: Cell::new(None),
        }
    }

    /// Also stop when `path` appears, e.g. a sweep-wide `terminate` file.
    pub fn with_sentinel(mut self, path: PathBuf) -> Self {
        self.sentinel = Some(path);
        self
    }
}

impl EvolutionObserver for CommandLineObserver<'_> {
    fn handle_generation(&self, generation: &Generation) {
        let best = generation.best_fitness(self.measure);
        debug!(
            "{}",
            generation_line(generation.number(), generation.len(), best)
        );
        if let Some(value) = best {
            if self.best.get().is_none_or(|previous| value > previous) {
                self.best.set(Some(value));
                self.reporter.report(Progress::Message(format!(
                    "New best fitness {value:.4} in generation {}",
                    generation.number()
                )));
            }
        }
    }

    fn is_termination_requested(&self) -> bool {
        self.sentinel.as_ref().is_some_and(|path| path.exists())
    }

    fn set_status(&self, status: RunStatus) {
        if status == RunStatus::Running {
            self.best.set(None);
        }
        debug!(%status, "Run status changed");
    }

    fn put_error(&self, error: &EngineError) {
        if error.is_graceful() {
            info!("Run stopped on request");
        } else {
            error!(%error, "Run failed");
        }
    }
}
