//! Bounded worker pool that runs a candidate pipeline over a batch of candidates.
//!
//! Every task owns its candidate and a private scratch directory. A failing task never
//! affects its siblings: its error is collected as a [`TaskFailure`] and the candidate is
//! dropped. The collecting thread waits for results in short slices and checks the
//! cooperative cancellation signal between them.

use super::config::ExecutorConfig;
use super::context::{PIPELINE_LOG, RunContext};
use super::error::EngineError;
use super::pipeline::{CandidatePipeline, PipelineError};
use super::progress::{Progress, ProgressReporter};
use crate::core::models::candidate::Candidate;
use crate::core::models::ids::CandidateId;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Per-task limit. A running task is timed from the moment a worker picks it up, a
    /// queued one from the latest point it could have started had every task ahead of it
    /// used its full allowance.
    pub timeout: Option<Duration>,
    pub label: &'static str,
}

impl BatchOptions {
    pub fn scoring() -> Self {
        Self {
            timeout: None,
            label: "scoring",
        }
    }

    pub fn sampling(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            label: "sampling",
        }
    }
}

#[derive(Debug)]
pub struct TaskFailure {
    pub id: CandidateId,
    pub genotype: Vec<usize>,
    pub error: PipelineError,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Successful candidates in submission order.
    pub completed: Vec<Candidate>,
    pub failures: Vec<TaskFailure>,
}

enum TaskEvent {
    Started { slot: usize },
    Finished {
        slot: usize,
        result: Result<Candidate, TaskFailure>,
    },
}

/// Bookkeeping of the collecting thread, indexed by submission slot.
struct BatchState {
    started: Vec<Option<Instant>>,
    resolved: Vec<bool>,
    results: Vec<Option<Candidate>>,
    failures: Vec<TaskFailure>,
    remaining: usize,
}

impl BatchState {
    fn new(total: usize) -> Self {
        Self {
            started: vec![None; total],
            resolved: vec![false; total],
            results: (0..total).map(|_| None).collect(),
            failures: Vec::new(),
            remaining: total,
        }
    }

    fn apply(&mut self, event: TaskEvent, reporter: &ProgressReporter) {
        match event {
            TaskEvent::Started { slot } => self.started[slot] = Some(Instant::now()),
            TaskEvent::Finished { slot, result } => self.resolve(slot, result, reporter),
        }
    }

    /// First resolution wins; a late result of a timed-out task is dropped.
    fn resolve(
        &mut self,
        slot: usize,
        result: Result<Candidate, TaskFailure>,
        reporter: &ProgressReporter,
    ) {
        if self.resolved[slot] {
            return;
        }
        self.resolved[slot] = true;
        self.remaining -= 1;
        reporter.report(Progress::TaskIncrement);
        match result {
            Ok(candidate) => self.results[slot] = Some(candidate),
            Err(failure) => self.failures.push(failure),
        }
    }
}

pub struct PipelineExecutor {
    pool: ThreadPool,
    context: Arc<RunContext>,
    config: ExecutorConfig,
    in_flight: Arc<AtomicUsize>,
}

impl PipelineExecutor {
    pub fn new(config: ExecutorConfig, context: Arc<RunContext>) -> Result<Self, EngineError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .thread_name(|i| format!("evolver-worker-{i}"))
            .build()
            .map_err(|e| EngineError::Initialization(format!("cannot build worker pool: {e}")))?;
        info!(workers = config.workers.max(1), "Worker pool started");
        Ok(Self {
            pool,
            context,
            config,
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.context
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs `pipeline` over every candidate and waits until each task resolved.
    ///
    /// Returns [`EngineError::ForcedTermination`] as soon as `cancelled` reports true;
    /// remaining tasks are told to stop through the run context and their results are
    /// discarded.
    pub fn run_batch(
        &self,
        pipeline: &CandidatePipeline,
        candidates: Vec<Candidate>,
        options: BatchOptions,
        cancelled: &dyn Fn() -> bool,
        reporter: &ProgressReporter,
    ) -> Result<BatchOutcome, EngineError> {
        let total = candidates.len();
        let (tx, rx) = mpsc::channel();
        let mut submitted = Vec::with_capacity(total);

        for (slot, candidate) in candidates.into_iter().enumerate() {
            submitted.push((candidate.id(), candidate.genotype().to_vec()));
            let tx = tx.clone();
            let pipeline = Arc::clone(pipeline);
            let context = Arc::clone(&self.context);
            let in_flight = Arc::clone(&self.in_flight);
            let cleanup = self.config.cleanup;
            let label = options.label;

            in_flight.fetch_add(1, Ordering::SeqCst);
            self.pool.spawn(move || {
                let _ = tx.send(TaskEvent::Started { slot });
                let result = run_task(&pipeline, &context, candidate, cleanup, label);
                in_flight.fetch_sub(1, Ordering::SeqCst);
                let _ = tx.send(TaskEvent::Finished { slot, result });
            });
        }
        drop(tx);

        reporter.report(Progress::TaskStart {
            total_steps: total as u64,
        });

        let mut state = BatchState::new(total);
        let batch_start = Instant::now();
        let workers = self.config.workers.max(1);

        while state.remaining > 0 {
            if cancelled() {
                self.context.request_termination();
                warn!(
                    batch = options.label,
                    outstanding = state.remaining,
                    "Termination requested; abandoning batch"
                );
                reporter.report(Progress::TaskFinish);
                return Err(EngineError::ForcedTermination);
            }

            match rx.recv_timeout(self.config.poll_interval) {
                Ok(event) => {
                    state.apply(event, reporter);
                    while let Ok(event) = rx.try_recv() {
                        state.apply(event, reporter);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(EngineError::Internal(format!(
                        "{} {} tasks vanished without reporting a result",
                        state.remaining, options.label
                    )));
                }
            }

            if let Some(limit) = options.timeout {
                let now = Instant::now();
                for slot in 0..total {
                    if state.resolved[slot] {
                        continue;
                    }
                    // A queued task waits behind at most `slot / workers` rounds of tasks that
                    // are each cut off at `limit`.
                    let deadline = match state.started[slot] {
                        Some(at) => at + limit,
                        None => batch_start + limit * (slot / workers + 1) as u32,
                    };
                    if now <= deadline {
                        continue;
                    }
                    let (id, genotype) = submitted[slot].clone();
                    self.context.cancel_candidate(id);
                    warn!(
                        candidate = %id,
                        batch = options.label,
                        queued = state.started[slot].is_none(),
                        "Task exceeded {:?}", limit
                    );
                    state.resolve(
                        slot,
                        Err(TaskFailure {
                            id,
                            genotype,
                            error: PipelineError::infrastructure(format!(
                                "{} task timed out after {:?}",
                                options.label, limit
                            )),
                        }),
                        reporter,
                    );
                }
            }
        }

        reporter.report(Progress::TaskFinish);
        debug!(
            batch = options.label,
            completed = total - state.failures.len(),
            failed = state.failures.len(),
            "Batch resolved"
        );
        Ok(BatchOutcome {
            completed: state.results.into_iter().flatten().collect(),
            failures: state.failures,
        })
    }

    /// Removes candidate directories that ended up empty. Returns how many were removed.
    pub fn remove_empty_dirs(&self) -> Result<usize, EngineError> {
        let run_dir = self.context.run_dir();
        let entries = match fs::read_dir(run_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(EngineError::io(run_dir, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(|e| EngineError::io(run_dir, e))?.path();
            if !path.is_dir() {
                continue;
            }
            let empty = fs::read_dir(&path)
                .map(|mut it| it.next().is_none())
                .unwrap_or(false);
            if empty && fs::remove_dir(&path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Waits up to the grace period for in-flight tasks, then tells the stragglers to stop
    /// and releases the pool. Returns the number of tasks still running at that point.
    pub fn shutdown(self) -> usize {
        let deadline = Instant::now() + self.config.shutdown_grace;
        while self.in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            std::thread::sleep(self.config.poll_interval.min(Duration::from_millis(20)));
        }
        let stragglers = self.in_flight.load(Ordering::SeqCst);
        if stragglers > 0 {
            self.context.request_termination();
            warn!(tasks = stragglers, "Forcing worker pool shutdown");
        } else {
            debug!("Worker pool shut down cleanly");
        }
        stragglers
    }
}

fn run_task(
    pipeline: &CandidatePipeline,
    context: &RunContext,
    mut candidate: Candidate,
    cleanup: bool,
    label: &str,
) -> Result<Candidate, TaskFailure> {
    let id = candidate.id();
    let genotype = candidate.genotype().to_vec();
    let fail = |error: PipelineError| TaskFailure {
        id,
        genotype: genotype.clone(),
        error,
    };

    if context.should_stop(id) {
        return Err(fail(PipelineError::Terminated));
    }

    let dir = context.candidate_dir(id);
    fs::create_dir_all(&dir).map_err(|e| {
        fail(PipelineError::infrastructure_with(
            format!("cannot create scratch directory {}", dir.display()),
            e,
        ))
    })?;
    append_log(&dir, &format!("[{label}] started, genotype {genotype:?}"));
    candidate.set_workdir(dir.clone());

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| pipeline.execute(candidate)))
        .unwrap_or_else(|payload| {
            Err(PipelineError::infrastructure(format!(
                "pipeline step panicked: {}",
                panic_message(payload.as_ref())
            )))
        });

    match outcome {
        Ok(candidate) => {
            append_log(&dir, &format!("[{label}] finished, raw score {:?}", candidate.raw_score()));
            if cleanup {
                purge_scratch(&dir, true);
            }
            Ok(candidate)
        }
        Err(error) => {
            context.record_failure();
            match &error {
                PipelineError::CandidateInvalid { message } => {
                    debug!(candidate = %id, "Candidate rejected: {}", message);
                    if cleanup {
                        purge_scratch(&dir, false);
                    }
                }
                PipelineError::Infrastructure { .. } => {
                    warn!(candidate = %id, error = %error, "Pipeline infrastructure failure");
                    append_log(&dir, &format!("[{label}] failed: {error}"));
                }
                PipelineError::Terminated => {
                    append_log(&dir, &format!("[{label}] terminated"));
                }
            }
            Err(fail(error))
        }
    }
}

fn append_log(dir: &Path, line: &str) {
    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(PIPELINE_LOG))
        .and_then(|mut file| writeln!(file, "{line}"));
    if let Err(e) = written {
        warn!(dir = %dir.display(), "Cannot write pipeline log: {}", e);
    }
}

/// Deletes scratch contents. The pipeline log survives when `keep_log` is set.
fn purge_scratch(dir: &Path, keep_log: bool) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if keep_log && entry.file_name() == PIPELINE_LOG {
            continue;
        }
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(e) = removed {
            debug!(path = %path.display(), "Cannot purge scratch entry: {}", e);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::pipeline::step_fn;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    fn executor(dir: &TempDir, workers: usize) -> PipelineExecutor {
        let config = ExecutorConfig {
            workers,
            poll_interval: Duration::from_millis(5),
            shutdown_grace: Duration::from_millis(200),
            ..ExecutorConfig::default()
        };
        PipelineExecutor::new(config, Arc::new(RunContext::new(dir.path()))).unwrap()
    }

    fn batch(context: &RunContext, n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| Candidate::new(context.next_id(), vec![i]))
            .collect()
    }

    fn score_by_gene() -> CandidatePipeline {
        Arc::new(step_fn(|mut c: Candidate| {
            if c.genotype()[0] == 3 {
                return Err(PipelineError::invalid("gene 3 never reacts"));
            }
            let raw = -(c.genotype()[0] as f64);
            c.set_raw_score(raw)?;
            Ok(c)
        }))
    }

    #[test]
    fn failures_are_isolated_per_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 4);
        let candidates = batch(exec.context(), 10);

        let outcome = exec
            .run_batch(
                &score_by_gene(),
                candidates,
                BatchOptions::scoring(),
                &|| false,
                &ProgressReporter::new(),
            )
            .unwrap();

        assert_eq!(outcome.completed.len(), 9);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].error.is_candidate_invalid());
        assert_eq!(outcome.failures[0].genotype, vec![3]);
        let genes: Vec<usize> = outcome.completed.iter().map(|c| c.genotype()[0]).collect();
        assert_eq!(genes, vec![0, 1, 2, 4, 5, 6, 7, 8, 9]);
        assert_eq!(exec.shutdown(), 0);
    }

    #[test]
    fn panicking_step_becomes_infrastructure_failure() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 2);
        let pipeline: CandidatePipeline = Arc::new(step_fn(|c: Candidate| {
            if c.genotype()[0] == 1 {
                panic!("tool crashed");
            }
            Ok(c)
        }));
        let candidates = batch(exec.context(), 3);

        let outcome = exec
            .run_batch(&pipeline, candidates, BatchOptions::scoring(), &|| false, &ProgressReporter::new())
            .unwrap();
        assert_eq!(outcome.completed.len(), 2);
        match &outcome.failures[0].error {
            PipelineError::Infrastructure { message, .. } => assert!(message.contains("tool crashed")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancellation_aborts_with_forced_termination() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 1);
        let pipeline: CandidatePipeline = Arc::new(step_fn(|c: Candidate| {
            std::thread::sleep(Duration::from_millis(50));
            Ok(c)
        }));
        let candidates = batch(exec.context(), 20);
        let flag = AtomicBool::new(false);
        let polls = AtomicUsize::new(0);
        let cancelled = || {
            if polls.fetch_add(1, Ordering::SeqCst) > 3 {
                flag.store(true, Ordering::SeqCst);
            }
            flag.load(Ordering::SeqCst)
        };

        let err = exec
            .run_batch(&pipeline, candidates, BatchOptions::scoring(), &cancelled, &ProgressReporter::new())
            .unwrap_err();
        assert!(err.is_graceful());
        assert!(exec.context().is_aborted());
    }

    #[test]
    fn sampling_tasks_time_out() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 2);
        let pipeline: CandidatePipeline = Arc::new(step_fn(|c: Candidate| {
            if c.genotype()[0] == 0 {
                std::thread::sleep(Duration::from_millis(400));
            }
            Ok(c)
        }));
        let candidates = batch(exec.context(), 2);

        let outcome = exec
            .run_batch(
                &pipeline,
                candidates,
                BatchOptions::sampling(Duration::from_millis(50)),
                &|| false,
                &ProgressReporter::new(),
            )
            .unwrap();
        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].genotype, vec![0]);
    }

    #[test]
    fn a_step_that_never_returns_cannot_stall_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 1);
        let pipeline: CandidatePipeline =
            Arc::new(step_fn(|_: Candidate| -> Result<Candidate, PipelineError> {
                loop {
                    std::thread::sleep(Duration::from_millis(20));
                }
            }));
        let candidates = batch(exec.context(), 3);

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let outcome = exec.run_batch(
                &pipeline,
                candidates,
                BatchOptions::sampling(Duration::from_millis(50)),
                &|| false,
                &ProgressReporter::new(),
            );
            let _ = tx.send(outcome);
        });

        let outcome = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("batch resolves even with the only worker stuck")
            .unwrap();
        assert!(outcome.completed.is_empty());
        assert_eq!(outcome.failures.len(), 3);
        assert!(outcome.failures.iter().all(|f| !f.error.is_candidate_invalid()));
    }

    #[test]
    fn timed_out_tasks_are_told_to_stop_and_free_their_worker() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 1);
        let context = Arc::clone(exec.context());
        let pipeline: CandidatePipeline = Arc::new(step_fn(move |c: Candidate| {
            if c.genotype()[0] == 0 {
                while !context.should_stop(c.id()) {
                    std::thread::sleep(Duration::from_millis(5));
                }
                return Err(PipelineError::Terminated);
            }
            Ok(c)
        }));
        let candidates = batch(exec.context(), 3);
        let stuck = candidates[0].id();

        let outcome = exec
            .run_batch(
                &pipeline,
                candidates,
                BatchOptions::sampling(Duration::from_millis(100)),
                &|| false,
                &ProgressReporter::new(),
            )
            .unwrap();

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].id, stuck);
        let genes: Vec<usize> = outcome.completed.iter().map(|c| c.genotype()[0]).collect();
        assert_eq!(genes, vec![1, 2]);
        assert!(!exec.context().is_aborted());
    }

    #[test]
    fn cleanup_keeps_only_the_pipeline_log() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 1);
        let pipeline: CandidatePipeline = Arc::new(step_fn(|c: Candidate| {
            let workdir = c.workdir().map(Path::to_path_buf).ok_or_else(|| {
                PipelineError::infrastructure("no workdir")
            })?;
            fs::write(workdir.join("pose.xyz"), "1\n\nC 0 0 0\n")?;
            Ok(c)
        }));
        let candidates = batch(exec.context(), 1);
        let id = candidates[0].id();

        exec.run_batch(&pipeline, candidates, BatchOptions::scoring(), &|| false, &ProgressReporter::new())
            .unwrap();

        let scratch = exec.context().candidate_dir(id);
        let names: Vec<_> = fs::read_dir(&scratch)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![PIPELINE_LOG.to_string()]);
        let log = fs::read_to_string(scratch.join(PIPELINE_LOG)).unwrap();
        assert!(log.contains("[scoring] started"));
        assert!(log.contains("[scoring] finished"));
    }

    #[test]
    fn rejected_candidates_leave_empty_dirs_that_get_removed() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 2);
        let candidates = batch(exec.context(), 5);

        exec.run_batch(&score_by_gene(), candidates, BatchOptions::scoring(), &|| false, &ProgressReporter::new())
            .unwrap();
        assert_eq!(exec.remove_empty_dirs().unwrap(), 1);
        assert_eq!(exec.remove_empty_dirs().unwrap(), 0);
    }
}
