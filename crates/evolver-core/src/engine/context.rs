use crate::core::models::ids::{CandidateId, IdSequence};
use dashmap::{DashMap, DashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Name of the file whose presence in the run directory requests termination.
pub const TERMINATION_SENTINEL: &str = "terminate";

/// Name of the append-only log kept in every candidate directory.
pub const PIPELINE_LOG: &str = "pipeline.log";

/// State shared by every task of one run.
///
/// Passed explicitly into worker tasks behind an `Arc`; there is no process-wide state.
#[derive(Debug)]
pub struct RunContext {
    run_dir: PathBuf,
    ids: IdSequence,
    abort: AtomicBool,
    cancelled: DashSet<CandidateId>,
    clash_counts: DashMap<CandidateId, usize>,
    distance_counts: DashMap<CandidateId, usize>,
    scored: AtomicUsize,
    failed: AtomicUsize,
}

impl RunContext {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
            ids: IdSequence::new(),
            abort: AtomicBool::new(false),
            cancelled: DashSet::new(),
            clash_counts: DashMap::new(),
            distance_counts: DashMap::new(),
            scored: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn next_id(&self) -> CandidateId {
        self.ids.next_id()
    }

    pub fn issued_ids(&self) -> u64 {
        self.ids.issued()
    }

    /// Scratch directory owned by candidate `id` for the whole run.
    pub fn candidate_dir(&self, id: CandidateId) -> PathBuf {
        self.run_dir.join(id.to_string())
    }

    pub fn sentinel_path(&self) -> PathBuf {
        self.run_dir.join(TERMINATION_SENTINEL)
    }

    pub fn request_termination(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Whether termination was requested in-process. Cheap enough for workers to poll.
    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Tells the task working on `id` to give up, e.g. after it overran its time limit.
    pub fn cancel_candidate(&self, id: CandidateId) {
        self.cancelled.insert(id);
    }

    /// Polled by long-running steps: true once the run is aborted or the candidate's own
    /// task was cancelled.
    pub fn should_stop(&self, id: CandidateId) -> bool {
        self.is_aborted() || self.cancelled.contains(&id)
    }

    /// Whether termination was requested either in-process or through the sentinel file.
    /// Seeing the sentinel latches the in-process flag.
    pub fn termination_requested(&self) -> bool {
        if self.is_aborted() {
            return true;
        }
        if self.sentinel_path().exists() {
            self.request_termination();
            return true;
        }
        false
    }

    pub fn record_clash(&self, id: CandidateId) -> usize {
        let mut count = self.clash_counts.entry(id).or_insert(0);
        *count += 1;
        *count
    }

    pub fn record_distance_violation(&self, id: CandidateId) -> usize {
        let mut count = self.distance_counts.entry(id).or_insert(0);
        *count += 1;
        *count
    }

    pub fn clash_count(&self, id: CandidateId) -> usize {
        self.clash_counts.get(&id).map_or(0, |c| *c)
    }

    pub fn distance_count(&self, id: CandidateId) -> usize {
        self.distance_counts.get(&id).map_or(0, |c| *c)
    }

    pub fn total_clashes(&self) -> usize {
        self.clash_counts.iter().map(|entry| *entry.value()).sum()
    }

    pub fn total_distance_violations(&self) -> usize {
        self.distance_counts.iter().map(|entry| *entry.value()).sum()
    }

    pub fn add_scored(&self, count: usize) -> usize {
        self.scored.fetch_add(count, Ordering::SeqCst) + count
    }

    pub fn scored_count(&self) -> usize {
        self.scored.load(Ordering::SeqCst)
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn failed_count(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}
