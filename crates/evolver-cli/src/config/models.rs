use compound_evolver::engine::config::{ExecutorConfig, GAParameters, GAParametersBuilder};
use std::path::PathBuf;

/// A reaction over a subset of the reactant libraries, in component order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionSpec {
    pub name: String,
    pub reactant_lists: Vec<usize>,
    /// Mass given off per bond the reaction forms, e.g. water for a condensation.
    pub mass_loss: f64,
}

/// An external program scoring one target. It runs in the candidate directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringTarget {
    pub command: String,
    pub args: Vec<String>,
}

pub struct AppConfig {
    pub output: PathBuf,
    pub reactant_files: Vec<PathBuf>,
    pub reactions: Vec<ReactionSpec>,
    pub receptor: Option<PathBuf>,
    pub exclusion_tolerance: f64,
    /// Empty means mass-based dummy fitness.
    pub scoring: Vec<ScoringTarget>,
    /// Parameter builder with every layer applied, the starting point of sweeps.
    pub base_parameters: GAParametersBuilder,
    pub parameters: GAParameters,
    pub executor: ExecutorConfig,
}
