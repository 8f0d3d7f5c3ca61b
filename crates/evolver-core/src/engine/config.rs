use crate::core::fitness::{FitnessAggregation, FitnessMeasure};
use crate::core::models::candidate::InterspeciesCrossover;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const RATE_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Rate '{name}' must lie in [0, 1], got {value}")]
    InvalidRate { name: &'static str, value: f64 },

    #[error(
        "Crossover ({crossover}) + random immigrant ({immigrant}) + elitist ({elitist}) rates must sum to 1"
    )]
    RateSum {
        crossover: f64,
        immigrant: f64,
        elitist: f64,
    },

    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("Unknown parameter key '{0}'")]
    UnknownKey(String),

    #[error("Cannot parse '{value}' for parameter '{key}'")]
    UnparsableValue { key: String, value: String },
}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)? }) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let text = match self {
                    $($name::$variant => $text),+
                };
                f.write_str(text)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().replace('_', "-").as_str() {
                    $($text $(| $alias)* => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationCondition {
    #[default]
    FixedGenerations,
    Convergence,
    Duration,
    MaxCandidateCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionMethod {
    #[default]
    FitnessProportionate,
    Truncated,
    Tournament,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MutationMethod {
    #[default]
    DistanceIndependent,
    DistanceDependent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SpeciesDetermination {
    /// Every candidate keeps the species it was created for.
    Fixed,
    /// A candidate belongs to the first species whose reaction accepts its reactants.
    #[default]
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BoosterMode {
    #[default]
    None,
    Combinatorial,
    ReactantReweighting,
}

string_enum!(TerminationCondition {
    FixedGenerations => "fixed-generations" | "fixed-generation-number" | "fixed",
    Convergence => "convergence",
    Duration => "duration",
    MaxCandidateCount => "max-candidate-count" | "candidate-count",
});

string_enum!(SelectionMethod {
    FitnessProportionate => "fitness-proportionate" | "roulette",
    Truncated => "truncated",
    Tournament => "tournament",
});

string_enum!(MutationMethod {
    DistanceIndependent => "distance-independent",
    DistanceDependent => "distance-dependent",
});

string_enum!(SpeciesDetermination {
    Fixed => "fixed",
    Dynamic => "dynamic",
});

string_enum!(BoosterMode {
    None => "none",
    Combinatorial => "combinatorial",
    ReactantReweighting => "reactant-reweighting" | "reweighting",
});

/// Upper/lower bounds a reaction product must satisfy before it may join the population.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidityLimits {
    pub max_molecular_mass: Option<f64>,
    pub max_log_p: Option<f64>,
    pub max_hydrogen_bond_donors: Option<usize>,
    pub max_hydrogen_bond_acceptors: Option<usize>,
}

/// Immutable genetic-algorithm configuration. Built through [`GAParametersBuilder`], read
/// only by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GAParameters {
    pub population_size: usize,
    pub max_generations: usize,
    pub max_duration: Duration,
    pub target_candidate_count: usize,
    pub selection_rate: f64,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    pub random_immigrant_rate: f64,
    pub elitist_rate: f64,
    pub tournament_size: usize,
    pub non_improving_factor: f64,
    pub convergence_min_generations: usize,
    pub max_anchor_rmsd: f64,
    pub termination: TerminationCondition,
    pub fitness_measure: FitnessMeasure,
    pub fitness_aggregation: FitnessAggregation,
    pub selection_method: SelectionMethod,
    pub mutation_method: MutationMethod,
    pub interspecies_crossover: InterspeciesCrossover,
    pub species_determination: SpeciesDetermination,
    pub booster: BoosterMode,
    pub booster_top_reactants: usize,
    pub booster_generations: usize,
    pub max_combinations: usize,
    pub limits: ValidityLimits,
    pub seed: Option<u64>,
}

impl Default for GAParameters {
    fn default() -> Self {
        Self {
            population_size: 50,
            max_generations: 25,
            max_duration: Duration::from_secs(10 * 60),
            target_candidate_count: 500,
            selection_rate: 0.4,
            mutation_rate: 0.1,
            crossover_rate: 0.8,
            random_immigrant_rate: 0.1,
            elitist_rate: 0.1,
            tournament_size: 2,
            non_improving_factor: 1.0,
            convergence_min_generations: 5,
            max_anchor_rmsd: 1.0,
            termination: TerminationCondition::FixedGenerations,
            fitness_measure: FitnessMeasure::Affinity,
            fitness_aggregation: FitnessAggregation::Product,
            selection_method: SelectionMethod::FitnessProportionate,
            mutation_method: MutationMethod::DistanceIndependent,
            interspecies_crossover: InterspeciesCrossover::Complete,
            species_determination: SpeciesDetermination::Dynamic,
            booster: BoosterMode::None,
            booster_top_reactants: 5,
            booster_generations: 5,
            max_combinations: 1000,
            limits: ValidityLimits::default(),
            seed: None,
        }
    }
}

impl GAParameters {
    pub fn builder() -> GAParametersBuilder {
        GAParametersBuilder::new()
    }

    /// Checks every cross-field invariant. [`GAParametersBuilder::build`] calls this, so a
    /// `GAParameters` obtained from the builder is always valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("selection-rate", self.selection_rate),
            ("mutation-rate", self.mutation_rate),
            ("crossover-rate", self.crossover_rate),
            ("random-immigrant-rate", self.random_immigrant_rate),
            ("elitist-rate", self.elitist_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidRate { name, value });
            }
        }

        let sum = self.crossover_rate + self.random_immigrant_rate + self.elitist_rate;
        if self.crossover_rate + self.random_immigrant_rate > 1.0 + RATE_SUM_TOLERANCE
            || (sum - 1.0).abs() > RATE_SUM_TOLERANCE
        {
            return Err(ConfigError::RateSum {
                crossover: self.crossover_rate,
                immigrant: self.random_immigrant_rate,
                elitist: self.elitist_rate,
            });
        }

        if self.population_size == 0 {
            return Err(invalid("population-size", "must be at least 1"));
        }
        if self.selection_rate == 0.0 {
            return Err(invalid("selection-rate", "must select at least one parent"));
        }
        if self.tournament_size == 0 {
            return Err(invalid("tournament-size", "must be at least 1"));
        }
        if !(self.non_improving_factor.is_finite() && self.non_improving_factor >= 0.0) {
            return Err(invalid("non-improving-factor", "must be a non-negative number"));
        }
        if self.max_anchor_rmsd.is_nan() || self.max_anchor_rmsd < 0.0 {
            return Err(invalid("max-anchor-rmsd", "must be non-negative"));
        }
        if self.mutation_method == MutationMethod::DistanceDependent && self.mutation_rate == 0.0
        {
            return Err(invalid(
                "mutation-rate",
                "distance-dependent mutation needs a non-zero rate",
            ));
        }
        if self.booster == BoosterMode::ReactantReweighting && self.booster_top_reactants == 0 {
            return Err(invalid("booster-top-reactants", "must keep at least one reactant"));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        reason: reason.to_string(),
    }
}

#[derive(Debug, Default, Clone)]
pub struct GAParametersBuilder {
    population_size: Option<usize>,
    max_generations: Option<usize>,
    max_duration: Option<Duration>,
    target_candidate_count: Option<usize>,
    selection_rate: Option<f64>,
    mutation_rate: Option<f64>,
    crossover_rate: Option<f64>,
    random_immigrant_rate: Option<f64>,
    elitist_rate: Option<f64>,
    tournament_size: Option<usize>,
    non_improving_factor: Option<f64>,
    convergence_min_generations: Option<usize>,
    max_anchor_rmsd: Option<f64>,
    termination: Option<TerminationCondition>,
    fitness_measure: Option<FitnessMeasure>,
    fitness_aggregation: Option<FitnessAggregation>,
    selection_method: Option<SelectionMethod>,
    mutation_method: Option<MutationMethod>,
    interspecies_crossover: Option<InterspeciesCrossover>,
    species_determination: Option<SpeciesDetermination>,
    booster: Option<BoosterMode>,
    booster_top_reactants: Option<usize>,
    booster_generations: Option<usize>,
    max_combinations: Option<usize>,
    limits: Option<ValidityLimits>,
    seed: Option<u64>,
}

macro_rules! setters {
    ($($field:ident: $ty:ty),+ $(,)?) => {
        $(
            pub fn $field(mut self, value: $ty) -> Self {
                self.$field = Some(value);
                self
            }
        )+
    };
}

impl GAParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    setters! {
        population_size: usize,
        max_generations: usize,
        max_duration: Duration,
        target_candidate_count: usize,
        selection_rate: f64,
        mutation_rate: f64,
        crossover_rate: f64,
        random_immigrant_rate: f64,
        elitist_rate: f64,
        tournament_size: usize,
        non_improving_factor: f64,
        convergence_min_generations: usize,
        max_anchor_rmsd: f64,
        termination: TerminationCondition,
        fitness_measure: FitnessMeasure,
        fitness_aggregation: FitnessAggregation,
        selection_method: SelectionMethod,
        mutation_method: MutationMethod,
        interspecies_crossover: InterspeciesCrossover,
        species_determination: SpeciesDetermination,
        booster: BoosterMode,
        booster_top_reactants: usize,
        booster_generations: usize,
        max_combinations: usize,
        limits: ValidityLimits,
        seed: u64,
    }

    /// Builds the parameters, filling gaps from [`GAParameters::default`]. The elitist
    /// rate defaults to whatever crossover and random immigrants leave over.
    pub fn build(self) -> Result<GAParameters, ConfigError> {
        let d = GAParameters::default();
        let crossover_rate = self.crossover_rate.unwrap_or(d.crossover_rate);
        let random_immigrant_rate = self.random_immigrant_rate.unwrap_or(d.random_immigrant_rate);
        let elitist_rate = self
            .elitist_rate
            .unwrap_or((1.0 - crossover_rate - random_immigrant_rate).max(0.0));

        let params = GAParameters {
            population_size: self.population_size.unwrap_or(d.population_size),
            max_generations: self.max_generations.unwrap_or(d.max_generations),
            max_duration: self.max_duration.unwrap_or(d.max_duration),
            target_candidate_count: self
                .target_candidate_count
                .unwrap_or(d.target_candidate_count),
            selection_rate: self.selection_rate.unwrap_or(d.selection_rate),
            mutation_rate: self.mutation_rate.unwrap_or(d.mutation_rate),
            crossover_rate,
            random_immigrant_rate,
            elitist_rate,
            tournament_size: self.tournament_size.unwrap_or(d.tournament_size),
            non_improving_factor: self.non_improving_factor.unwrap_or(d.non_improving_factor),
            convergence_min_generations: self
                .convergence_min_generations
                .unwrap_or(d.convergence_min_generations),
            max_anchor_rmsd: self.max_anchor_rmsd.unwrap_or(d.max_anchor_rmsd),
            termination: self.termination.unwrap_or(d.termination),
            fitness_measure: self.fitness_measure.unwrap_or(d.fitness_measure),
            fitness_aggregation: self.fitness_aggregation.unwrap_or(d.fitness_aggregation),
            selection_method: self.selection_method.unwrap_or(d.selection_method),
            mutation_method: self.mutation_method.unwrap_or(d.mutation_method),
            interspecies_crossover: self
                .interspecies_crossover
                .unwrap_or(d.interspecies_crossover),
            species_determination: self
                .species_determination
                .unwrap_or(d.species_determination),
            booster: self.booster.unwrap_or(d.booster),
            booster_top_reactants: self
                .booster_top_reactants
                .unwrap_or(d.booster_top_reactants),
            booster_generations: self.booster_generations.unwrap_or(d.booster_generations),
            max_combinations: self.max_combinations.unwrap_or(d.max_combinations),
            limits: self.limits.unwrap_or(d.limits),
            seed: self.seed.or(d.seed),
        };
        params.validate()?;
        Ok(params)
    }
}

/// Executor-side settings of a run: how many workers, how long a sampling task may take,
/// and how the scratch space is managed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    pub workers: usize,
    pub cleanup: bool,
    pub sampling_timeout: Duration,
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            cleanup: true,
            sampling_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}
