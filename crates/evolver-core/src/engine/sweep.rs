//! Parameter sweeps: a grid of [`GAParameters`] built from value lists per key.
//!
//! Keys resolve through an explicit key-to-setter table ([`ParameterKey`]), so the
//! same table also serves command-line `--set` overrides.

use super::config::{ConfigError, GAParameters, GAParametersBuilder};
use itertools::Itertools;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParameterKey {
    PopulationSize,
    MaxGenerations,
    MaxDurationSeconds,
    TargetCandidateCount,
    SelectionRate,
    MutationRate,
    CrossoverRate,
    RandomImmigrantRate,
    ElitistRate,
    TournamentSize,
    NonImprovingFactor,
    ConvergenceMinGenerations,
    MaxAnchorRmsd,
    Termination,
    FitnessMeasure,
    FitnessAggregation,
    SelectionMethod,
    MutationMethod,
    InterspeciesCrossover,
    SpeciesDetermination,
    Booster,
    BoosterTopReactants,
    BoosterGenerations,
    MaxCombinations,
    Seed,
}

impl ParameterKey {
    pub const ALL: [ParameterKey; 25] = [
        Self::PopulationSize,
        Self::MaxGenerations,
        Self::MaxDurationSeconds,
        Self::TargetCandidateCount,
        Self::SelectionRate,
        Self::MutationRate,
        Self::CrossoverRate,
        Self::RandomImmigrantRate,
        Self::ElitistRate,
        Self::TournamentSize,
        Self::NonImprovingFactor,
        Self::ConvergenceMinGenerations,
        Self::MaxAnchorRmsd,
        Self::Termination,
        Self::FitnessMeasure,
        Self::FitnessAggregation,
        Self::SelectionMethod,
        Self::MutationMethod,
        Self::InterspeciesCrossover,
        Self::SpeciesDetermination,
        Self::Booster,
        Self::BoosterTopReactants,
        Self::BoosterGenerations,
        Self::MaxCombinations,
        Self::Seed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::PopulationSize => "population-size",
            Self::MaxGenerations => "max-generations",
            Self::MaxDurationSeconds => "max-duration",
            Self::TargetCandidateCount => "target-candidate-count",
            Self::SelectionRate => "selection-rate",
            Self::MutationRate => "mutation-rate",
            Self::CrossoverRate => "crossover-rate",
            Self::RandomImmigrantRate => "random-immigrant-rate",
            Self::ElitistRate => "elitist-rate",
            Self::TournamentSize => "tournament-size",
            Self::NonImprovingFactor => "non-improving-factor",
            Self::ConvergenceMinGenerations => "convergence-min-generations",
            Self::MaxAnchorRmsd => "max-anchor-rmsd",
            Self::Termination => "termination",
            Self::FitnessMeasure => "fitness-measure",
            Self::FitnessAggregation => "fitness-aggregation",
            Self::SelectionMethod => "selection-method",
            Self::MutationMethod => "mutation-method",
            Self::InterspeciesCrossover => "interspecies-crossover",
            Self::SpeciesDetermination => "species-determination",
            Self::Booster => "booster",
            Self::BoosterTopReactants => "booster-top-reactants",
            Self::BoosterGenerations => "booster-generations",
            Self::MaxCombinations => "max-combinations",
            Self::Seed => "seed",
        }
    }

    /// Applies `value` to the builder. The value is parsed according to the key.
    pub fn apply(
        self,
        builder: GAParametersBuilder,
        value: &str,
    ) -> Result<GAParametersBuilder, ConfigError> {
        let value = value.trim();
        Ok(match self {
            Self::PopulationSize => builder.population_size(self.parse(value)?),
            Self::MaxGenerations => builder.max_generations(self.parse(value)?),
            Self::MaxDurationSeconds => {
                let seconds: f64 = self.parse(value)?;
                let duration = Duration::try_from_secs_f64(seconds)
                    .map_err(|_| self.unparsable(value))?;
                builder.max_duration(duration)
            }
            Self::TargetCandidateCount => builder.target_candidate_count(self.parse(value)?),
            Self::SelectionRate => builder.selection_rate(self.parse(value)?),
            Self::MutationRate => builder.mutation_rate(self.parse(value)?),
            Self::CrossoverRate => builder.crossover_rate(self.parse(value)?),
            Self::RandomImmigrantRate => builder.random_immigrant_rate(self.parse(value)?),
            Self::ElitistRate => builder.elitist_rate(self.parse(value)?),
            Self::TournamentSize => builder.tournament_size(self.parse(value)?),
            Self::NonImprovingFactor => builder.non_improving_factor(self.parse(value)?),
            Self::ConvergenceMinGenerations => {
                builder.convergence_min_generations(self.parse(value)?)
            }
            Self::MaxAnchorRmsd => builder.max_anchor_rmsd(self.parse(value)?),
            Self::Termination => builder.termination(self.parse(value)?),
            Self::FitnessMeasure => builder.fitness_measure(self.parse(value)?),
            Self::FitnessAggregation => builder.fitness_aggregation(self.parse(value)?),
            Self::SelectionMethod => builder.selection_method(self.parse(value)?),
            Self::MutationMethod => builder.mutation_method(self.parse(value)?),
            Self::InterspeciesCrossover => builder.interspecies_crossover(self.parse(value)?),
            Self::SpeciesDetermination => builder.species_determination(self.parse(value)?),
            Self::Booster => builder.booster(self.parse(value)?),
            Self::BoosterTopReactants => builder.booster_top_reactants(self.parse(value)?),
            Self::BoosterGenerations => builder.booster_generations(self.parse(value)?),
            Self::MaxCombinations => builder.max_combinations(self.parse(value)?),
            Self::Seed => builder.seed(self.parse(value)?),
        })
    }

    fn parse<T: FromStr>(self, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| self.unparsable(value))
    }

    fn unparsable(self, value: &str) -> ConfigError {
        ConfigError::UnparsableValue {
            key: self.name().to_string(),
            value: value.to_string(),
        }
    }
}

impl FromStr for ParameterKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|key| key.name() == normalized)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

/// Value lists per parameter, expanded into their Cartesian product.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSweep {
    ranges: BTreeMap<ParameterKey, Vec<String>>,
}

/// One grid point of a sweep.
#[derive(Debug, Clone)]
pub struct SweepPoint {
    pub assignments: Vec<(ParameterKey, String)>,
    pub params: GAParameters,
}

impl ParameterSweep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, S>(mut self, key: ParameterKey, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ranges
            .insert(key, values.into_iter().map(Into::into).collect());
        self
    }

    /// Reads `{"crossover-rate": [0.6, 0.8], "selection-method": ["truncated"]}`. A
    /// scalar stands for a one-element list.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let raw: BTreeMap<String, Value> =
            serde_json::from_str(text).map_err(|e| ConfigError::InvalidValue {
                name: "parameter-ranges",
                reason: e.to_string(),
            })?;

        let mut sweep = Self::new();
        for (name, value) in raw {
            let key: ParameterKey = name.parse()?;
            let values = match value {
                Value::Array(items) => items.iter().map(scalar_text).collect::<Vec<_>>(),
                other => vec![scalar_text(&other)],
            };
            sweep.ranges.insert(key, values);
        }
        Ok(sweep)
    }

    pub fn keys(&self) -> impl Iterator<Item = ParameterKey> + '_ {
        self.ranges.keys().copied()
    }

    /// Every combination applied on top of `base`. Combinations whose crossover and
    /// random immigrant rates exceed 1 together are skipped; any other invalid
    /// combination is an error.
    pub fn expand(&self, base: &GAParametersBuilder) -> Result<Vec<SweepPoint>, ConfigError> {
        if self.ranges.is_empty() {
            return Ok(vec![SweepPoint {
                assignments: Vec::new(),
                params: base.clone().build()?,
            }]);
        }

        let keys: Vec<ParameterKey> = self.ranges.keys().copied().collect();
        let mut points = Vec::new();
        for combination in self.ranges.values().multi_cartesian_product() {
            let mut builder = base.clone();
            let mut assignments = Vec::with_capacity(keys.len());
            for (&key, value) in keys.iter().zip(combination) {
                builder = key.apply(builder, value)?;
                assignments.push((key, value.clone()));
            }
            match builder.build() {
                Ok(params) => points.push(SweepPoint {
                    assignments,
                    params,
                }),
                Err(ConfigError::RateSum {
                    crossover,
                    immigrant,
                    ..
                }) if crossover + immigrant > 1.0 => {
                    debug!(?assignments, "Skipping combination with crossover + immigrant > 1");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(points)
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
