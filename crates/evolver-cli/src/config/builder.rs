use super::defaults::DefaultsConfig;
use super::file::{self, FileConfig, FileExecutorConfig};
use super::models::{AppConfig, ReactionSpec, ScoringTarget};
use crate::cli::RunArgs;
use crate::error::{CliError, Result};
use crate::utils::parser;
use compound_evolver::engine::config::{ExecutorConfig, GAParameters, GAParametersBuilder};
use compound_evolver::engine::sweep::ParameterKey;
use std::time::Duration;
use tracing::debug;

/// Merges defaults, the config file, `--set` overrides and dedicated flags, in increasing
/// order of precedence.
pub fn build_config(args: &RunArgs, threads: Option<usize>) -> Result<AppConfig> {
    let defaults = DefaultsConfig::default();
    let file_config = FileConfig::from_file(&args.config)?;
    let mut file_config = apply_set_values(file_config, &args.set_values)?;

    let chemistry = file_config.chemistry.take().unwrap_or_default();
    if chemistry.reactant_files.is_empty() {
        return Err(CliError::Config(
            "`chemistry.reactant-files` must name at least one reactant library.".to_string(),
        ));
    }
    let reactions: Vec<ReactionSpec> = if chemistry.reactions.is_empty() {
        // A single reaction over every library when none is configured.
        vec![ReactionSpec {
            name: "reaction-0".to_string(),
            reactant_lists: (0..chemistry.reactant_files.len()).collect(),
            mass_loss: defaults.mass_loss,
        }]
    } else {
        chemistry
            .reactions
            .into_iter()
            .enumerate()
            .map(|(i, r)| ReactionSpec {
                name: r.name.unwrap_or_else(|| format!("reaction-{i}")),
                reactant_lists: r.reactant_lists,
                mass_loss: r.mass_loss.unwrap_or(defaults.mass_loss),
            })
            .collect()
    };

    let scoring = if args.dummy_fitness {
        Vec::new()
    } else {
        file_config
            .scoring
            .take()
            .unwrap_or_default()
            .targets
            .into_iter()
            .map(|t| ScoringTarget {
                command: t.command,
                args: t.args,
            })
            .collect()
    };

    let base_parameters = merge_parameters(&file_config, args)?;
    let parameters = base_parameters.clone().build()?;
    let executor = merge_executor(
        file_config.executor.take().unwrap_or_default(),
        args,
        threads,
        &defaults,
    )?;
    debug!(?parameters, ?executor, "Configuration merged");

    Ok(AppConfig {
        output: args.output.clone(),
        reactant_files: chemistry.reactant_files,
        reactions,
        receptor: args.receptor.clone().or(chemistry.receptor),
        exclusion_tolerance: chemistry
            .exclusion_tolerance
            .unwrap_or(defaults.exclusion_tolerance),
        scoring,
        base_parameters,
        parameters,
        executor,
    })
}

fn merge_parameters(file_config: &FileConfig, args: &RunArgs) -> Result<GAParametersBuilder> {
    let mut builder = GAParameters::builder();
    for (key, value) in &file_config.evolution {
        let text = file::scalar_text(value).ok_or_else(|| {
            CliError::Config(format!("`evolution.{key}` must be a single value"))
        })?;
        builder = key.parse::<ParameterKey>()?.apply(builder, &text)?;
    }
    if let Some(limits) = file_config.limits.clone() {
        builder = builder.limits(limits.into());
    }
    if let Some(population_size) = args.population_size {
        builder = builder.population_size(population_size);
    }
    if let Some(max_generations) = args.max_generations {
        builder = builder.max_generations(max_generations);
    }
    if let Some(seed) = args.seed {
        builder = builder.seed(seed);
    }
    Ok(builder)
}

fn merge_executor(
    file_val: FileExecutorConfig,
    args: &RunArgs,
    threads: Option<usize>,
    defaults: &DefaultsConfig,
) -> Result<ExecutorConfig> {
    let seconds = |name: &str, value: f64| {
        Duration::try_from_secs_f64(value).map_err(|_| {
            CliError::Config(format!("`executor.{name}` must be a non-negative number"))
        })
    };
    let workers = threads
        .or(file_val.workers)
        .unwrap_or_else(|| ExecutorConfig::default().workers);
    if workers == 0 {
        return Err(CliError::Config(
            "The worker count must be at least 1.".to_string(),
        ));
    }
    Ok(ExecutorConfig {
        workers,
        cleanup: !args.no_cleanup && file_val.cleanup.unwrap_or(defaults.cleanup),
        sampling_timeout: seconds(
            "sampling-timeout-secs",
            file_val
                .sampling_timeout_secs
                .unwrap_or(defaults.sampling_timeout_secs),
        )?,
        poll_interval: Duration::from_millis(
            file_val.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
        ),
        shutdown_grace: seconds(
            "shutdown-grace-secs",
            file_val
                .shutdown_grace_secs
                .unwrap_or(defaults.shutdown_grace_secs),
        )?,
    })
}

/// Folds `--set KEY=VALUE` pairs into the file's evolution table. Keys are checked
/// against the parameter key table right away so typos fail before anything runs.
fn apply_set_values(mut config: FileConfig, set_values: &[String]) -> Result<FileConfig> {
    for kv_pair in set_values {
        let (key, value) =
            parser::parse_key_value(kv_pair).map_err(|e| CliError::Argument(e.to_string()))?;
        let key = key.parse::<ParameterKey>()?;
        // Drop spellings of the same key coming from the file.
        config
            .evolution
            .retain(|existing, _| existing.parse::<ParameterKey>().ok() != Some(key));
        config
            .evolution
            .insert(key.name().to_string(), toml::Value::String(value.to_string()));
    }
    Ok(config)
}
