use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Compound Evolver CLI - evolve reaction products against an external scoring pipeline with a genetic algorithm.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Number of worker threads running candidate pipelines.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a single evolution and write its artifacts to a run directory.
    Evolve(EvolveArgs),
    /// Run one evolution per point of a parameter grid.
    Sweep(SweepArgs),
}

/// Options shared by every command that runs evolutions.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Path to the run configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// Output directory. Created when missing.
    #[arg(short, long, required = true, value_name = "DIR")]
    pub output: PathBuf,

    // --- Chemistry Overrides ---
    /// Override the receptor structure (XYZ) used for the exclusion-shape check.
    #[arg(long, value_name = "PATH")]
    pub receptor: Option<PathBuf>,

    /// Ignore configured scoring commands and score candidates by product mass.
    #[arg(long)]
    pub dummy_fitness: bool,

    // --- Evolution Overrides ---
    /// Override the population size.
    #[arg(short, long, value_name = "INT")]
    pub population_size: Option<usize>,

    /// Override the generation limit of the fixed-generation termination.
    #[arg(short = 'g', long, value_name = "INT")]
    pub max_generations: Option<usize>,

    /// Seed the random number generator for a reproducible run.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,

    /// Keep every file a pipeline writes to candidate directories.
    #[arg(long)]
    pub no_cleanup: bool,

    /// Set an evolution parameter, overriding the config file.
    /// Can be used multiple times. Example: -S mutation-rate=0.2
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `evolve` subcommand.
#[derive(Args, Debug)]
pub struct EvolveArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

/// Arguments for the `sweep` subcommand.
#[derive(Args, Debug)]
pub struct SweepArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// JSON object mapping parameter names to value lists.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub ranges: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evolve_parses_overrides_and_globals() {
        let cli = Cli::parse_from([
            "evolver", "-vv", "-j", "3", "evolve", "-c", "run.toml", "-o", "out", "-p", "20",
            "-g", "7", "--seed", "11", "-S", "mutation-rate=0.3", "-S", "booster=combinatorial",
        ]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.threads, Some(3));
        let Commands::Evolve(args) = cli.command else {
            panic!("Expected 'evolve' subcommand");
        };
        assert_eq!(args.run.config, PathBuf::from("run.toml"));
        assert_eq!(args.run.population_size, Some(20));
        assert_eq!(args.run.max_generations, Some(7));
        assert_eq!(args.run.seed, Some(11));
        assert_eq!(
            args.run.set_values,
            vec!["mutation-rate=0.3", "booster=combinatorial"]
        );
    }

    #[test]
    fn sweep_requires_ranges() {
        assert!(Cli::try_parse_from(["evolver", "sweep", "-c", "a.toml", "-o", "out"]).is_err());
        let cli = Cli::parse_from([
            "evolver", "sweep", "-c", "a.toml", "-o", "out", "-r", "ranges.json",
        ]);
        let Commands::Sweep(args) = cli.command else {
            panic!("Expected 'sweep' subcommand");
        };
        assert_eq!(args.ranges, PathBuf::from("ranges.json"));
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(
            Cli::try_parse_from(["evolver", "-q", "-v", "evolve", "-c", "a", "-o", "b"]).is_err()
        );
    }
}
