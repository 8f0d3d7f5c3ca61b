use crate::error::{CliError, Result};
use compound_evolver::engine::config::ValidityLimits;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileReaction {
    pub name: Option<String>,
    pub reactant_lists: Vec<usize>,
    pub mass_loss: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileChemistryConfig {
    #[serde(default)]
    pub reactant_files: Vec<PathBuf>,
    #[serde(default)]
    pub reactions: Vec<FileReaction>,
    pub receptor: Option<PathBuf>,
    pub exclusion_tolerance: Option<f64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileScoringTarget {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileScoringConfig {
    #[serde(default, rename = "target")]
    pub targets: Vec<FileScoringTarget>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileLimitsConfig {
    pub max_molecular_mass: Option<f64>,
    pub max_log_p: Option<f64>,
    pub max_hydrogen_bond_donors: Option<usize>,
    pub max_hydrogen_bond_acceptors: Option<usize>,
}

impl From<FileLimitsConfig> for ValidityLimits {
    fn from(p: FileLimitsConfig) -> Self {
        Self {
            max_molecular_mass: p.max_molecular_mass,
            max_log_p: p.max_log_p,
            max_hydrogen_bond_donors: p.max_hydrogen_bond_donors,
            max_hydrogen_bond_acceptors: p.max_hydrogen_bond_acceptors,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileExecutorConfig {
    pub workers: Option<usize>,
    pub cleanup: Option<bool>,
    pub sampling_timeout_secs: Option<f64>,
    pub poll_interval_ms: Option<u64>,
    pub shutdown_grace_secs: Option<f64>,
}

/// The run configuration file as written by the user. Evolution parameters are kept as
/// raw key/value pairs and resolved through the engine's parameter key table.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileConfig {
    pub chemistry: Option<FileChemistryConfig>,
    pub scoring: Option<FileScoringConfig>,
    #[serde(default)]
    pub evolution: BTreeMap<String, toml::Value>,
    pub limits: Option<FileLimitsConfig>,
    pub executor: Option<FileExecutorConfig>,
}

impl FileConfig {
    /// Reads the file and makes relative paths inside it relative to the file's folder.
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let mut config: Self =
            toml::from_str(&content).map_err(|e| CliError::parsing(path, e))?;
        if let Some(base) = path.parent() {
            config.anchor_paths(base);
        }
        Ok(config)
    }

    fn anchor_paths(&mut self, base: &Path) {
        let Some(chemistry) = self.chemistry.as_mut() else {
            return;
        };
        for file in &mut chemistry.reactant_files {
            *file = anchor(base, file);
        }
        if let Some(receptor) = chemistry.receptor.as_mut() {
            *receptor = anchor(base, receptor);
        }
    }
}

fn anchor(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Renders a TOML scalar the way a user would type it after `-S key=`.
pub fn scalar_text(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parses_sections_and_anchors_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(
            &path,
            r#"
            [chemistry]
            reactant-files = ["amines.txt", "/abs/acids.txt"]
            receptor = "receptor.xyz"

            [[chemistry.reactions]]
            name = "amide"
            reactant-lists = [0, 1]
            mass-loss = 18.02

            [[scoring.target]]
            command = "./dock.sh"
            args = ["--fast"]

            [evolution]
            population-size = 30
            termination = "convergence"
            mutation-rate = 0.25

            [limits]
            max-molecular-mass = 500.0
            "#,
        )
        .unwrap();

        let config = FileConfig::from_file(&path).unwrap();
        let chemistry = config.chemistry.unwrap();
        assert_eq!(chemistry.reactant_files[0], dir.path().join("amines.txt"));
        assert_eq!(chemistry.reactant_files[1], PathBuf::from("/abs/acids.txt"));
        assert_eq!(chemistry.receptor, Some(dir.path().join("receptor.xyz")));
        assert_eq!(chemistry.reactions[0].reactant_lists, vec![0, 1]);
        assert_eq!(config.scoring.unwrap().targets[0].args, vec!["--fast"]);
        assert_eq!(
            scalar_text(&config.evolution["population-size"]).as_deref(),
            Some("30")
        );
        assert_eq!(
            scalar_text(&config.evolution["termination"]).as_deref(),
            Some("convergence")
        );
        assert_eq!(config.limits.unwrap().max_molecular_mass, Some(500.0));
    }

    #[test]
    fn unknown_sections_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[forcefield]\ns-factor = 1.1\n").unwrap();
        assert!(matches!(
            FileConfig::from_file(&path),
            Err(CliError::FileParsing { .. })
        ));
    }
}
