use super::ids::CandidateId;
use super::molecule::MoleculeHandle;
use super::species::Species;
use crate::core::fitness::{self, FitnessMeasure};
use rand::Rng;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum CandidateError {
    #[error("Candidate {0} was already scored in this pass")]
    AlreadyScored(CandidateId),

    #[error("Candidate {0} has no phenotype to score")]
    MissingPhenotype(CandidateId),

    #[error("Score {score} for candidate {id} is not a finite number")]
    NonFiniteScore { id: CandidateId, score: f64 },
}

/// How crossover treats parents that belong to different species.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InterspeciesCrossover {
    /// Parents of different species do not recombine.
    None,
    /// Genes are mixed only on reactant lists both species use.
    AtSpeciesIntersection,
    /// Genes are mixed on every position regardless of species.
    #[default]
    Complete,
}

impl fmt::Display for InterspeciesCrossover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::AtSpeciesIntersection => "at-species-intersection",
            Self::Complete => "complete",
        })
    }
}

impl std::str::FromStr for InterspeciesCrossover {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "none" => Ok(Self::None),
            "at-species-intersection" | "intersection" => Ok(Self::AtSpeciesIntersection),
            "complete" => Ok(Self::Complete),
            other => Err(format!("unknown interspecies crossover '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Scores {
    pub raw: Option<f64>,
    pub ligand_efficiency: Option<f64>,
    pub lipophilic_efficiency: Option<f64>,
}

/// One sampled molecule with its genotype and scoring state.
///
/// Candidates are uniquely owned: a pipeline takes a candidate by value and hands it back
/// (possibly with new score fields). They are cloned only into generation snapshots.
#[derive(Clone)]
pub struct Candidate {
    id: CandidateId,
    genotype: Vec<usize>,
    species: Option<Arc<Species>>,
    phenotype: Option<MoleculeHandle>,
    pose: Option<MoleculeHandle>,
    workdir: Option<PathBuf>,
    scores: Scores,
    anchor_rmsd: Option<f64>,
    norm_fitness: Option<f64>,
}

impl Candidate {
    pub fn new(id: CandidateId, genotype: Vec<usize>) -> Self {
        Self {
            id,
            genotype,
            species: None,
            phenotype: None,
            pose: None,
            workdir: None,
            scores: Scores::default(),
            anchor_rmsd: None,
            norm_fitness: None,
        }
    }

    pub fn id(&self) -> CandidateId {
        self.id
    }

    pub fn genotype(&self) -> &[usize] {
        &self.genotype
    }

    pub fn species(&self) -> Option<&Arc<Species>> {
        self.species.as_ref()
    }

    pub fn phenotype(&self) -> Option<&MoleculeHandle> {
        self.phenotype.as_ref()
    }

    /// Pins the species this candidate must be realized as, before a reaction has run.
    pub fn with_species(mut self, species: Arc<Species>) -> Self {
        self.species = Some(species);
        self
    }

    /// Attaches the reaction product and the species that produced it.
    pub fn set_phenotype(&mut self, species: Arc<Species>, phenotype: MoleculeHandle) {
        self.species = Some(species);
        self.phenotype = Some(phenotype);
    }

    /// The scored conformer, when a pipeline step produced one. Spatial checks prefer it
    /// over the unplaced phenotype.
    pub fn pose(&self) -> Option<&MoleculeHandle> {
        self.pose.as_ref()
    }

    pub fn set_pose(&mut self, pose: MoleculeHandle) {
        self.pose = Some(pose);
    }

    /// Private scratch directory assigned by the executor for the current pass.
    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    pub fn set_workdir(&mut self, dir: PathBuf) {
        self.workdir = Some(dir);
    }

    /// A fresh, unscored candidate with a new id carrying the same genotype, species and
    /// phenotype.
    pub fn duplicate(&self, id: CandidateId) -> Candidate {
        Candidate {
            id,
            genotype: self.genotype.clone(),
            species: self.species.clone(),
            phenotype: self.phenotype.clone(),
            ..Candidate::new(id, Vec::new())
        }
    }

    /// Reactant indices fed to this candidate's reaction, one per reaction component.
    pub fn reactants(&self) -> Option<Vec<usize>> {
        self.species.as_ref()?.select_reactants(&self.genotype)
    }

    pub fn scores(&self) -> &Scores {
        &self.scores
    }

    pub fn raw_score(&self) -> Option<f64> {
        self.scores.raw
    }

    pub fn is_scored(&self) -> bool {
        self.scores.raw.is_some()
    }

    /// Records the raw score and the derived efficiency scores. A score is set at most once
    /// per pass; call [`Candidate::reset_scores`] before re-scoring.
    pub fn set_raw_score(&mut self, raw: f64) -> Result<(), CandidateError> {
        if self.scores.raw.is_some() {
            return Err(CandidateError::AlreadyScored(self.id));
        }
        if !raw.is_finite() {
            return Err(CandidateError::NonFiniteScore {
                id: self.id,
                score: raw,
            });
        }
        self.scores.raw = Some(raw);
        if let Some(molecule) = &self.phenotype {
            let descriptors = molecule.descriptors();
            self.scores.ligand_efficiency =
                fitness::ligand_efficiency(raw, descriptors.heavy_atom_count);
            self.scores.lipophilic_efficiency =
                fitness::lipophilic_efficiency(raw, descriptors.log_p);
        }
        Ok(())
    }

    pub fn reset_scores(&mut self) {
        self.scores = Scores::default();
        self.norm_fitness = None;
        self.anchor_rmsd = None;
        self.pose = None;
    }

    /// Fitness under the given measure: the negated score, so that higher is better.
    pub fn fitness(&self, measure: FitnessMeasure) -> Option<f64> {
        let score = match measure {
            FitnessMeasure::Affinity => self.scores.raw,
            FitnessMeasure::LigandEfficiency => self.scores.ligand_efficiency,
            FitnessMeasure::LigandLipophilicityEfficiency => self.scores.lipophilic_efficiency,
        }?;
        Some(-score)
    }

    pub fn norm_fitness(&self) -> Option<f64> {
        self.norm_fitness
    }

    pub fn set_norm_fitness(&mut self, value: f64) {
        self.norm_fitness = Some(value);
    }

    /// RMSD between the minimized pose's common substructure and the anchor, when the
    /// pipeline reports one.
    pub fn anchor_rmsd(&self) -> Option<f64> {
        self.anchor_rmsd
    }

    pub fn set_anchor_rmsd(&mut self, rmsd: f64) {
        self.anchor_rmsd = Some(rmsd);
    }

    /// Uniform crossover with `other`.
    ///
    /// Returns the species the child inherits and the child genotype, or `None` when the
    /// interspecies method forbids recombining these parents.
    pub fn crossover<R: Rng>(
        &self,
        other: &Candidate,
        method: InterspeciesCrossover,
        rng: &mut R,
    ) -> Option<(Option<Arc<Species>>, Vec<usize>)> {
        let same_species = self.species == other.species;
        if method == InterspeciesCrossover::None && !same_species {
            return None;
        }

        let from_self = rng.gen_bool(0.5);
        let inherited = if from_self {
            self.species.clone()
        } else {
            other.species.clone()
        };
        let shared = match (&self.species, &other.species) {
            (Some(a), Some(b)) => a.shared_lists(b),
            _ => Vec::new(),
        };

        let genotype = self
            .genotype
            .iter()
            .zip(&other.genotype)
            .enumerate()
            .map(|(position, (&mine, &theirs))| {
                let mixable = method == InterspeciesCrossover::Complete
                    || same_species
                    || shared.contains(&position);
                if mixable {
                    if rng.gen_bool(0.5) { mine } else { theirs }
                } else if from_self {
                    mine
                } else {
                    theirs
                }
            })
            .collect();
        Some((inherited, genotype))
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("id", &self.id)
            .field("genotype", &self.genotype)
            .field("species", &self.species)
            .field("has_phenotype", &self.phenotype.is_some())
            .field("workdir", &self.workdir)
            .field("scores", &self.scores)
            .field("norm_fitness", &self.norm_fitness)
            .finish()
    }
}

/// Ordering by normalized fitness, unnormalized candidates last.
pub fn by_norm_fitness(a: &Candidate, b: &Candidate) -> std::cmp::Ordering {
    let a = a.norm_fitness.unwrap_or(f64::NEG_INFINITY);
    let b = b.norm_fitness.unwrap_or(f64::NEG_INFINITY);
    a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
}
