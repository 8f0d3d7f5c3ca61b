//! File-backed chemistry for the command line: reactant libraries, a descriptor-level
//! reactor, XYZ structures and external scoring programs.

use crate::config::models::{AppConfig, ReactionSpec, ScoringTarget};
use crate::error::{self, CliError};
use anyhow::{Context, anyhow, bail};
use compound_evolver::core::grid::exclusion::ExclusionShape;
use compound_evolver::core::models::candidate::Candidate;
use compound_evolver::core::models::ids::CandidateId;
use compound_evolver::core::models::molecule::{AtomSite, Descriptors, Molecule, MoleculeHandle};
use compound_evolver::core::models::species::Species;
use compound_evolver::engine::chemistry::{ReactantSpace, Reactor};
use compound_evolver::engine::context::RunContext;
use compound_evolver::engine::error::EngineError;
use compound_evolver::engine::pipeline::{CandidatePipeline, PipelineError, PipelineStep};
use compound_evolver::engine::steps::ExclusionFilter;
use compound_evolver::workflows::evolve::EvolutionSetup;
use nalgebra::Point3;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// File an external scoring program may leave in the candidate directory.
pub const POSE_FILE: &str = "pose.xyz";

const CHILD_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq)]
pub struct Reactant {
    pub identifier: String,
    pub descriptors: Descriptors,
}

/// One reactant per line: `identifier [mass] [heavy-atoms] [logP]`. Blank lines and
/// lines starting with `#` are skipped.
#[derive(Debug, Clone)]
pub struct ReactantLibrary {
    reactants: Vec<Reactant>,
}

impl ReactantLibrary {
    pub fn from_path(path: &Path) -> error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let library = Self {
            reactants: Self::parse(&content).map_err(|e| CliError::parsing(path, e))?,
        };
        if library.is_empty() {
            return Err(CliError::parsing(path, anyhow!("library holds no reactants")));
        }
        debug!(path = %path.display(), reactants = library.len(), "Loaded reactant library");
        Ok(library)
    }

    pub fn parse(content: &str) -> anyhow::Result<Vec<Reactant>> {
        let mut reactants = Vec::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let identifier = fields.next().unwrap_or_default().to_string();
            let mut number_field = |name: &str| -> anyhow::Result<Option<f64>> {
                fields
                    .next()
                    .map(|f| f.parse::<f64>())
                    .transpose()
                    .with_context(|| format!("line {}: invalid {name}", number + 1))
            };
            let mass = number_field("mass")?.unwrap_or(0.0);
            let heavy_atoms = number_field("heavy atom count")?.unwrap_or(0.0);
            let log_p = number_field("logP")?.unwrap_or(0.0);
            if mass < 0.0 || heavy_atoms < 0.0 || heavy_atoms.fract() != 0.0 {
                bail!("line {}: descriptors of '{identifier}' are out of range", number + 1);
            }
            reactants.push(Reactant {
                identifier,
                descriptors: Descriptors {
                    mass,
                    heavy_atom_count: heavy_atoms as usize,
                    log_p,
                    ..Descriptors::default()
                },
            });
        }
        Ok(reactants)
    }

    pub fn len(&self) -> usize {
        self.reactants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reactants.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Reactant> {
        self.reactants.get(index)
    }
}

/// A product known only by its summed descriptors.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub descriptors: Descriptors,
}

impl Molecule for ProductRecord {
    fn atoms(&self) -> &[AtomSite] {
        &[]
    }

    fn descriptors(&self) -> Descriptors {
        self.descriptors
    }
}

/// Joins reactants at the descriptor level: masses, heavy atoms and logP add up, minus
/// the reaction's mass loss per formed bond.
pub struct LibraryReactor {
    libraries: Arc<Vec<ReactantLibrary>>,
    reactions: Vec<ReactionSpec>,
}

impl LibraryReactor {
    pub fn new(libraries: Arc<Vec<ReactantLibrary>>, reactions: Vec<ReactionSpec>) -> Self {
        Self {
            libraries,
            reactions,
        }
    }
}

impl Reactor for LibraryReactor {
    fn react(&self, species: &Species, reactants: &[usize]) -> Result<MoleculeHandle, PipelineError> {
        let reaction = self.reactions.get(species.reaction()).ok_or_else(|| {
            PipelineError::infrastructure(format!("no reaction #{}", species.reaction()))
        })?;
        let picked = resolve(&self.libraries, species, reactants)?;
        if picked.is_empty() {
            return Err(PipelineError::invalid("a reaction needs at least one reactant"));
        }

        let mut descriptors = Descriptors::default();
        for reactant in &picked {
            descriptors.mass += reactant.descriptors.mass;
            descriptors.heavy_atom_count += reactant.descriptors.heavy_atom_count;
            descriptors.log_p += reactant.descriptors.log_p;
        }
        descriptors.mass -= reaction.mass_loss * (picked.len() - 1) as f64;
        if descriptors.mass < 0.0 {
            return Err(PipelineError::invalid(format!(
                "{} loses more mass than its reactants carry",
                reaction.name
            )));
        }
        Ok(Arc::new(ProductRecord { descriptors }))
    }
}

fn resolve<'l>(
    libraries: &'l [ReactantLibrary],
    species: &Species,
    reactants: &[usize],
) -> Result<Vec<&'l Reactant>, PipelineError> {
    species
        .reactant_lists()
        .iter()
        .zip(reactants)
        .map(|(&list, &index)| {
            libraries
                .get(list)
                .and_then(|library| library.get(index))
                .ok_or_else(|| {
                    PipelineError::invalid(format!("no reactant {index} in library {list}"))
                })
        })
        .collect()
}

/// Reactant identifiers feeding a candidate's reaction, in component order.
pub fn reactant_identifiers(
    libraries: &[ReactantLibrary],
    candidate: &Candidate,
) -> Result<Vec<String>, PipelineError> {
    let species = candidate
        .species()
        .ok_or_else(|| PipelineError::invalid("candidate has no species"))?;
    let reactants = candidate
        .reactants()
        .ok_or_else(|| PipelineError::invalid("genotype does not cover the species"))?;
    Ok(resolve(libraries, species, &reactants)?
        .into_iter()
        .map(|r| r.identifier.clone())
        .collect())
}

fn element(symbol: &str) -> Option<(u8, f64)> {
    if let Ok(number) = symbol.parse::<u8>() {
        return Some((number, 0.0));
    }
    Some(match symbol {
        "H" => (1, 1.008),
        "C" => (6, 12.011),
        "N" => (7, 14.007),
        "O" => (8, 15.999),
        "F" => (9, 18.998),
        "P" => (15, 30.974),
        "S" => (16, 32.06),
        "Cl" | "CL" => (17, 35.45),
        "Br" | "BR" => (35, 79.904),
        "I" => (53, 126.904),
        _ => return None,
    })
}

/// Atoms read from an XYZ file: a count line, a comment line, then `element x y z` rows.
#[derive(Debug, Clone, PartialEq)]
pub struct XyzMolecule {
    atoms: Vec<AtomSite>,
    mass: f64,
}

impl XyzMolecule {
    pub fn from_path(path: &Path) -> error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| CliError::parsing(path, e))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut lines = content.lines();
        let count: usize = lines
            .next()
            .context("empty XYZ file")?
            .trim()
            .parse()
            .context("first line must hold the atom count")?;
        lines.next();

        let mut atoms = Vec::with_capacity(count);
        let mut mass = 0.0;
        for (i, line) in lines.filter(|l| !l.trim().is_empty()).take(count).enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [symbol, x, y, z, ..] = fields.as_slice() else {
                bail!("atom {}: expected 'element x y z'", i + 1);
            };
            let (atomic_number, atom_mass) =
                element(symbol).with_context(|| format!("atom {}: unknown element '{symbol}'", i + 1))?;
            let coordinate = |v: &str| -> anyhow::Result<f64> {
                v.parse().with_context(|| format!("atom {}: bad coordinate '{v}'", i + 1))
            };
            atoms.push(AtomSite::new(
                Point3::new(coordinate(*x)?, coordinate(*y)?, coordinate(*z)?),
                atomic_number,
            ));
            mass += atom_mass;
        }
        if atoms.len() != count {
            bail!("header announces {count} atoms but {} were found", atoms.len());
        }
        Ok(Self { atoms, mass })
    }
}

impl Molecule for XyzMolecule {
    fn atoms(&self) -> &[AtomSite] {
        &self.atoms
    }

    fn descriptors(&self) -> Descriptors {
        Descriptors {
            mass: self.mass,
            heavy_atom_count: self.atoms.iter().filter(|a| a.is_heavy()).count(),
            ..Descriptors::default()
        }
    }
}

/// Reads `score [anchor-rmsd]` from the last non-empty line a scoring program prints.
pub fn parse_score_output(stdout: &str) -> Result<(f64, Option<f64>), String> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| "scoring program printed nothing".to_string())?;
    let mut fields = line.split_whitespace();
    let score = fields
        .next()
        .and_then(|f| f.parse::<f64>().ok())
        .ok_or_else(|| format!("cannot read a score from '{}'", line.trim()))?;
    let rmsd = match fields.next() {
        Some(f) => Some(
            f.parse::<f64>()
                .map_err(|_| format!("cannot read an anchor RMSD from '{}'", line.trim()))?,
        ),
        None => None,
    };
    Ok((score, rmsd))
}

/// Runs an external program in the candidate directory as
/// `command [args..] <candidate-dir> <reactant-id>..`.
///
/// A non-zero exit or unreadable output rejects the candidate. A program that cannot be
/// started at all is an infrastructure failure. While the program runs, the step watches
/// the run context and kills it once the run is aborted or the candidate's task is
/// cancelled. Only the direct child is killed, so wrapper scripts should `exec` the tool.
pub struct ExternalScoring {
    target: ScoringTarget,
    libraries: Arc<Vec<ReactantLibrary>>,
    context: Arc<RunContext>,
}

impl ExternalScoring {
    pub fn new(
        target: ScoringTarget,
        libraries: Arc<Vec<ReactantLibrary>>,
        context: Arc<RunContext>,
    ) -> Self {
        Self {
            target,
            libraries,
            context,
        }
    }

    fn wait(&self, id: CandidateId, child: &mut Child) -> Result<ExitStatus, PipelineError> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if self.context.should_stop(id) => {
                    if let Err(e) = child.kill() {
                        debug!(candidate = %id, "Cannot kill '{}': {}", self.target.command, e);
                    }
                    let _ = child.wait();
                    debug!(candidate = %id, "Scoring program stopped");
                    return Err(PipelineError::Terminated);
                }
                Ok(None) => thread::sleep(CHILD_POLL),
                Err(e) => {
                    return Err(PipelineError::infrastructure_with(
                        format!("cannot wait for '{}'", self.target.command),
                        e,
                    ));
                }
            }
        }
    }
}

/// Reads a child pipe to the end on its own thread so a chatty program never blocks.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        buffer
    })
}

fn collect(handle: JoinHandle<Vec<u8>>) -> String {
    handle
        .join()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

impl PipelineStep<Candidate, Candidate> for ExternalScoring {
    fn execute(&self, mut candidate: Candidate) -> Result<Candidate, PipelineError> {
        let dir = candidate
            .workdir()
            .ok_or_else(|| PipelineError::infrastructure("candidate has no working directory"))?
            .to_path_buf();
        let identifiers = reactant_identifiers(&self.libraries, &candidate)?;

        let mut child = Command::new(&self.target.command)
            .args(&self.target.args)
            .arg(&dir)
            .args(&identifiers)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PipelineError::infrastructure_with(
                    format!("cannot start '{}'", self.target.command),
                    e,
                )
            })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        // Readers of a killed program are left to finish on their own.
        let status = self.wait(candidate.id(), &mut child)?;

        if !status.success() {
            let stderr = collect(stderr);
            let reason = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            return Err(PipelineError::invalid(format!(
                "'{}' exited with {}: {}",
                self.target.command,
                status,
                reason.trim()
            )));
        }

        let (score, rmsd) = parse_score_output(&collect(stdout)).map_err(PipelineError::invalid)?;
        let pose_path = dir.join(POSE_FILE);
        if pose_path.exists() {
            let pose = XyzMolecule::from_path(&pose_path)
                .map_err(|e| PipelineError::invalid(format!("unreadable pose: {e}")))?;
            candidate.set_pose(Arc::new(pose));
        }
        if let Some(rmsd) = rmsd {
            candidate.set_anchor_rmsd(rmsd);
        }
        candidate.set_raw_score(score)?;
        Ok(candidate)
    }
}

/// Everything a run needs, loaded once from the files the configuration names.
///
/// Scoring steps watch a specific run, so the pipelines themselves are built per run by
/// [`LoadedChemistry::setup`].
pub struct LoadedChemistry {
    pub libraries: Arc<Vec<ReactantLibrary>>,
    species: Vec<Species>,
    reactions: Vec<ReactionSpec>,
    shape: Option<Arc<ExclusionShape>>,
    scoring: Vec<ScoringTarget>,
}

impl LoadedChemistry {
    /// Binds the scoring pipelines to `context`. Aborting that run stops its scoring
    /// programs, and the exclusion check counts its clashes there.
    pub fn setup(&self, context: &Arc<RunContext>) -> EvolutionSetup {
        let sizes: Vec<usize> = self.libraries.iter().map(ReactantLibrary::len).collect();
        let scoring: Vec<CandidatePipeline> = self
            .scoring
            .iter()
            .map(|target| {
                let step = ExternalScoring::new(
                    target.clone(),
                    Arc::clone(&self.libraries),
                    Arc::clone(context),
                );
                match &self.shape {
                    Some(shape) => Arc::new(
                        step.pipe(ExclusionFilter::new(Arc::clone(shape), Arc::clone(context))),
                    ) as CandidatePipeline,
                    None => Arc::new(step) as CandidatePipeline,
                }
            })
            .collect();

        EvolutionSetup {
            space: ReactantSpace::full(&sizes),
            species: self.species.clone(),
            reactor: Arc::new(LibraryReactor::new(
                Arc::clone(&self.libraries),
                self.reactions.clone(),
            )),
            similarity: None,
            scoring,
            contributions: None,
        }
    }
}

/// Loads the libraries and the receptor named by the configuration.
pub fn load(app: &AppConfig) -> error::Result<LoadedChemistry> {
    let libraries: Vec<ReactantLibrary> = app
        .reactant_files
        .iter()
        .map(|path| ReactantLibrary::from_path(path))
        .collect::<error::Result<_>>()?;
    let sizes: Vec<usize> = libraries.iter().map(ReactantLibrary::len).collect();
    info!(libraries = libraries.len(), ?sizes, "Reactant libraries loaded");

    let species = app
        .reactions
        .iter()
        .enumerate()
        .map(|(i, reaction)| {
            let species = Species::new(i, reaction.reactant_lists.len(), reaction.reactant_lists.clone())
                .and_then(|s| s.validate_against(sizes.len()).map(|_| s))
                .map_err(|e| CliError::Config(format!("reaction '{}': {e}", reaction.name)))?;
            Ok(species)
        })
        .collect::<error::Result<Vec<_>>>()?;

    let shape = match &app.receptor {
        Some(path) => {
            let receptor = XyzMolecule::from_path(path)?;
            let shape = ExclusionShape::new(&receptor, app.exclusion_tolerance)
                .map_err(EngineError::from)?;
            info!(receptor = %path.display(), atoms = receptor.atoms().len(), "Exclusion shape built");
            Some(Arc::new(shape))
        }
        None => None,
    };
    if shape.is_some() && app.scoring.is_empty() {
        warn!("The receptor is only checked against poses; dummy fitness produces none");
    }

    Ok(LoadedChemistry {
        libraries: Arc::new(libraries),
        species,
        reactions: app.reactions.clone(),
        shape,
        scoring: app.scoring.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn library(text: &str) -> ReactantLibrary {
        ReactantLibrary {
            reactants: ReactantLibrary::parse(text).unwrap(),
        }
    }

    fn libraries() -> Arc<Vec<ReactantLibrary>> {
        Arc::new(vec![
            library("# amines\nmethylamine 31.06 2 -0.57\nethylamine 45.08 3 -0.13\n"),
            library("acetic-acid 60.05 4 -0.17\n\nbenzoic-acid 122.12 9 1.87\n"),
        ])
    }

    fn amide() -> ReactionSpec {
        ReactionSpec {
            name: "amide".into(),
            reactant_lists: vec![0, 1],
            mass_loss: 18.02,
        }
    }

    #[test]
    fn library_lines_take_optional_descriptors() {
        let reactants = ReactantLibrary::parse("a\nb 12.5\nc 30 2 1.5\n").unwrap();
        assert_eq!(reactants.len(), 3);
        assert_eq!(reactants[0].descriptors.mass, 0.0);
        assert_eq!(reactants[1].descriptors.mass, 12.5);
        assert_eq!(reactants[2].descriptors.heavy_atom_count, 2);
        assert_eq!(reactants[2].descriptors.log_p, 1.5);
    }

    #[test]
    fn library_reports_the_offending_line() {
        let err = ReactantLibrary::parse("a 1\nb heavy\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"), "{err:#}");
        assert!(ReactantLibrary::parse("a -3\n").is_err());
    }

    #[test]
    fn reactor_sums_descriptors_minus_mass_loss() {
        let reactor = LibraryReactor::new(libraries(), vec![amide()]);
        let species = Species::new(0, 2, vec![0, 1]).unwrap();

        let product = reactor.react(&species, &[1, 0]).unwrap();
        let d = product.descriptors();
        assert!((d.mass - (45.08 + 60.05 - 18.02)).abs() < 1e-9);
        assert_eq!(d.heavy_atom_count, 7);
        assert!((d.log_p - (-0.30)).abs() < 1e-9);
        assert!(product.atoms().is_empty());
    }

    #[test]
    fn reactor_rejects_reactants_outside_the_library() {
        let reactor = LibraryReactor::new(libraries(), vec![amide()]);
        let species = Species::new(0, 2, vec![0, 1]).unwrap();
        let err = reactor.react(&species, &[0, 5]).unwrap_err();
        assert!(err.is_candidate_invalid());
    }

    #[test]
    fn identifiers_follow_the_species_lists() {
        let species = Arc::new(Species::new(0, 2, vec![1, 0]).unwrap());
        let mut candidate = Candidate::new(CandidateId::new(1), vec![0, 1]);
        let reactor = LibraryReactor::new(libraries(), vec![amide()]);
        let reactants = species.select_reactants(candidate.genotype()).unwrap();
        let product = reactor.react(&species, &reactants).unwrap();
        candidate.set_phenotype(Arc::clone(&species), product);

        let ids = reactant_identifiers(&libraries(), &candidate).unwrap();
        assert_eq!(ids, vec!["benzoic-acid", "methylamine"]);
    }

    #[test]
    fn xyz_parses_atoms_and_checks_the_count() {
        let xyz = XyzMolecule::parse("3\nwater and a carbon\nO 0 0 0\nH 0.96 0 0\nC 5 5 5\n").unwrap();
        assert_eq!(xyz.atoms().len(), 3);
        assert_eq!(xyz.atoms()[0].atomic_number, 8);
        assert_eq!(xyz.descriptors().heavy_atom_count, 2);
        assert!((xyz.descriptors().mass - (15.999 + 1.008 + 12.011)).abs() < 1e-9);

        assert!(XyzMolecule::parse("2\n\nC 0 0 0\n").is_err());
        assert!(XyzMolecule::parse("1\n\nXx 0 0 0\n").is_err());
    }

    #[test]
    fn score_output_uses_the_last_line() {
        assert_eq!(parse_score_output("docking...\n-7.25\n\n"), Ok((-7.25, None)));
        assert_eq!(parse_score_output("-8.1 0.42\n"), Ok((-8.1, Some(0.42))));
        assert!(parse_score_output("").is_err());
        assert!(parse_score_output("no pose found\n").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn external_scoring_reads_score_and_pose() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("score.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nprintf '1\\n\\nC 0 0 0\\n' > \"$1/pose.xyz\"\necho \"scored $2 $3\" >&2\necho '-6.5 0.3'\n",
        )
        .unwrap();
        let workdir = dir.path().join("cand");
        std::fs::create_dir(&workdir).unwrap();

        let species = Arc::new(Species::new(0, 2, vec![0, 1]).unwrap());
        let mut candidate = Candidate::new(CandidateId::new(3), vec![0, 0]);
        let product = LibraryReactor::new(libraries(), vec![amide()])
            .react(&species, &[0, 0])
            .unwrap();
        candidate.set_phenotype(species, product);
        candidate.set_workdir(workdir);

        let step = ExternalScoring::new(
            ScoringTarget {
                command: "sh".into(),
                args: vec![script.to_str().unwrap().to_string()],
            },
            libraries(),
            Arc::new(RunContext::new(dir.path())),
        );
        let scored = step.execute(candidate).unwrap();
        assert_eq!(scored.raw_score(), Some(-6.5));
        assert_eq!(scored.anchor_rmsd(), Some(0.3));
        assert_eq!(scored.pose().unwrap().atoms().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn failing_program_rejects_and_missing_program_is_infrastructure() {
        let dir = tempfile::tempdir().unwrap();
        let context = Arc::new(RunContext::new(dir.path()));
        let species = Arc::new(Species::new(0, 2, vec![0, 1]).unwrap());
        let product = LibraryReactor::new(libraries(), vec![amide()])
            .react(&species, &[0, 0])
            .unwrap();
        let candidate = || {
            let mut c = Candidate::new(CandidateId::new(4), vec![0, 0]);
            c.set_phenotype(Arc::clone(&species), Arc::clone(&product));
            c.set_workdir(dir.path().to_path_buf());
            c
        };

        let failing = ExternalScoring::new(
            ScoringTarget {
                command: "sh".into(),
                args: vec!["-c".into(), "echo 'no pose' >&2; exit 3".into()],
            },
            libraries(),
            Arc::clone(&context),
        );
        let err = failing.execute(candidate()).unwrap_err();
        assert!(err.is_candidate_invalid());
        assert!(err.to_string().contains("no pose"), "{err}");

        let missing = ExternalScoring::new(
            ScoringTarget {
                command: "/nonexistent/dock".into(),
                args: Vec::new(),
            },
            libraries(),
            Arc::clone(&context),
        );
        assert!(matches!(
            missing.execute(candidate()).unwrap_err(),
            PipelineError::Infrastructure { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn aborting_the_run_kills_a_running_program() {
        let dir = tempfile::tempdir().unwrap();
        let context = Arc::new(RunContext::new(dir.path()));
        let species = Arc::new(Species::new(0, 2, vec![0, 1]).unwrap());
        let product = LibraryReactor::new(libraries(), vec![amide()])
            .react(&species, &[0, 0])
            .unwrap();
        let mut candidate = Candidate::new(CandidateId::new(5), vec![0, 0]);
        candidate.set_phenotype(species, product);
        candidate.set_workdir(dir.path().to_path_buf());

        let step = ExternalScoring::new(
            ScoringTarget {
                command: "sh".into(),
                args: vec!["-c".into(), "exec sleep 30".into()],
            },
            libraries(),
            Arc::clone(&context),
        );
        let aborter = {
            let context = Arc::clone(&context);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                context.request_termination();
            })
        };

        let started = Instant::now();
        let err = step.execute(candidate).unwrap_err();
        aborter.join().unwrap();
        assert!(matches!(err, PipelineError::Terminated), "{err}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
