use nalgebra::Point3;
use std::fmt;
use std::sync::Arc;

/// A single atom as seen by the spatial engine: where it is and what element it is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtomSite {
    pub position: Point3<f64>,
    pub atomic_number: u8,
}

impl AtomSite {
    pub fn new(position: Point3<f64>, atomic_number: u8) -> Self {
        Self {
            position,
            atomic_number,
        }
    }

    pub fn is_heavy(&self) -> bool {
        self.atomic_number > 1
    }
}

/// Whole-molecule descriptors used for validity limits, derived scores and the
/// dummy-fitness mode.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Descriptors {
    pub mass: f64,
    pub heavy_atom_count: usize,
    pub log_p: f64,
    pub hydrogen_bond_donors: Option<usize>,
    pub hydrogen_bond_acceptors: Option<usize>,
}

/// Opaque molecule handle owned by the chemistry collaborator.
///
/// The core only ever asks for atom positions with element identity, the bounding box
/// and a handful of descriptors. Everything else about the molecule stays behind this
/// trait.
pub trait Molecule: Send + Sync + fmt::Debug {
    fn atoms(&self) -> &[AtomSite];

    fn descriptors(&self) -> Descriptors;

    /// For every atom, the reaction component (gene position) it originates from, when
    /// the collaborator can establish the substructure correspondence.
    fn atom_origins(&self) -> Option<Vec<Option<usize>>> {
        None
    }

    /// Axis-aligned bounding box as `(min, max)` corners, or `None` for an empty molecule.
    fn bounding_box(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let mut atoms = self.atoms().iter();
        let first = atoms.next()?.position;
        let (min, max) = atoms.fold((first, first), |(min, max), atom| {
            (min.inf(&atom.position), max.sup(&atom.position))
        });
        Some((min, max))
    }
}

pub type MoleculeHandle = Arc<dyn Molecule>;
