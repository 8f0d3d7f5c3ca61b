use super::GridError;
use super::occupancy::SpatialOccupancyGrid;
use crate::core::models::molecule::Molecule;
use tracing::debug;

/// Solvent probe radius in Å.
pub const PROBE_RADIUS: f64 = 1.4;

/// Van der Waals radii in Å, indexed by atomic number (0 is a dummy atom).
const VDW_RADII: [f64; 119] = [
    0.0, 1.1, 1.4, 1.81, 1.53, 1.92, 1.7, 1.55, 1.52, 1.47, 1.54, // 0-10
    2.27, 1.73, 1.84, 2.1, 1.8, 1.8, 1.75, 1.88, 2.75, 2.31, // 11-20
    2.3, 2.15, 2.05, 2.05, 2.05, 2.05, 2.0, 2.0, 2.0, 2.1, // 21-30
    1.87, 2.11, 1.85, 1.9, 1.83, 2.02, 3.03, 2.49, 2.4, 2.3, // 31-40
    2.15, 2.1, 2.05, 2.05, 2.0, 2.05, 2.1, 2.2, 2.2, 1.93, // 41-50
    2.17, 2.06, 1.98, 2.16, 3.43, 2.68, 2.5, 2.48, 2.47, 2.45, // 51-60
    2.43, 2.42, 2.4, 2.38, 2.37, 2.35, 2.33, 2.32, 2.3, 2.28, // 61-70
    2.27, 2.25, 2.2, 2.1, 2.05, 2.0, 2.0, 2.05, 2.1, 2.05, // 71-80
    1.96, 2.02, 2.07, 1.97, 2.02, 2.2, 3.48, 2.83, 2.0, 2.4, // 81-90
    2.0, 2.3, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, // 91-100
    2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, // 101-110
    2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, // 111-118
];

const FALLBACK_VDW_RADIUS: f64 = 2.0;

pub fn vdw_radius(atomic_number: u8) -> f64 {
    VDW_RADII
        .get(atomic_number as usize)
        .copied()
        .unwrap_or(FALLBACK_VDW_RADIUS)
}

/// The steric envelope of a receptor: the solvent-excluded volume on a voxel grid.
///
/// Built by marking every receptor atom as a sphere of radius `vdw + probe`, then rolling
/// the probe back off the surface. `tolerance` adjusts the envelope afterwards: a
/// positive tolerance shrinks the excluded region (a more lenient check), a negative one
/// grows it by the absolute amount.
#[derive(Debug, Clone)]
pub struct ExclusionShape {
    grid: SpatialOccupancyGrid,
}

impl ExclusionShape {
    pub fn new(receptor: &dyn Molecule, tolerance: f64) -> Result<Self, GridError> {
        let (min, max) = receptor.bounding_box().ok_or(GridError::EmptyMolecule)?;
        let mut grid = SpatialOccupancyGrid::around(
            min,
            max,
            SpatialOccupancyGrid::DEFAULT_MARGIN,
            SpatialOccupancyGrid::DEFAULT_RESOLUTION,
        )?;

        for atom in receptor.atoms() {
            grid.mark_sphere(
                &atom.position,
                vdw_radius(atom.atomic_number) + PROBE_RADIUS,
                true,
            );
        }
        grid.scrape_probe(PROBE_RADIUS);

        if tolerance > 0.0 {
            grid.shrink(tolerance);
        } else if tolerance < 0.0 {
            grid.grow(-tolerance);
        }

        debug!(
            atoms = receptor.atoms().len(),
            dims = ?grid.dims(),
            excluded_voxels = grid.marked_count(),
            tolerance,
            "Built exclusion shape."
        );
        Ok(Self { grid })
    }

    /// Whether any atom of `other` falls inside the excluded volume.
    pub fn contains_any(&self, other: &dyn Molecule) -> bool {
        other
            .atoms()
            .iter()
            .any(|atom| self.grid.is_marked(&atom.position))
    }

    /// Number of atoms of `other` inside the excluded volume.
    pub fn clash_count(&self, other: &dyn Molecule) -> usize {
        other
            .atoms()
            .iter()
            .filter(|atom| self.grid.is_marked(&atom.position))
            .count()
    }

    pub fn grid(&self) -> &SpatialOccupancyGrid {
        &self.grid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::molecule::fixtures::{PointCloud, carbon};
    use nalgebra::Point3;

    fn single_carbon_receptor() -> PointCloud {
        PointCloud::new(vec![carbon(0.0, 0.0, 0.0)])
    }

    #[test]
    fn radii_table_covers_common_elements() {
        assert_eq!(vdw_radius(1), 1.1);
        assert_eq!(vdw_radius(6), 1.7);
        assert_eq!(vdw_radius(8), 1.52);
        assert_eq!(vdw_radius(118), 2.0);
        assert_eq!(vdw_radius(200), FALLBACK_VDW_RADIUS);
    }

    #[test]
    fn receptor_atom_center_is_excluded() {
        let shape = ExclusionShape::new(&single_carbon_receptor(), 0.0).unwrap();
        let ligand = PointCloud::new(vec![carbon(0.2, 0.0, 0.0)]);
        assert!(shape.contains_any(&ligand));
        assert_eq!(shape.clash_count(&ligand), 1);
    }

    #[test]
    fn distant_ligand_does_not_clash() {
        let shape = ExclusionShape::new(&single_carbon_receptor(), 0.0).unwrap();
        let ligand = PointCloud::new(vec![carbon(4.5, 0.0, 0.0), carbon(0.0, 30.0, 0.0)]);
        assert!(!shape.contains_any(&ligand));
    }

    #[test]
    fn positive_tolerance_relaxes_and_negative_tightens() {
        let receptor = single_carbon_receptor();
        let neutral = ExclusionShape::new(&receptor, 0.0).unwrap();
        let relaxed = ExclusionShape::new(&receptor, 0.5).unwrap();
        let tightened = ExclusionShape::new(&receptor, -0.5).unwrap();

        let n = neutral.grid().marked_count();
        assert!(relaxed.grid().marked_count() < n);
        assert!(tightened.grid().marked_count() > n);
        assert!(tightened.grid().is_marked(&Point3::origin()));
    }

    #[test]
    fn empty_receptor_is_rejected() {
        assert_eq!(
            ExclusionShape::new(&PointCloud::default(), 0.0).unwrap_err(),
            GridError::EmptyMolecule
        );
    }
}
